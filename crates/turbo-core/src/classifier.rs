//! Canonical task classifier
//!
//! Purely computational, no I/O. Scores free-text input against task
//! categories using lexical heuristics: keyword tables, length heuristics,
//! and ordered-keyword pattern overrides. This is the single source of truth
//! for task detection; the router consumes the scores with an explicit
//! priority order.

use crate::types::{TaskCategory, TaskScores};

/// Keyword table for one category
struct KeywordRule {
    category: TaskCategory,
    /// Score contributed per keyword hit, capped at 1.0
    weight: f32,
    keywords: &'static [&'static str],
}

/// Ordered-keyword override: all words must appear in order in the prompt
struct PatternRule {
    category: TaskCategory,
    score: f32,
    sequence: &'static [&'static str],
}

const KEYWORD_RULES: &[KeywordRule] = &[
    KeywordRule {
        category: TaskCategory::Coding,
        weight: 0.3,
        keywords: &[
            "code",
            "python",
            "function",
            "def ",
            "class ",
            "import ",
            "program",
            "algorithm",
            "variable",
            "loop",
            "debug",
            "error",
        ],
    },
    KeywordRule {
        category: TaskCategory::Creative,
        weight: 0.3,
        keywords: &[
            "write",
            "story",
            "poem",
            "creative",
            "imagine",
            "describe",
            "character",
            "plot",
            "roleplay",
            "dialogue",
        ],
    },
    KeywordRule {
        category: TaskCategory::Technical,
        weight: 0.3,
        keywords: &[
            "explain",
            "analyze",
            "compare",
            "how does",
            "what is",
            "technical",
            "scientific",
            "research",
        ],
    },
    KeywordRule {
        category: TaskCategory::Quick,
        weight: 0.3,
        keywords: &["hi", "hello", "hey", "thanks", "ok", "yes", "no", "bye"],
    },
    KeywordRule {
        category: TaskCategory::Restricted,
        weight: 0.4,
        keywords: &[
            "uncensored",
            "unfiltered",
            "nsfw",
            "no censorship",
            "no filter",
            "ignore rules",
            "break rules",
            "jailbreak",
            "adult content",
            "explicit content",
        ],
    },
];

const PATTERN_RULES: &[PatternRule] = &[
    PatternRule {
        category: TaskCategory::Coding,
        score: 0.9,
        sequence: &["write", "code"],
    },
    PatternRule {
        category: TaskCategory::Coding,
        score: 0.9,
        sequence: &["write", "function"],
    },
    PatternRule {
        category: TaskCategory::Coding,
        score: 0.9,
        sequence: &["write", "python"],
    },
    PatternRule {
        category: TaskCategory::Coding,
        score: 0.9,
        sequence: &["create", "function"],
    },
    PatternRule {
        category: TaskCategory::Coding,
        score: 0.9,
        sequence: &["implement", "algorithm"],
    },
    PatternRule {
        category: TaskCategory::Creative,
        score: 0.8,
        sequence: &["write", "story"],
    },
    PatternRule {
        category: TaskCategory::Creative,
        score: 0.8,
        sequence: &["create", "character"],
    },
    PatternRule {
        category: TaskCategory::Creative,
        score: 0.8,
        sequence: &["imagine", "scenario"],
    },
];

/// Word count above which a prompt scores the long-context category
const LONG_PROMPT_WORDS: usize = 200;

/// Word count at or below which a prompt is treated as a quick task
const QUICK_PROMPT_WORDS: usize = 3;

/// Table-driven task classifier
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskClassifier;

impl TaskClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Score a prompt against all task categories.
    ///
    /// A baseline "general" score of 0.1 is always present so routing never
    /// sees an empty category set; an empty prompt is purely general.
    pub fn classify(&self, prompt: &str) -> TaskScores {
        let mut scores = TaskScores::new();

        if prompt.trim().is_empty() {
            scores.set(TaskCategory::General, 1.0);
            return scores;
        }

        scores.set(TaskCategory::General, 0.1);
        let lower = prompt.to_lowercase();

        for rule in KEYWORD_RULES {
            let hits = rule.keywords.iter().filter(|kw| lower.contains(**kw)).count();
            if hits > 0 {
                scores.set(rule.category, (hits as f32 * rule.weight).min(1.0));
            }
        }

        let word_count = lower.split_whitespace().count();
        if word_count <= QUICK_PROMPT_WORDS {
            scores.raise(TaskCategory::Quick, 0.9);
        }
        if word_count > LONG_PROMPT_WORDS {
            scores.set(TaskCategory::Long, 0.9);
        }

        for rule in PATTERN_RULES {
            if contains_in_order(&lower, rule.sequence) {
                scores.raise(rule.category, rule.score);
            }
        }

        scores
    }
}

/// True when every word of `sequence` appears in `text`, in order, each
/// match starting after the end of the previous one.
fn contains_in_order(text: &str, sequence: &[&str]) -> bool {
    let mut from = 0;
    for word in sequence {
        match text[from..].find(word) {
            Some(pos) => from += pos + word.len(),
            None => return false,
        }
    }
    true
}
