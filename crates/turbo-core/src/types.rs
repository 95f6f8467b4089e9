//! Core data structures for routing decisions
//!
//! These structures describe models, resource availability, and per-request
//! task scores. They are value types: snapshots are replaced wholesale on
//! refresh and catalog entries are never mutated after load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Execution device for a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// The memory-constrained compute device (GPU)
    Accelerator,
    /// Host CPU execution
    Cpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Accelerator => write!(f, "accelerator"),
            Device::Cpu => write!(f, "cpu"),
        }
    }
}

/// Intent buckets used to bias model selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    Coding,
    Creative,
    Technical,
    Quick,
    Long,
    Restricted,
    General,
}

impl TaskCategory {
    /// All categories, in router priority order (highest first)
    pub fn all() -> &'static [TaskCategory] {
        &[
            TaskCategory::Restricted,
            TaskCategory::Long,
            TaskCategory::Coding,
            TaskCategory::Creative,
            TaskCategory::Quick,
            TaskCategory::Technical,
            TaskCategory::General,
        ]
    }

    /// Stable name used in stats and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCategory::Coding => "coding",
            TaskCategory::Creative => "creative",
            TaskCategory::Technical => "technical",
            TaskCategory::Quick => "quick",
            TaskCategory::Long => "long",
            TaskCategory::Restricted => "restricted",
            TaskCategory::General => "general",
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable catalog entry describing a known model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model identifier as known to the backend (e.g. "phi3:3.8b")
    pub id: String,

    /// Memory footprint in GB when loaded
    pub footprint_gb: f64,

    /// Whether the model may run on the host CPU
    pub cpu_eligible: bool,

    /// Relative CPU speed class ("fast", "medium", "slow")
    #[serde(default = "default_cpu_speed")]
    pub cpu_speed: String,

    /// Capability tags (e.g. "coding", "creative", "uncensored")
    #[serde(default)]
    pub tags: Vec<String>,

    /// Context window size in tokens
    pub context_window: u32,
}

fn default_cpu_speed() -> String {
    "medium".to_string()
}

impl ModelDescriptor {
    /// Check whether this model carries a capability tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Restricted-content-capable models get a relaxed CPU admission margin
    pub fn is_restricted_capable(&self) -> bool {
        self.has_tag("uncensored")
    }
}

/// Point-in-time view of accelerator and host memory availability
///
/// Immutable value, replaced wholesale on each refresh. A cached snapshot is
/// reused if younger than the monitor's refresh interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Accelerator memory in use (GB)
    pub accelerator_used_gb: f64,

    /// Total accelerator memory (GB); 0.0 when no accelerator is present
    pub accelerator_total_gb: f64,

    /// Free accelerator memory (GB)
    pub accelerator_free_gb: f64,

    /// Available host RAM (GB)
    pub host_available_gb: f64,

    /// When this snapshot was captured
    pub captured_at: DateTime<Utc>,
}

impl ResourceSnapshot {
    /// Conservative snapshot used when polling fails: assume no accelerator
    /// memory is free and carry the last known host figure.
    pub fn conservative(host_available_gb: f64) -> Self {
        Self {
            accelerator_used_gb: 0.0,
            accelerator_total_gb: 0.0,
            accelerator_free_gb: 0.0,
            host_available_gb,
            captured_at: Utc::now(),
        }
    }
}

/// Per-request mapping from task category to a score in [0, 1]
///
/// Scores are independent (not normalized to sum 1). The router reads them
/// with an explicit priority order, not a max-score pick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskScores {
    scores: HashMap<TaskCategory, f32>,
}

impl TaskScores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score for a category; absent categories score 0
    pub fn get(&self, category: TaskCategory) -> f32 {
        self.scores.get(&category).copied().unwrap_or(0.0)
    }

    /// Set a category score, clamped to [0, 1]
    pub fn set(&mut self, category: TaskCategory, score: f32) {
        self.scores.insert(category, score.clamp(0.0, 1.0));
    }

    /// Raise a category score to at least `score`
    pub fn raise(&mut self, category: TaskCategory, score: f32) {
        let current = self.get(category);
        if score > current {
            self.set(category, score);
        }
    }

    /// Iterate over present (category, score) pairs
    pub fn iter(&self) -> impl Iterator<Item = (TaskCategory, f32)> + '_ {
        self.scores.iter().map(|(c, s)| (*c, *s))
    }
}
