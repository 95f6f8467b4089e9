//! Configuration management for turbo
//!
//! Provides a layered configuration system: built-in defaults, an optional
//! YAML file, and `TURBO_*` environment variable overrides. Profiles are
//! enumerated, not free-form — an unknown profile name is a configuration
//! error at startup, not a runtime fallback.

use crate::types::ModelDescriptor;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Main configuration structure for turbo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurboConfig {
    /// Inference backend connection settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Resource monitor settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Resident cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Router threshold tunables
    #[serde(default)]
    pub router: RouterThresholds,

    /// Model catalog entries
    #[serde(default = "default_models")]
    pub models: Vec<ModelDescriptor>,

    /// Named profiles
    #[serde(default = "default_profiles")]
    pub profiles: HashMap<String, ProfileConfig>,

    /// Profile active at startup
    #[serde(default = "default_profile_name")]
    pub default_profile: String,
}

/// Inference backend connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the backend (Ollama-compatible)
    pub endpoint: String,

    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,

    /// Overall per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Prompts longer than this many characters are hard-truncated
    pub prompt_char_limit: usize,

    /// Maximum tokens to generate per request
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Context size requested from the backend
    pub context_tokens: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:11434".to_string(),
            connect_timeout_secs: 5,
            request_timeout_secs: 60,
            prompt_char_limit: 3000,
            max_tokens: 1024,
            temperature: 0.7,
            context_tokens: 2048,
        }
    }
}

impl BackendConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Resource monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// How long a sampled snapshot stays fresh, in seconds
    pub refresh_secs: u64,

    /// Accelerator probe timeout in milliseconds
    pub probe_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            refresh_secs: 5,
            probe_timeout_ms: 1000,
        }
    }
}

impl MonitorConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Resident cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Idle sweep period in seconds
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
        }
    }
}

impl CacheConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Router threshold tunables
///
/// The cascade ordering is fixed; these values only move the branch cut-offs
/// and device admission margins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterThresholds {
    /// Restricted-content branch cut-off
    pub restricted: f32,

    /// Long-context branch cut-off
    pub long_context: f32,

    /// Coding branch cut-off
    pub coding: f32,

    /// Creative branch cut-off
    pub creative: f32,

    /// Quick-greeting branch cut-off
    pub quick: f32,

    /// Free accelerator memory headroom required beyond the footprint (GB)
    pub accelerator_margin_gb: f64,

    /// Host RAM headroom required beyond the footprint (GB)
    pub host_margin_gb: f64,

    /// Relaxed host RAM headroom for restricted-content-capable models (GB)
    pub restricted_host_margin_gb: f64,
}

impl Default for RouterThresholds {
    fn default() -> Self {
        Self {
            restricted: 0.3,
            long_context: 0.5,
            coding: 0.5,
            creative: 0.5,
            quick: 0.7,
            accelerator_margin_gb: 0.3,
            host_margin_gb: 2.0,
            restricted_host_margin_gb: 4.0,
        }
    }
}

/// A named profile as it appears in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Human-readable name
    pub display_name: String,

    /// Model ids this profile allows, in preference order
    pub models: Vec<String>,

    /// Hard accelerator memory ceiling (GB)
    pub accelerator_budget_gb: f64,

    /// Maximum simultaneously resident models
    pub max_resident: usize,

    /// Idle seconds before a resident model is auto-unloaded
    pub idle_unload_secs: u64,

    /// Mid-size default model used by the router's general tier
    pub default_model: String,
}

impl ProfileConfig {
    /// Materialize the runtime profile value
    pub fn to_profile(&self, name: &str) -> Profile {
        Profile {
            name: name.to_string(),
            display_name: self.display_name.clone(),
            allowed_models: self.models.clone(),
            accelerator_budget_gb: self.accelerator_budget_gb,
            max_resident: self.max_resident,
            idle_unload: Duration::from_secs(self.idle_unload_secs),
            default_model: self.default_model.clone(),
        }
    }
}

/// Active profile: a named bundle of routing limits swapped as a unit
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub name: String,
    pub display_name: String,
    pub allowed_models: Vec<String>,
    pub accelerator_budget_gb: f64,
    pub max_resident: usize,
    pub idle_unload: Duration,
    pub default_model: String,
}

impl TurboConfig {
    /// Load configuration with precedence:
    /// 1. Environment variables with `TURBO_` prefix (highest)
    /// 2. Configuration file (`TURBO_CONFIG` or common locations)
    /// 3. Defaults (lowest)
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?);

        if let Ok(config_path) = std::env::var("TURBO_CONFIG") {
            builder = builder.add_source(config::File::with_name(&config_path).required(false));
        } else {
            for path in &["./turbo.yaml", "/etc/turbo/config.yaml"] {
                builder = builder.add_source(config::File::with_name(path).required(false));
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TURBO")
                .separator("__")
                .try_parsing(true),
        );

        let parsed: Self = builder.build()?.try_deserialize()?;
        parsed.validate()?;
        debug!(
            models = parsed.models.len(),
            profiles = parsed.profiles.len(),
            default_profile = %parsed.default_profile,
            "configuration loaded"
        );
        Ok(parsed)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::from(path.clone()));

        let parsed: Self = builder.build()?.try_deserialize()?;
        parsed.validate()?;
        debug!(path = %path.display(), "configuration loaded from file");
        Ok(parsed)
    }

    /// Validate cross-references between profiles and the catalog
    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(Error::config("model catalog is empty"));
        }

        let known: Vec<&str> = self.models.iter().map(|m| m.id.as_str()).collect();

        if !self.profiles.contains_key(&self.default_profile) {
            return Err(Error::config(format!(
                "default profile '{}' is not defined",
                self.default_profile
            )));
        }

        for (name, profile) in &self.profiles {
            if profile.models.is_empty() {
                return Err(Error::config(format!(
                    "profile '{}' allows no models",
                    name
                )));
            }
            if profile.accelerator_budget_gb <= 0.0 {
                return Err(Error::config(format!(
                    "profile '{}' has a non-positive accelerator budget",
                    name
                )));
            }
            if profile.max_resident == 0 {
                return Err(Error::config(format!(
                    "profile '{}' has max_resident = 0",
                    name
                )));
            }
            for id in &profile.models {
                if !known.contains(&id.as_str()) {
                    return Err(Error::config(format!(
                        "profile '{}' references unknown model '{}'",
                        name, id
                    )));
                }
            }
            if !profile.models.contains(&profile.default_model) {
                return Err(Error::config(format!(
                    "profile '{}' default model '{}' is not in its allowed set",
                    name, profile.default_model
                )));
            }
        }

        Ok(())
    }

    /// Resolve a profile by name
    pub fn profile(&self, name: &str) -> Result<Profile> {
        self.profiles
            .get(name)
            .map(|p| p.to_profile(name))
            .ok_or_else(|| Error::invalid_profile(name))
    }

    /// The profile active at startup
    pub fn startup_profile(&self) -> Result<Profile> {
        self.profile(&self.default_profile)
    }

    /// Names of all configured profiles
    pub fn profile_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for TurboConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            monitor: MonitorConfig::default(),
            cache: CacheConfig::default(),
            router: RouterThresholds::default(),
            models: default_models(),
            profiles: default_profiles(),
            default_profile: default_profile_name(),
        }
    }
}

fn default_profile_name() -> String {
    "turbo".to_string()
}

fn model(
    id: &str,
    footprint_gb: f64,
    cpu_eligible: bool,
    cpu_speed: &str,
    tags: &[&str],
    context_window: u32,
) -> ModelDescriptor {
    ModelDescriptor {
        id: id.to_string(),
        footprint_gb,
        cpu_eligible,
        cpu_speed: cpu_speed.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        context_window,
    }
}

/// Built-in model database, sized for a 4GB-class accelerator
fn default_models() -> Vec<ModelDescriptor> {
    vec![
        model("gemma:2b", 1.7, true, "fast", &["quick", "general"], 2048),
        model(
            "phi3:3.8b",
            2.2,
            true,
            "medium",
            &["general", "reasoning", "coding"],
            4096,
        ),
        model(
            "deepseek-coder:6.7b",
            3.9,
            false,
            "slow",
            &["coding", "technical"],
            16384,
        ),
        model(
            "mistral:7b",
            4.1,
            true,
            "slow",
            &["creative", "reasoning"],
            8192,
        ),
        model(
            "dolphin-llama3:8b",
            4.7,
            false,
            "slow",
            &["creative", "chat", "uncensored"],
            8192,
        ),
    ]
}

fn profile(
    display_name: &str,
    models: &[&str],
    budget_gb: f64,
    max_resident: usize,
    idle_unload_secs: u64,
    default_model: &str,
) -> ProfileConfig {
    ProfileConfig {
        display_name: display_name.to_string(),
        models: models.iter().map(|m| m.to_string()).collect(),
        accelerator_budget_gb: budget_gb,
        max_resident,
        idle_unload_secs,
        default_model: default_model.to_string(),
    }
}

/// Built-in profile presets
fn default_profiles() -> HashMap<String, ProfileConfig> {
    let mut profiles = HashMap::new();
    profiles.insert(
        "eco".to_string(),
        profile(
            "Eco (lightweight)",
            &["gemma:2b", "phi3:3.8b"],
            2.0,
            1,
            60,
            "gemma:2b",
        ),
    );
    profiles.insert(
        "balanced".to_string(),
        profile(
            "Balanced (all-rounder)",
            &["phi3:3.8b", "gemma:2b"],
            3.5,
            1,
            120,
            "phi3:3.8b",
        ),
    );
    profiles.insert(
        "creative".to_string(),
        profile(
            "Creative (writing & chat)",
            &["dolphin-llama3:8b", "mistral:7b", "phi3:3.8b"],
            3.8,
            1,
            90,
            "phi3:3.8b",
        ),
    );
    profiles.insert(
        "coding".to_string(),
        profile(
            "Coding (programming)",
            &["deepseek-coder:6.7b", "phi3:3.8b", "gemma:2b"],
            3.8,
            1,
            90,
            "phi3:3.8b",
        ),
    );
    profiles.insert(
        "turbo".to_string(),
        profile(
            "Turbo (smart selection)",
            &[
                "phi3:3.8b",
                "deepseek-coder:6.7b",
                "gemma:2b",
                "mistral:7b",
                "dolphin-llama3:8b",
            ],
            3.8,
            1,
            90,
            "phi3:3.8b",
        ),
    );
    profiles
}
