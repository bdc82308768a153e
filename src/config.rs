//! Engine configuration — TOML-loadable sections with sensible defaults and
//! environment variable overrides.
//!
//! Every field has a default, so `EngineConfig::default()` yields a working
//! engine (heuristic classifier, no embedder). Providers themselves are
//! injected separately through [`crate::Providers`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::memory::types::{DecayRates, ScoringWeights};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub decay: DecayConfig,
    /// Coefficients of the composite relevance formula.
    pub scoring: ScoringWeights,
    pub embedding: EmbeddingConfig,
    pub reflection: ReflectionConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file location; parent directories are created if missing.
    pub db_path: String,
    /// Per-user memory cap, enforced after every insert.
    pub max_memories_per_user: usize,
    /// Memories whose decay score falls below this are deleted in the sweep.
    pub min_decay_score: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DecayConfig {
    /// Hours between decay sweeps.
    pub interval_hours: u64,
    /// Per-sector λ overrides; unspecified sectors keep their defaults.
    pub rates: DecayRates,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Expected vector length.
    pub dimension: usize,
    /// Model tag recorded alongside stored vectors.
    pub model: String,
    /// Convenience: a non-empty key auto-constructs the Gemini embedder and
    /// the async LLM reclassifier when no providers are injected.
    pub gemini_api_key: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReflectionConfig {
    /// Hours between background reflection cycles; 0 disables the worker.
    pub interval_hours: u64,
    /// Recent memories considered per cycle.
    pub memory_window: usize,
    /// Minimum non-reflective memories before reflecting.
    pub min_memories: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "./data/mnemos.db".into(),
            max_memories_per_user: 500,
            min_decay_score: 0.01,
        }
    }
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            interval_hours: 12,
            rates: DecayRates::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: 768,
            model: "gemini-embedding-001".into(),
            gemini_api_key: String::new(),
        }
    }
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            interval_hours: 0,
            memory_window: 50,
            min_memories: 5,
        }
    }
}

impl DecayConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours.max(1) * 3600)
    }
}

impl ReflectionConfig {
    /// The background reflection period, or `None` when disabled.
    pub fn interval(&self) -> Option<Duration> {
        if self.interval_hours == 0 {
            None
        } else {
            Some(Duration::from_secs(self.interval_hours * 3600))
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file (missing file means defaults),
    /// then apply environment variable overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            EngineConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (MNEMOS_DB, MNEMOS_GEMINI_API_KEY).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MNEMOS_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("MNEMOS_GEMINI_API_KEY") {
            self.embedding.gemini_api_key = val;
        }
    }
}
