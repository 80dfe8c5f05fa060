//! Service configuration: a JSON file with every field defaulted.
//! Missing file → defaults. Malformed file → warning and defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::scheduler::SchedulerConfig;
use crate::translate::race::RaceConfig;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "LINGUA_RELAY_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "lingua-relay.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("environment variable {0} is not set")]
    MissingApiKey(String),
    #[error("http client: {0}")]
    Client(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub dir: PathBuf,
    pub flush_interval_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("cache"),
            flush_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub debounce_ms: u64,
    pub max_batch_words: usize,
    pub call_timeout_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            max_batch_words: 50,
            call_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceSection {
    pub fan_out: usize,
    pub per_call_timeout_secs: u64,
    pub overall_timeout_secs: u64,
    pub fallback_timeout_secs: u64,
    pub min_usable_chars: usize,
}

impl Default for RaceSection {
    fn default() -> Self {
        Self {
            fan_out: 2,
            per_call_timeout_secs: 20,
            overall_timeout_secs: 25,
            fallback_timeout_secs: 30,
            min_usable_chars: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub max_text_chars: usize,
    /// Fraction of unique tokens that must be word-cached to reconstruct.
    pub reconstruction_threshold: f64,
    /// Both sides of a seeded word pair need at least this many characters.
    pub min_seed_word_chars: usize,
    pub default_target_lang: String,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_text_chars: 5000,
            reconstruction_threshold: 0.6,
            min_seed_word_chars: 2,
            default_target_lang: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    /// OpenAI-compatible API root.
    pub base_url: String,
    /// Race candidates, in priority order.
    pub models: Vec<String>,
    /// Model used for the fallback call and word batches.
    pub fallback_model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Minimum spacing between requests to one model.
    pub min_interval_ms: u64,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            models: vec!["gpt-4".to_string(), "gpt-3.5-turbo".to_string(), "gpt-4o-mini".to_string()],
            fallback_model: "gpt-4".to_string(),
            api_key_env: "LINGUA_RELAY_API_KEY".to_string(),
            min_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub cache: CacheSection,
    pub scheduler: SchedulerSection,
    pub race: RaceSection,
    pub orchestrator: OrchestratorSection,
    pub backend: BackendSection,
    /// JSON object of language code → display name.
    pub languages_path: Option<PathBuf>,
}

impl ServiceConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load from `$LINGUA_RELAY_CONFIG` (or the default path), never failing.
    pub fn load_or_default() -> Self {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        match Self::load_from_file(&path) {
            Ok(config) => {
                info!(path = %path.display(), "config loaded");
                config
            }
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config load failed, using defaults");
                Self::default()
            }
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.cache.flush_interval_secs.max(1))
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            debounce: Duration::from_millis(self.scheduler.debounce_ms),
            max_batch_words: self.scheduler.max_batch_words.max(1),
            call_timeout: Duration::from_secs(self.scheduler.call_timeout_secs),
        }
    }

    pub fn race_config(&self) -> RaceConfig {
        RaceConfig {
            fan_out: self.race.fan_out,
            per_call_timeout: Duration::from_secs(self.race.per_call_timeout_secs),
            overall_timeout: Duration::from_secs(self.race.overall_timeout_secs),
            fallback_timeout: Duration::from_secs(self.race.fallback_timeout_secs),
            min_usable_chars: self.race.min_usable_chars,
        }
    }
}
