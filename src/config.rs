use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const CONFIG_PATH_ENV: &str = "TOURIST_EVENTS_CONFIG";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub normalizer: NormalizerConfig,
    pub enrichment: EnrichmentConfig,
    pub expiry: ExpiryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/events.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    pub max_description_chars: usize,
    /// Locale assumed when neither the record nor the known-site table has one
    pub default_locale: String,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_description_chars: crate::pipeline::normalize::MAX_DESCRIPTION_CHARS,
            default_locale: "it".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub target_language: String,
    pub requests_per_minute: u32,
    pub burst: u32,
    pub acquire_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub summary_min_chars: usize,
    pub summary_max_chars: usize,
    /// Filled from the environment, never from the file
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            target_language: "English".to_string(),
            requests_per_minute: 20,
            burst: 1,
            acquire_timeout_secs: 120,
            request_timeout_secs: 30,
            summary_min_chars: 300,
            summary_max_chars: 500,
            api_key: None,
        }
    }
}

impl EnrichmentConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Enrichment runs only when enabled and a key is present.
    pub fn is_active(&self) -> bool {
        self.enabled && self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExpiryConfig {
    pub grace_hours: i64,
    pub retention_days: i64,
    pub sweep_interval_secs: u64,
    pub batch_size: usize,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            grace_hours: 24,
            retention_days: 30,
            sweep_interval_secs: 3600,
            batch_size: 200,
        }
    }
}

impl Config {
    /// Load configuration from `TOURIST_EVENTS_CONFIG` or `config.toml`.
    /// A missing default file yields the defaults; secrets come from the environment.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let explicit = std::env::var(CONFIG_PATH_ENV).ok();
        let path = explicit
            .clone()
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        let mut config = if Path::new(&path).exists() {
            Self::load_from(&path)?
        } else if explicit.is_some() {
            return Err(PipelineError::Config(format!(
                "Config file '{}' does not exist",
                path
            )));
        } else {
            Config::default()
        };

        config.enrichment.api_key = std::env::var(API_KEY_ENV).ok();
        config.validate()?;
        Ok(config)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config_content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&config_content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.enrichment.requests_per_minute == 0 {
            return Err(PipelineError::Config(
                "enrichment.requests_per_minute must be positive".to_string(),
            ));
        }
        if self.expiry.retention_days * 24 < self.expiry.grace_hours {
            return Err(PipelineError::Config(
                "expiry.retention_days must cover at least the grace period".to_string(),
            ));
        }
        if self.expiry.batch_size == 0 {
            return Err(PipelineError::Config(
                "expiry.batch_size must be positive".to_string(),
            ));
        }
        if self.enrichment.summary_min_chars > self.enrichment.summary_max_chars {
            return Err(PipelineError::Config(
                "enrichment.summary_min_chars exceeds summary_max_chars".to_string(),
            ));
        }
        Ok(())
    }
}
