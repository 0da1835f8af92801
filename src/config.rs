use crate::defaults;
use crate::error::{EchovoxError, Result};
use crate::models::ModelPaths;
use crate::service::reply::{RestartPolicy, ServiceSettings};
use crate::synth::pipeline::PipelineOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub models: ModelPaths,
    pub synthesis: SynthesisConfig,
    pub service: ServiceConfig,
    pub stream: StreamConfig,
    pub store: StoreConfig,
}

/// Model residency and seeding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SynthesisConfig {
    pub low_mem: bool,
    pub reload_models: bool,
    pub seed: Option<u64>,
}

/// Reply service behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    pub reference_audio: Option<PathBuf>,
    pub keywords: Vec<String>,
    /// Humantime duration, e.g. "60s" or "2m"
    pub poll_interval: String,
    pub skip_leading_words: usize,
    pub reply_prefix: String,
    pub max_reply_chars: usize,
    pub state_file: Option<PathBuf>,
    pub max_consecutive_failures: Option<u32>,
    pub output_dir: Option<PathBuf>,
}

/// Mention API endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StreamConfig {
    pub base_url: String,
    pub token: Option<String>,
}

/// Where published audio goes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub bucket: String,
    pub endpoint: String,
    pub public_base_url: Option<String>,
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Http,
    Directory,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            reference_audio: None,
            keywords: vec![defaults::TRIGGER_KEYWORD.to_string()],
            poll_interval: defaults::POLL_INTERVAL.to_string(),
            skip_leading_words: defaults::SKIP_LEADING_WORDS,
            reply_prefix: String::new(),
            max_reply_chars: defaults::MAX_REPLY_CHARS,
            state_file: None,
            max_consecutive_failures: None,
            output_dir: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Directory,
            bucket: String::new(),
            endpoint: "https://s3.amazonaws.com".to_string(),
            public_base_url: None,
            directory: PathBuf::from("published"),
        }
    }
}

impl ServiceConfig {
    /// Parse `poll_interval`; zero is rejected.
    pub fn poll_interval(&self) -> Result<Duration> {
        let interval = humantime::parse_duration(&self.poll_interval).map_err(|e| {
            EchovoxError::ConfigInvalidValue {
                key: "service.poll_interval".to_string(),
                message: format!("{:?}: {}", self.poll_interval, e),
            }
        })?;
        if interval.is_zero() {
            return Err(EchovoxError::ConfigInvalidValue {
                key: "service.poll_interval".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(interval)
    }

    /// Scratch directory for WAV files before upload.
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("echovox"))
    }

    pub fn to_settings(&self) -> Result<ServiceSettings> {
        Ok(ServiceSettings {
            keywords: self.keywords.clone(),
            skip_leading_words: self.skip_leading_words,
            poll_interval: self.poll_interval()?,
            reply_prefix: self.reply_prefix.clone(),
            max_reply_chars: self.max_reply_chars,
            state_file: self.state_file.clone(),
            restart: RestartPolicy {
                max_consecutive_failures: self.max_consecutive_failures,
            },
        })
    }
}

impl SynthesisConfig {
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions::from_flags(self.low_mem, self.reload_models, self.seed)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - ECHOVOX_REFERENCE_AUDIO → service.reference_audio
    /// - ECHOVOX_STREAM_TOKEN → stream.token
    /// - ECHOVOX_SEED → synthesis.seed (ignored unless it parses)
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var("ECHOVOX_REFERENCE_AUDIO")
            && !path.is_empty()
        {
            self.service.reference_audio = Some(PathBuf::from(path));
        }

        if let Ok(token) = std::env::var("ECHOVOX_STREAM_TOKEN")
            && !token.is_empty()
        {
            self.stream.token = Some(token);
        }

        if let Ok(seed) = std::env::var("ECHOVOX_SEED")
            && let Ok(seed) = seed.trim().parse::<u64>()
        {
            self.synthesis.seed = Some(seed);
        }

        self
    }

    /// Check values serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.service.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(EchovoxError::ConfigInvalidValue {
                key: "service.keywords".to_string(),
                message: "at least one non-empty trigger keyword is required".to_string(),
            });
        }
        self.service.poll_interval()?;
        if self.service.max_reply_chars == 0 {
            return Err(EchovoxError::ConfigInvalidValue {
                key: "service.max_reply_chars".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.service.max_consecutive_failures == Some(0) {
            return Err(EchovoxError::ConfigInvalidValue {
                key: "service.max_consecutive_failures".to_string(),
                message: "must be at least 1 (omit it to restart forever)".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/echovox/config.toml on Linux, or a relative
    /// `echovox/config.toml` when no config directory is known.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("echovox")
            .join("config.toml")
    }
}
