//! Engine configuration.
//!
//! Built from defaults, a JSON document, or `FILENEST_*` environment
//! variables layered over the defaults.

use crate::integrity::ChecksumType;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const ENV_PREFIX: &str = "FILENEST_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum chunk length in bytes
    pub max_chunk_size: usize,
    /// Replicas attempted per chunk
    pub replication_factor: usize,
    /// Replicas that must succeed for a chunk to be committed
    pub min_replicas: usize,
    pub upload_concurrency: usize,
    pub download_concurrency: usize,
    /// Deadline for a single replica read or write
    #[serde(with = "duration_millis")]
    pub io_timeout: Duration,
    pub checksum_type: ChecksumType,
    /// Try the next replica when one fails verification
    pub retry_on_corruption: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let workers = num_cpus::get().max(1);
        Self {
            max_chunk_size: 1024 * 1024,
            replication_factor: 3,
            min_replicas: 1,
            upload_concurrency: workers,
            download_concurrency: workers,
            io_timeout: Duration::from_secs(30),
            checksum_type: ChecksumType::Sha256,
            retry_on_corruption: false,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_chunk_size == 0 {
            return Err(ConfigError::Invalid("max_chunk_size must be > 0".into()));
        }
        if self.replication_factor == 0 {
            return Err(ConfigError::Invalid("replication_factor must be > 0".into()));
        }
        if self.min_replicas == 0 || self.min_replicas > self.replication_factor {
            return Err(ConfigError::Invalid(format!(
                "min_replicas must be within 1..={}, got {}",
                self.replication_factor, self.min_replicas
            )));
        }
        if self.upload_concurrency == 0 || self.download_concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be > 0".into()));
        }
        if self.io_timeout.is_zero() {
            return Err(ConfigError::Invalid("io_timeout must be > 0".into()));
        }
        Ok(())
    }

    /// Parse a JSON document; missing fields keep their defaults
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `FILENEST_*` environment variables
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each
    /// `FILENEST_*` key
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "MAX_CHUNK_SIZE")? {
            config.max_chunk_size = v;
        }
        if let Some(v) = parse_var(&lookup, "REPLICATION_FACTOR")? {
            config.replication_factor = v;
        }
        if let Some(v) = parse_var(&lookup, "MIN_REPLICAS")? {
            config.min_replicas = v;
        }
        if let Some(v) = parse_var(&lookup, "UPLOAD_CONCURRENCY")? {
            config.upload_concurrency = v;
        }
        if let Some(v) = parse_var(&lookup, "DOWNLOAD_CONCURRENCY")? {
            config.download_concurrency = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "IO_TIMEOUT_MS")? {
            config.io_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_var(&lookup, "CHECKSUM_TYPE")? {
            config.checksum_type = v;
        }
        if let Some(v) = parse_var(&lookup, "RETRY_ON_CORRUPTION")? {
            config.retry_on_corruption = v;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> ConfigResult<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let key = format!("{ENV_PREFIX}{name}");
    let Some(raw) = lookup(&key) else {
        return Ok(None);
    };

    debug!("Config override {}={}", key, raw);
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue { key, value: raw })
}

#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn max_chunk_size(mut self, bytes: usize) -> Self {
        self.config.max_chunk_size = bytes;
        self
    }

    pub fn replication_factor(mut self, factor: usize) -> Self {
        self.config.replication_factor = factor;
        self
    }

    pub fn min_replicas(mut self, replicas: usize) -> Self {
        self.config.min_replicas = replicas;
        self
    }

    pub fn upload_concurrency(mut self, workers: usize) -> Self {
        self.config.upload_concurrency = workers;
        self
    }

    pub fn download_concurrency(mut self, workers: usize) -> Self {
        self.config.download_concurrency = workers;
        self
    }

    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.config.io_timeout = timeout;
        self
    }

    pub fn checksum_type(mut self, checksum_type: ChecksumType) -> Self {
        self.config.checksum_type = checksum_type;
        self
    }

    pub fn retry_on_corruption(mut self, retry: bool) -> Self {
        self.config.retry_on_corruption = retry;
        self
    }

    pub fn build(self) -> ConfigResult<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
