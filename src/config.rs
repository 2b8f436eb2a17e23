//! Engine configuration.
//!
//! A [`QuiverConfig`] is passed explicitly to
//! [`CollectionManager::open`](crate::client::CollectionManager::open); there is
//! no process-wide client state. Configurations can be built in code with
//! [`QuiverConfig::builder`] or read from a JSON file:
//!
//! ```
//! use quiver::config::{QuiverConfig, StorageBackend};
//!
//! let config: QuiverConfig = serde_json::from_str(r#"{
//!     "storage": { "file": "/var/lib/quiver" },
//!     "retry": { "max_attempts": 5 }
//! }"#).unwrap();
//! assert_eq!(config.retry.max_attempts, 5);
//! assert!(matches!(config.storage, StorageBackend::File(_)));
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QuiverError, Result};
use crate::vector::hnsw::HnswConfig;

/// Where collection data lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Everything stays in process memory; lost on exit.
    #[default]
    Memory,
    /// One subdirectory per collection under the given root.
    File(PathBuf),
}

/// Limits enforced by schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaLimits {
    /// Upper bound for a VARCHAR field's `max_length`, in bytes.
    pub max_varchar_length: usize,
    /// Upper bound for a FLOAT_VECTOR field's `dim`.
    pub max_vector_dim: usize,
    /// Upper bound on the number of fields in one schema.
    pub max_fields: usize,
}

impl Default for SchemaLimits {
    fn default() -> Self {
        Self {
            max_varchar_length: 65_535,
            max_vector_dim: 32_768,
            max_fields: 64,
        }
    }
}

/// Exponential backoff for transient embedding failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub initial_backoff: Duration,
    #[serde(with = "millis")]
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Budget for a single provider call; `None` waits indefinitely.
    #[serde(with = "opt_millis")]
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            attempt_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries; handy for tests.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.saturating_sub(1) as i32);
        let delay = self.initial_backoff.mul_f64(factor.max(1.0));
        delay.min(self.max_backoff)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(QuiverError::invalid_config("retry.max_attempts must be >= 1"));
        }
        if self.multiplier < 1.0 || !self.multiplier.is_finite() {
            return Err(QuiverError::invalid_config("retry.multiplier must be >= 1.0"));
        }
        Ok(())
    }
}

/// Top-level configuration for a [`CollectionManager`](crate::client::CollectionManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuiverConfig {
    pub storage: StorageBackend,
    pub schema_limits: SchemaLimits,
    pub retry: RetryPolicy,
    /// WAL records kept before they are folded into the snapshot.
    pub wal_compaction_threshold: usize,
    /// AUTOINDEX uses exact search below this many vectors.
    pub auto_index_threshold: usize,
    /// Graph parameters used when an index does not specify its own.
    pub hnsw: HnswConfig,
    /// Re-load collections that were loaded when the process last stopped.
    pub restore_loaded_state: bool,
}

impl Default for QuiverConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::Memory,
            schema_limits: SchemaLimits::default(),
            retry: RetryPolicy::default(),
            wal_compaction_threshold: 1024,
            auto_index_threshold: 2048,
            hnsw: HnswConfig::default(),
            restore_loaded_state: true,
        }
    }
}

impl QuiverConfig {
    /// Create a new builder.
    pub fn builder() -> QuiverConfigBuilder {
        QuiverConfigBuilder::default()
    }

    /// Read a JSON configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let config: QuiverConfig = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        self.hnsw.validate()?;
        if self.wal_compaction_threshold == 0 {
            return Err(QuiverError::invalid_config(
                "wal_compaction_threshold must be >= 1",
            ));
        }
        if self.schema_limits.max_varchar_length == 0 || self.schema_limits.max_vector_dim == 0 {
            return Err(QuiverError::invalid_config("schema limits must be positive"));
        }
        Ok(())
    }
}

/// Builder for QuiverConfig.
#[derive(Debug, Default)]
pub struct QuiverConfigBuilder {
    config: QuiverConfig,
}

impl QuiverConfigBuilder {
    /// Keep all data in memory.
    pub fn in_memory(mut self) -> Self {
        self.config.storage = StorageBackend::Memory;
        self
    }

    /// Persist collections under `dir`.
    pub fn data_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.storage = StorageBackend::File(dir.into());
        self
    }

    pub fn schema_limits(mut self, limits: SchemaLimits) -> Self {
        self.config.schema_limits = limits;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn wal_compaction_threshold(mut self, records: usize) -> Self {
        self.config.wal_compaction_threshold = records;
        self
    }

    pub fn auto_index_threshold(mut self, vectors: usize) -> Self {
        self.config.auto_index_threshold = vectors;
        self
    }

    pub fn hnsw(mut self, hnsw: HnswConfig) -> Self {
        self.config.hnsw = hnsw;
        self
    }

    pub fn restore_loaded_state(mut self, restore: bool) -> Self {
        self.config.restore_loaded_state = restore;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<QuiverConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
