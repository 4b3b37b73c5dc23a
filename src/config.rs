use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Engine configuration, passed explicitly to [`crate::GraphEngine::open`].
///
/// Every field has a default so a partial TOML file is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Length every stored embedding vector must have
    pub dimensions: usize,
    /// Default half-life for confidence decay, in days
    pub half_life_days: f64,
    /// Default floor for decayed confidence
    pub min_confidence: f64,
    /// How long SQLite waits on a locked database before reporting busy
    pub busy_timeout_ms: u64,
    /// Attempts for a write transaction that keeps hitting busy/locked
    pub max_busy_retries: u32,
    /// Base backoff between busy retries (multiplied by the attempt number)
    pub retry_backoff_ms: u64,
    /// Capacity of the out-of-core embedding job queue
    pub embedding_queue_capacity: usize,
    /// Sustained embedding request rate
    pub embedding_requests_per_minute: u32,
    /// Requests allowed in a burst before the rate limit applies
    pub embedding_burst: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dimensions: 1536,
            half_life_days: 30.0,
            min_confidence: 0.1,
            busy_timeout_ms: 5_000,
            max_busy_retries: 3,
            retry_backoff_ms: 25,
            embedding_queue_capacity: 256,
            embedding_requests_per_minute: 60,
            embedding_burst: 10,
        }
    }
}

impl EngineConfig {
    /// Default configuration with a different vector dimensionality
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions,
            ..Self::default()
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(contents)
            .map_err(|e| Error::invalid_input(format!("invalid engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimensions == 0 {
            return Err(Error::invalid_input("dimensions must be greater than 0"));
        }
        if !(self.half_life_days.is_finite() && self.half_life_days > 0.0) {
            return Err(Error::invalid_input("half_life_days must be a positive number"));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(Error::invalid_input("min_confidence must be within [0, 1]"));
        }
        if self.max_busy_retries == 0 {
            return Err(Error::invalid_input("max_busy_retries must be at least 1"));
        }
        if self.embedding_queue_capacity == 0 {
            return Err(Error::invalid_input("embedding_queue_capacity must be at least 1"));
        }
        if self.embedding_requests_per_minute == 0 || self.embedding_burst == 0 {
            return Err(Error::invalid_input("embedding rate limit must allow at least one request"));
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("timegraph.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".timegraph").join("graph.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<EngineConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config = EngineConfig::from_toml_str(&contents)?;
    Ok(Some(config))
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str("dimensions = 3\nhalf_life_days = 14.0\n").unwrap();
        assert_eq!(config.dimensions, 3);
        assert_eq!(config.half_life_days, 14.0);
        assert_eq!(config.min_confidence, 0.1);
        assert_eq!(config.max_busy_retries, 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = EngineConfig::from_toml_str("dimensions = 0").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);

        let err = EngineConfig::from_toml_str("min_confidence = 1.5").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);

        let err = EngineConfig::from_toml_str("dimensions = \"many\"").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }

    #[test]
    fn test_load_missing_config_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timegraph.toml");
        std::fs::write(&path, "dimensions = 8\nbusy_timeout_ms = 100\n").unwrap();

        let config = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(config.dimensions, 8);
        assert_eq!(config.busy_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_ensure_db_dir_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let db = default_database_path_in(dir.path());
        ensure_db_dir(&db).unwrap();
        assert!(db.parent().unwrap().exists());
    }
}
