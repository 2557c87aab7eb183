//! Engine configuration.
//!
//! Values come from an optional JSON file and are then overridden by
//! `COMMITSYNC_*` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{error_excerpt, non_blank};

/// Rows fetched by one export scan
pub const DEFAULT_BATCH_SIZE: usize = 1000;
const DEFAULT_QUEUE_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_QUEUE_RETRY_DELAY_MS: u64 = 50;

pub const ENV_BATCH_SIZE: &str = "COMMITSYNC_BATCH_SIZE";
pub const ENV_QUEUE_MAX_ATTEMPTS: &str = "COMMITSYNC_QUEUE_MAX_ATTEMPTS";
pub const ENV_QUEUE_RETRY_DELAY_MS: &str = "COMMITSYNC_QUEUE_RETRY_DELAY_MS";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Maximum entities examined per export call
    pub batch_size: usize,
    /// Attempts per queued sync log write before it is dropped
    pub queue_max_attempts: u32,
    /// Delay between attempts, multiplied by the attempt number
    pub queue_retry_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            queue_max_attempts: DEFAULT_QUEUE_MAX_ATTEMPTS,
            queue_retry_delay_ms: DEFAULT_QUEUE_RETRY_DELAY_MS,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; a missing file yields the defaults
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        parse_engine_config(&raw)
    }

    /// Apply `COMMITSYNC_*` overrides from the process environment
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = read_override(&lookup, ENV_BATCH_SIZE)? {
            self.batch_size = value;
        }
        if let Some(value) = read_override(&lookup, ENV_QUEUE_MAX_ATTEMPTS)? {
            self.queue_max_attempts = value;
        }
        if let Some(value) = read_override(&lookup, ENV_QUEUE_RETRY_DELAY_MS)? {
            self.queue_retry_delay_ms = value;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Configuration("batch_size must be at least 1".into()));
        }
        if self.queue_max_attempts == 0 {
            return Err(Error::Configuration(
                "queue_max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub const fn queue_retry_delay(&self) -> Duration {
        Duration::from_millis(self.queue_retry_delay_ms)
    }
}

/// Parse and validate a JSON configuration payload
pub fn parse_engine_config(payload: &str) -> Result<EngineConfig> {
    let config: EngineConfig = serde_json::from_str(payload)
        .map_err(|error| Error::Configuration(error_excerpt("invalid engine config JSON", &error)))?;
    config.validate()?;
    Ok(config)
}

fn read_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    let Some(raw) = non_blank(&value) else {
        return Ok(None);
    };
    raw.parse()
        .map(Some)
        .map_err(|_| Error::Configuration(format!("{key} has invalid value '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_reference_batch() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.queue_max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_fills_missing_fields_with_defaults() {
        let config = parse_engine_config(r#"{ "batch_size": 250 }"#).unwrap();
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.queue_max_attempts, 3);
    }

    #[test]
    fn test_parse_rejects_unknown_fields() {
        let error = parse_engine_config(r#"{ "batch": 10 }"#).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn test_parse_rejects_zero_batch() {
        assert!(matches!(
            parse_engine_config(r#"{ "batch_size": 0 }"#),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_overrides_apply_and_validate() {
        let env = HashMap::from([
            (ENV_BATCH_SIZE, "20"),
            (ENV_QUEUE_RETRY_DELAY_MS, " 5 "),
        ]);
        let config = EngineConfig::default()
            .with_overrides(|key| env.get(key).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.queue_retry_delay(), Duration::from_millis(5));

        let bad = HashMap::from([(ENV_QUEUE_MAX_ATTEMPTS, "many")]);
        assert!(EngineConfig::default()
            .with_overrides(|key| bad.get(key).map(ToString::to_string))
            .is_err());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = EngineConfig::load_from_path(&tmp.path().join("absent.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }
}
