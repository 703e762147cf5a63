//! Storage Configuration
//!
//! ## StorageConfig
//!
//! - **retention**: rows older than `now - retention` are dropped at ingestion (default: 7d)
//! - **future_retention**: rows newer than `now + future_retention` are dropped (default: 2d)
//! - **max_concurrency**: upper bound for query workers (default: available CPUs, capped at 1024)
//! - **merge_batch_size**: maximum number of parts merged at once (default: 15)
//! - **max_state_size_bytes**: memory budget for stats, sort and uniq state (default: 512MiB)
//! - **delete_tasks_path**: JSON file holding pending delete tasks (default: none)
//!
//! Durations are written in LogsQL form (`7d`, `1h30m`); plain integers are
//! read as seconds.
//!
//! ## Usage
//!
//! ```ignore
//! use logstore_storage::StorageConfig;
//!
//! let config: StorageConfig = serde_json::from_str(r#"{"retention": "30d"}"#)?;
//! assert_eq!(config.merge_batch_size, 15);
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Hard cap for query concurrency.
pub const MAX_CONCURRENCY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_retention", with = "duration_serde")]
    pub retention: Duration,

    #[serde(default = "default_future_retention", with = "duration_serde")]
    pub future_retention: Duration,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_merge_batch_size")]
    pub merge_batch_size: usize,

    #[serde(default = "default_max_state_size_bytes")]
    pub max_state_size_bytes: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_tasks_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            retention: default_retention(),
            future_retention: default_future_retention(),
            max_concurrency: default_max_concurrency(),
            merge_batch_size: default_merge_batch_size(),
            max_state_size_bytes: default_max_state_size_bytes(),
            delete_tasks_path: None,
        }
    }
}

impl StorageConfig {
    /// Returns the effective concurrency: at least 1, at most [`MAX_CONCURRENCY`].
    pub fn concurrency(&self) -> usize {
        self.max_concurrency.clamp(1, MAX_CONCURRENCY)
    }
}

fn default_retention() -> Duration {
    Duration::from_secs(7 * 24 * 3600)
}

fn default_future_retention() -> Duration {
    Duration::from_secs(2 * 24 * 3600)
}

fn default_max_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_CONCURRENCY)
}

fn default_merge_batch_size() -> usize {
    15
}

fn default_max_state_size_bytes() -> usize {
    512 * 1024 * 1024
}

/// Serde helpers for Duration serialization in LogsQL duration syntax.
mod duration_serde {
    use logstore_core::values::{duration_string, try_parse_duration};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let nsecs = i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX);
        serializer.serialize_str(&duration_string(nsecs))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(s) => match try_parse_duration(&s) {
                Some(nsecs) if nsecs >= 0 => Ok(Duration::from_nanos(nsecs as u64)),
                _ => Err(D::Error::custom(format!("invalid duration {s:?}"))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: StorageConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.retention, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(config.merge_batch_size, 15);
        assert_eq!(config.max_state_size_bytes, 512 * 1024 * 1024);
        assert!(config.delete_tasks_path.is_none());
        assert!(config.concurrency() >= 1);
    }

    #[test]
    fn test_duration_forms() {
        let config: StorageConfig =
            serde_json::from_str(r#"{"retention": "30d", "future_retention": 3600}"#).unwrap();
        assert_eq!(config.retention, Duration::from_secs(30 * 24 * 3600));
        assert_eq!(config.future_retention, Duration::from_secs(3600));

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""retention":"4w2d""#), "{json}");
        let back: StorageConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.retention, config.retention);
    }

    #[test]
    fn test_invalid_duration() {
        assert!(serde_json::from_str::<StorageConfig>(r#"{"retention": "soon"}"#).is_err());
        assert!(serde_json::from_str::<StorageConfig>(r#"{"retention": "-1h"}"#).is_err());
    }

    #[test]
    fn test_concurrency_is_capped() {
        let config = StorageConfig {
            max_concurrency: 100_000,
            ..Default::default()
        };
        assert_eq!(config.concurrency(), MAX_CONCURRENCY);
    }
}
