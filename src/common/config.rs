//! Configuration for the replication coordinator

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Coordinator configuration.
///
/// `queue_timeout_ms` is the single global bound applied to every suspension
/// point except the receiver's blocking take: queue offers on the fan-out
/// path, response dispatch, and inbox hand-off (the `distributed.queue.timeout`
/// setting).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Bounded-time queue operations, in milliseconds
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,

    /// Capacity of each per-sender response inbox
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,

    /// User the replication database session is opened under
    #[serde(default)]
    pub replicator_user: ReplicatorUser,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_queue_timeout_ms() -> u64 {
    5000
}
fn default_inbox_capacity() -> usize {
    1024
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Credentials the receiver opens its local database session with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicatorUser {
    #[serde(default = "default_replicator_name")]
    pub name: String,

    #[serde(default)]
    pub password: String,
}

fn default_replicator_name() -> String {
    "replicator".to_string()
}

impl Default for ReplicatorUser {
    fn default() -> Self {
        Self {
            name: default_replicator_name(),
            password: String::new(),
        }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            queue_timeout_ms: default_queue_timeout_ms(),
            inbox_capacity: default_inbox_capacity(),
            replicator_user: ReplicatorUser::default(),
            log_level: default_log_level(),
        }
    }
}

impl ReplicationConfig {
    /// Queue operation timeout as a `Duration`
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ReplicationConfig = serde_json::from_str(&content)
            .map_err(|e| crate::Error::InvalidConfig(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save to file
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| crate::Error::InvalidConfig(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.queue_timeout_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "queue_timeout_ms must be positive".into(),
            ));
        }

        if self.inbox_capacity == 0 {
            return Err(crate::Error::InvalidConfig(
                "inbox_capacity must be positive".into(),
            ));
        }

        if self.replicator_user.name.is_empty() {
            return Err(crate::Error::InvalidConfig(
                "replicator_user.name is required".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReplicationConfig::default();
        assert_eq!(config.queue_timeout(), Duration::from_secs(5));
        assert_eq!(config.inbox_capacity, 1024);
        assert_eq!(config.replicator_user.name, "replicator");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("replication.json");

        let mut config = ReplicationConfig::default();
        config.queue_timeout_ms = 250;
        config.replicator_user.name = "sync".to_string();
        config.to_file(&path).unwrap();

        let loaded = ReplicationConfig::from_file(&path).unwrap();
        assert_eq!(loaded.queue_timeout_ms, 250);
        assert_eq!(loaded.replicator_user.name, "sync");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("replication.json");
        std::fs::write(&path, r#"{"queue_timeout_ms": 100}"#).unwrap();

        let loaded = ReplicationConfig::from_file(&path).unwrap();
        assert_eq!(loaded.queue_timeout_ms, 100);
        assert_eq!(loaded.inbox_capacity, 1024);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = ReplicationConfig::default();
        config.queue_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_user() {
        let mut config = ReplicationConfig::default();
        config.replicator_user.name = String::new();
        assert!(config.validate().is_err());
    }
}
