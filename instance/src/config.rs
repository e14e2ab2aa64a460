//! Configuration management for an instance.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tabsync_engine::{SnapshotKeys, TableSchema};

/// Instance configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Connection URL of the instance's private database
    pub database_url: String,
    /// Name of the change channel topic
    pub channel_name: String,
    /// Prefix for the three snapshot keys
    pub snapshot_prefix: String,
    /// Pause between receiving a notification and reading the snapshot
    pub settle_delay: Duration,
    /// Directory for a durable shared store, if any
    pub store_dir: Option<PathBuf>,
    /// Capacity of the local event stream
    pub event_capacity: usize,
    /// The replicated table
    pub table: TableSchema,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            channel_name: "patient-db-channel".to_string(),
            snapshot_prefix: "patient-db".to_string(),
            settle_delay: Duration::from_millis(100),
            store_dir: None,
            event_capacity: 64,
            table: TableSchema::patients(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let database_url = env::var("TABSYNC_DATABASE_URL").unwrap_or(defaults.database_url);

        let channel_name = env::var("TABSYNC_CHANNEL").unwrap_or(defaults.channel_name);
        if channel_name.trim().is_empty() {
            return Err(ConfigError::EmptyChannelName);
        }

        let snapshot_prefix =
            env::var("TABSYNC_SNAPSHOT_PREFIX").unwrap_or(defaults.snapshot_prefix);

        let settle_delay = match env::var("TABSYNC_SETTLE_DELAY_MS") {
            Ok(raw) => raw
                .parse()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidSettleDelay(raw))?,
            Err(_) => defaults.settle_delay,
        };

        let store_dir = env::var("TABSYNC_STORE_DIR").ok().map(PathBuf::from);

        Ok(Self {
            database_url,
            channel_name,
            snapshot_prefix,
            settle_delay,
            store_dir,
            ..defaults
        })
    }

    /// Builder-style method to set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Builder-style method to set the settle delay.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Builder-style method to set the replicated table.
    pub fn with_table(mut self, table: TableSchema) -> Self {
        self.table = table;
        self
    }

    /// Snapshot key names derived from the prefix.
    pub fn snapshot_keys(&self) -> SnapshotKeys {
        SnapshotKeys::with_prefix(&self.snapshot_prefix)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid TABSYNC_SETTLE_DELAY_MS value: {0}")]
    InvalidSettleDelay(String),

    #[error("TABSYNC_CHANNEL must not be empty")]
    EmptyChannelName,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.channel_name, "patient-db-channel");
        assert_eq!(config.settle_delay, Duration::from_millis(100));
        assert_eq!(config.snapshot_keys().high_water_mark, "patient-db-last-id");
        assert_eq!(config.table.name, "patients");
    }

    #[test]
    fn builders() {
        let config = SyncConfig::default()
            .with_database_url("sqlite://tab.db")
            .with_settle_delay(Duration::ZERO);

        assert_eq!(config.database_url, "sqlite://tab.db");
        assert_eq!(config.settle_delay, Duration::ZERO);
    }
}
