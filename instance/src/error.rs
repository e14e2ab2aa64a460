//! Unified error handling for an instance.
//!
//! Every failure reaches the UI as a [`Notice`]: a non-fatal, user-visible
//! message. Nothing here is retried; `sync_now` is the recovery path.

use serde::Serialize;

use crate::config::ConfigError;

/// Instance error type.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Engine error: {0}")]
    Engine(#[from] sqlx::Error),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] tabsync_engine::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Reconcile aborted after {applied} of {total} records: {source}")]
    PartialReconcile {
        applied: usize,
        total: usize,
        #[source]
        source: Box<SyncError>,
    },

    #[error("Instance is not ready")]
    NotReady,

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// How loudly a notice should be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// A user-visible, non-fatal failure report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl SyncError {
    /// Log the error and turn it into a notice for the UI.
    pub fn notice(&self) -> Notice {
        let (severity, message, details) = match self {
            SyncError::Engine(e) => {
                tracing::warn!("Engine error: {:?}", e);
                (Severity::Error, "Query failed".to_string(), Some(e.to_string()))
            }
            SyncError::Snapshot(e) => {
                tracing::warn!("Snapshot error: {:?}", e);
                (
                    Severity::Warning,
                    "Shared snapshot could not be used".to_string(),
                    Some(e.to_string()),
                )
            }
            SyncError::Storage(e) => {
                tracing::error!("Storage error: {:?}", e);
                (
                    Severity::Error,
                    "Shared storage unavailable".to_string(),
                    Some(e.to_string()),
                )
            }
            SyncError::Encoding(e) => {
                tracing::error!("Encoding error: {:?}", e);
                (
                    Severity::Error,
                    "Failed to encode data".to_string(),
                    Some(e.to_string()),
                )
            }
            SyncError::PartialReconcile {
                applied, total, ..
            } => {
                tracing::error!(applied, total, "Reconcile aborted mid-rewrite: {}", self);
                (
                    Severity::Error,
                    "Sync failed; local data may be incomplete. Try syncing again.".to_string(),
                    Some(self.to_string()),
                )
            }
            SyncError::NotReady => (
                Severity::Warning,
                "Database is still loading".to_string(),
                None,
            ),
            SyncError::Config(e) => {
                tracing::error!("Config error: {}", e);
                (Severity::Error, e.to_string(), None)
            }
        };

        Notice {
            severity,
            message,
            details,
        }
    }
}

/// Result type alias for instance operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_notice() {
        let notice = SyncError::NotReady.notice();
        assert_eq!(notice.severity, Severity::Warning);
        assert!(notice.details.is_none());
    }

    #[test]
    fn partial_reconcile_display() {
        let err = SyncError::PartialReconcile {
            applied: 2,
            total: 5,
            source: Box::new(SyncError::Engine(sqlx::Error::Protocol("disk full".into()))),
        };

        assert!(err.to_string().starts_with("Reconcile aborted after 2 of 5 records"));
        let notice = err.notice();
        assert_eq!(notice.severity, Severity::Error);
        assert!(notice.details.unwrap().contains("disk full"));
    }

    #[test]
    fn notice_serialization() {
        let notice = SyncError::NotReady.notice();
        let json = serde_json::to_string(&notice).unwrap();
        assert_eq!(
            json,
            r#"{"severity":"warning","message":"Database is still loading"}"#
        );
    }
}
