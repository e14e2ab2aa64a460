//! # tabsync-instance
//!
//! Keeps several isolated database instances eventually consistent through a
//! shared key-value store and a best-effort change channel.
//!
//! Every instance owns a private SQLite database. A local mutation dumps the
//! whole replicated table to the shared store and announces it; every other
//! instance waits a moment, reads the snapshot back and replaces its table
//! with it, advancing its id sequence past the snapshot's high-water mark.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tabsync_instance::{ChannelHub, Instance, MemoryStore, Statement, SyncConfig};
//!
//! # async fn run() -> tabsync_instance::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let hub = ChannelHub::new_shared();
//!
//! let a = Instance::open(SyncConfig::default(), store.clone(), hub.clone()).await?;
//! let b = Instance::open(SyncConfig::default(), store, hub).await?;
//!
//! // Subscribe before mutating; events sent earlier are not replayed.
//! let mut events = b.subscribe_events();
//!
//! a.execute_query(
//!     Statement::new(
//!         "INSERT INTO patients (first_name, last_name, date_of_birth, gender) \
//!          VALUES (?, ?, ?, ?)",
//!     )
//!     .bind("Jo")
//!     .bind("Doe")
//!     .bind("1990-01-01")
//!     .bind("female"),
//! )
//! .await?;
//!
//! // `b` reconciles in the background and reports it on its event stream.
//! let _ = events.recv().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod notifier;
pub mod store;

pub use config::{ConfigError, SyncConfig};
pub use coordinator::{ReconcileOutcome, Statement, SyncCoordinator, SyncGuard};
pub use engine::{LocalEngine, QueryRow, SqliteEngine};
pub use error::{Notice, Result, Severity, SyncError};
pub use lifecycle::{Instance, LocalEvent, Phase};
pub use notifier::{ChangeNotifier, ChannelHub, Subscription};
pub use store::{DirStore, KeyValueStore, MemoryStore, SnapshotStore, StoredSnapshot};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
