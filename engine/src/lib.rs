//! # tabsync Engine
//!
//! Pure logic for keeping isolated embedded databases eventually consistent
//! through a shared key-value snapshot and a best-effort change channel.
//!
//! This crate knows nothing about SQLite connections, files or channels. It
//! describes *what* moves between instances and *how* a snapshot is turned
//! back into local rows; the `tabsync-instance` crate does the IO.
//!
//! ## Design Principles
//!
//! - **No IO**: timestamps and rows are passed in by the caller
//! - **Full replace**: divergence is resolved by adopting the latest snapshot
//!   wholesale, never by merging fields
//! - **Identifier continuity**: every snapshot carries a high-water mark, and
//!   an adopting instance continues its id sequence past it
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is one row of the replicated table: an integer id, an optional
//! creation timestamp and an opaque map of column values.
//!
//! ### Snapshots
//!
//! A [`Snapshot`] is the whole table at a point in time. [`SnapshotMeta`]
//! travels next to it with the capture time and the high-water mark.
//!
//! ### Mutation intents
//!
//! Statements are classified into a [`StatementKind`]. Mutating statements
//! produce a [`MutationIntent`] (table + [`Action`]), either supplied by the
//! caller or sniffed from the SQL text.
//!
//! ### Notifications
//!
//! A [`ChannelMessage`] is what crosses the pub/sub channel. It carries a
//! [`ChangeNotification`] and never the data itself.
//!
//! ### Reconcile planning
//!
//! [`ReconcilePlan`] turns a restored snapshot into the ordered list of rows
//! to insert and the next identifier the local sequence must hand out.
//!
//! ## Quick Start
//!
//! ```rust
//! use tabsync_engine::{Record, ReconcilePlan, Snapshot, SnapshotMeta, TableSchema};
//! use serde_json::json;
//!
//! let schema = TableSchema::patients();
//!
//! let record = Record::new(1, json!({
//!     "first_name": "Jo",
//!     "last_name": "Doe",
//!     "date_of_birth": "1990-01-01",
//!     "gender": "female",
//! }))
//! .unwrap();
//! schema.validate_record(&record).unwrap();
//!
//! let snapshot = Snapshot::new(vec![record]);
//! let meta = SnapshotMeta::capture(&snapshot, 1706745600000);
//! assert_eq!(meta.high_water_mark, 1);
//!
//! let payload = snapshot.to_json().unwrap();
//! let restored = Snapshot::from_json(&payload).unwrap();
//!
//! let plan = ReconcilePlan::new(restored, meta.high_water_mark);
//! assert_eq!(plan.next_id(), 2);
//! ```

pub mod error;
pub mod intent;
pub mod notification;
pub mod reconcile;
pub mod record;
pub mod schema;
pub mod snapshot;

// Re-export main types at crate root
pub use error::Error;
pub use intent::{classify, target_table, Action, MutationIntent, StatementKind, UNKNOWN_TABLE};
pub use notification::{ChangeNotification, ChannelMessage};
pub use reconcile::ReconcilePlan;
pub use record::Record;
pub use schema::{FieldDef, FieldType, TableSchema};
pub use snapshot::{high_water_mark, Snapshot, SnapshotKeys, SnapshotMeta, MAX_RECORD_ID};

/// Type aliases for clarity
pub type RecordId = i64;
pub type TableName = String;
pub type Timestamp = u64;
