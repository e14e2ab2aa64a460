//! Local database engine contract.
//!
//! Each instance owns one engine exclusively. The coordinator only needs
//! statement execution plus the four table-level operations a reconcile is
//! built from.

mod sqlite;

pub use sqlite::SqliteEngine;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tabsync_engine::{Record, RecordId};

use crate::error::Result;

/// One result row, keyed by column name.
pub type QueryRow = Map<String, Value>;

/// An instance's private database.
#[async_trait]
pub trait LocalEngine: Send + Sync {
    /// Create the replicated table if it does not exist.
    async fn ensure_schema(&self) -> Result<()>;

    /// Run a statement with positional parameters and return its rows.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<QueryRow>>;

    /// Read the whole replicated table in id order.
    async fn fetch_records(&self) -> Result<Vec<Record>>;

    /// Delete every row of the replicated table.
    async fn delete_all(&self) -> Result<u64>;

    /// Insert a record with its own id and creation time.
    ///
    /// An existing row with the same id is left alone; returns whether the
    /// row was written.
    async fn insert_record(&self, record: &Record) -> Result<bool>;

    /// Move the id sequence so the next generated id is at least `next_id`.
    async fn reset_sequence(&self, next_id: RecordId) -> Result<()>;

    /// Release the engine.
    async fn close(&self);
}
