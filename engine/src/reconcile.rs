//! Reconcile planning: turning a restored snapshot into local rows.
//!
//! Reconciliation is full replacement. The local table is emptied and every
//! snapshot record is inserted again with its original id, then the local id
//! sequence is moved past the high-water mark.
//!
//! # Algorithm
//!
//! 1. Order records by id
//! 2. Drop repeated ids, keeping the first (the insert ignores id conflicts,
//!    so later duplicates would be discarded by the engine anyway)
//! 3. Take the effective high-water mark as `max(stored mark, max id)`; the
//!    stored mark can lag the payload when a writer died between key writes
//! 4. The next local id is `effective mark + 1`

use crate::{error::Result, RecordId, Record, Snapshot, TableSchema};
use std::collections::HashSet;

/// The rows to write and the sequence floor for one reconcile.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilePlan {
    records: Vec<Record>,
    stored_high_water_mark: RecordId,
    high_water_mark: RecordId,
    duplicates: usize,
}

impl ReconcilePlan {
    /// Plan the adoption of `snapshot`, stored with `high_water_mark`.
    pub fn new(snapshot: Snapshot, high_water_mark: RecordId) -> Self {
        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(snapshot.len());
        let mut duplicates = 0;

        for record in snapshot.into_records() {
            if seen.insert(record.id) {
                records.push(record);
            } else {
                duplicates += 1;
            }
        }

        let max_id = crate::high_water_mark(&records);

        Self {
            records,
            stored_high_water_mark: high_water_mark,
            high_water_mark: high_water_mark.max(max_id),
            duplicates,
        }
    }

    /// Check that every record can be written back into the table.
    ///
    /// Run before touching the local table so that a snapshot the table
    /// cannot hold is rejected without a partial rewrite. Column values are
    /// not type-checked; see [`TableSchema::check_writable`].
    pub fn validate(&self, schema: &TableSchema) -> Result<()> {
        self.records
            .iter()
            .try_for_each(|record| schema.check_writable(record))
    }

    /// Records to insert, in id order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Number of records to insert.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the plan inserts nothing.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Effective high-water mark after accounting for a lagging stored mark.
    pub fn high_water_mark(&self) -> RecordId {
        self.high_water_mark
    }

    /// The first id the local sequence may hand out after this reconcile.
    ///
    /// Saturates at `RecordId::MAX`; decoded snapshots never get that far.
    pub fn next_id(&self) -> RecordId {
        self.high_water_mark.saturating_add(1)
    }

    /// Whether the stored mark was behind the payload.
    pub fn stored_mark_lagged(&self) -> bool {
        self.high_water_mark > self.stored_high_water_mark
    }

    /// Number of repeated ids dropped from the snapshot.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}
