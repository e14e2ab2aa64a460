//! Shared snapshot storage.
//!
//! The shared store is a plain string key-value store that every instance can
//! read and write synchronously. [`SnapshotStore`] layers the snapshot
//! protocol on top of it: three independent keys, written payload first, with
//! a reader that treats anything incomplete as absent and clears anything
//! unparsable.

mod dir;
mod memory;

pub use dir::DirStore;
pub use memory::MemoryStore;

use std::fmt::Debug;
use std::io;
use std::sync::Arc;

use tabsync_engine::{Record, RecordId, Snapshot, SnapshotKeys, SnapshotMeta, Timestamp};

use crate::error::Result;

/// A durable string key-value store shared by all instances.
///
/// Writes to different keys are independent; there is no multi-key atomicity
/// and no compare-and-swap.
pub trait KeyValueStore: Send + Sync + Debug {
    /// Read a key. Missing keys are `Ok(None)`.
    fn read(&self, key: &str) -> io::Result<Option<String>>;

    /// Write a key, replacing any previous value.
    fn write(&self, key: &str, value: &str) -> io::Result<()>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> io::Result<()>;
}

/// A snapshot read back from the shared store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSnapshot {
    /// The table content
    pub snapshot: Snapshot,
    /// Stored high-water mark
    pub high_water_mark: RecordId,
    /// Stored capture time, if the timestamp key was readable
    pub captured_at: Option<Timestamp>,
}

/// Snapshot protocol over a shared key-value store.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    kv: Arc<dyn KeyValueStore>,
    keys: SnapshotKeys,
}

impl SnapshotStore {
    /// Create a snapshot store over `kv` using `keys`.
    pub fn new(kv: Arc<dyn KeyValueStore>, keys: SnapshotKeys) -> Self {
        Self { kv, keys }
    }

    /// The key names this store uses.
    pub fn keys(&self) -> &SnapshotKeys {
        &self.keys
    }

    /// Write `records` as the current snapshot.
    ///
    /// Payload, capture time and high-water mark are three separate writes.
    /// A crash between them leaves the meta behind the payload; readers
    /// tolerate that.
    pub fn dump(&self, records: Vec<Record>) -> Result<SnapshotMeta> {
        let snapshot = Snapshot::new(records);
        let meta = SnapshotMeta::capture(&snapshot, crate::now_millis());
        let payload = snapshot.to_json()?;

        self.kv.write(&self.keys.payload, &payload)?;
        self.kv
            .write(&self.keys.timestamp, &meta.encode_captured_at())?;
        self.kv
            .write(&self.keys.high_water_mark, &meta.encode_high_water_mark())?;

        tracing::debug!(
            records = snapshot.len(),
            high_water_mark = meta.high_water_mark,
            bytes = payload.len(),
            "Snapshot dumped"
        );

        Ok(meta)
    }

    /// Read the current snapshot.
    ///
    /// Returns `None` when the payload or the high-water mark is missing. An
    /// unparsable payload or mark clears all snapshot keys and also returns
    /// `None`, so the caller falls back to a cold start.
    pub fn restore(&self) -> Result<Option<StoredSnapshot>> {
        let (Some(payload), Some(raw_mark)) = (
            self.kv.read(&self.keys.payload)?,
            self.kv.read(&self.keys.high_water_mark)?,
        ) else {
            return Ok(None);
        };

        let parsed = Snapshot::from_json(&payload).and_then(|snapshot| {
            SnapshotMeta::parse_high_water_mark(&raw_mark).map(|mark| (snapshot, mark))
        });

        let (snapshot, high_water_mark) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "Corrupt snapshot in shared store, clearing it");
                self.clear()?;
                return Ok(None);
            }
        };

        let captured_at = self
            .kv
            .read(&self.keys.timestamp)?
            .and_then(|raw| SnapshotMeta::parse_captured_at(&raw));

        Ok(Some(StoredSnapshot {
            snapshot,
            high_water_mark,
            captured_at,
        }))
    }

    /// Whether a complete snapshot (payload and mark) is present.
    ///
    /// Only checks presence; a corrupt snapshot still counts until a
    /// [`restore`](Self::restore) clears it.
    pub fn has_snapshot(&self) -> Result<bool> {
        Ok(self.kv.read(&self.keys.payload)?.is_some()
            && self.kv.read(&self.keys.high_water_mark)?.is_some())
    }

    /// Seed the store from local state if it holds no snapshot yet.
    ///
    /// Returns the written meta, or `None` when a snapshot already existed.
    pub fn ensure_seeded(&self, local: Vec<Record>) -> Result<Option<SnapshotMeta>> {
        if self.has_snapshot()? {
            return Ok(None);
        }

        tracing::info!(records = local.len(), "Seeding shared store from local state");
        self.dump(local).map(Some)
    }

    /// Remove all snapshot keys.
    pub fn clear(&self) -> Result<()> {
        for key in self.keys.all() {
            self.kv.remove(key)?;
        }
        Ok(())
    }
}
