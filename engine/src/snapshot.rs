//! Snapshot types for distributing table state between instances.
//!
//! A snapshot is the whole replicated table at a point in time. It is stored
//! under three independent keys (payload, capture time, high-water mark), so
//! this module also owns the key naming and the text encoding of each value.

use crate::{error::Result, Error, Record, RecordId, Timestamp};
use serde::{Deserialize, Serialize};

/// Default prefix for snapshot keys.
pub const DEFAULT_KEY_PREFIX: &str = "patient-db";

/// Largest id a snapshot may carry; the sequence must still have a next id.
pub const MAX_RECORD_ID: RecordId = RecordId::MAX - 1;

/// Largest identifier in `records`, or 0 for an empty table.
pub fn high_water_mark(records: &[Record]) -> RecordId {
    records.iter().map(|r| r.id).max().unwrap_or(0).max(0)
}

/// A point-in-time copy of the replicated table.
///
/// Serializes as a plain JSON array of rows, ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    records: Vec<Record>,
}

impl Snapshot {
    /// Create a snapshot from a set of records.
    pub fn new(mut records: Vec<Record>) -> Self {
        records.sort_by_key(|r| r.id);
        Self { records }
    }

    /// Records in id order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Consume the snapshot, returning its records.
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the snapshot holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Largest id in the snapshot.
    pub fn max_id(&self) -> RecordId {
        high_water_mark(&self.records)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    ///
    /// Rejects ids above [`MAX_RECORD_ID`].
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if let Some(record) = snapshot.records.iter().find(|r| r.id > MAX_RECORD_ID) {
            return Err(Error::InvalidSnapshot(format!(
                "id {} leaves no room for a next id",
                record.id
            )));
        }

        Ok(Self::new(snapshot.records))
    }
}

/// Metadata written next to a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    /// When the snapshot was captured (milliseconds since epoch)
    pub captured_at: Timestamp,
    /// Largest identifier known when the snapshot was captured
    pub high_water_mark: RecordId,
}

impl SnapshotMeta {
    /// Metadata for a snapshot captured at `now`.
    pub fn capture(snapshot: &Snapshot, now: Timestamp) -> Self {
        Self {
            captured_at: now,
            high_water_mark: snapshot.max_id(),
        }
    }

    /// Text form of the high-water mark as stored.
    pub fn encode_high_water_mark(&self) -> String {
        self.high_water_mark.to_string()
    }

    /// Text form of the capture time as stored.
    pub fn encode_captured_at(&self) -> String {
        self.captured_at.to_string()
    }

    /// Parse a stored high-water mark.
    ///
    /// Valid marks lie in `0..=MAX_RECORD_ID`.
    pub fn parse_high_water_mark(raw: &str) -> Result<RecordId> {
        match raw.trim().parse::<RecordId>() {
            Ok(value) if (0..=MAX_RECORD_ID).contains(&value) => Ok(value),
            _ => Err(Error::InvalidHighWaterMark(raw.to_string())),
        }
    }

    /// Parse a stored capture time. Unparsable values read as absent.
    pub fn parse_captured_at(raw: &str) -> Option<Timestamp> {
        raw.trim().parse().ok()
    }
}

/// Names of the three keys a snapshot occupies in the shared store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotKeys {
    /// Serialized record array
    pub payload: String,
    /// Capture time in milliseconds
    pub timestamp: String,
    /// High-water mark id
    pub high_water_mark: String,
}

impl SnapshotKeys {
    /// Derive the key names from a prefix.
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            payload: format!("{}-snapshot", prefix),
            timestamp: format!("{}-snapshot-timestamp", prefix),
            high_water_mark: format!("{}-last-id", prefix),
        }
    }

    /// All keys, in write order.
    pub fn all(&self) -> [&str; 3] {
        [
            self.payload.as_str(),
            self.timestamp.as_str(),
            self.high_water_mark.as_str(),
        ]
    }
}

impl Default for SnapshotKeys {
    fn default() -> Self {
        Self::with_prefix(DEFAULT_KEY_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patient(id: RecordId, first_name: &str) -> Record {
        Record::new(
            id,
            json!({
                "first_name": first_name,
                "last_name": "Doe",
                "date_of_birth": "1990-01-01",
                "gender": "female",
            }),
        )
        .unwrap()
    }

    #[test]
    fn empty_snapshot() {
        let snapshot = Snapshot::default();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.max_id(), 0);
        assert_eq!(snapshot.to_json().unwrap(), "[]");
    }

    #[test]
    fn records_are_ordered_by_id() {
        let snapshot = Snapshot::new(vec![patient(3, "C"), patient(1, "A"), patient(2, "B")]);
        let ids: Vec<_> = snapshot.records().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn json_roundtrip() {
        let snapshot = Snapshot::new(vec![
            patient(1, "Jo").with_created_at("2024-01-01 09:00:00"),
            patient(4, "Ana"),
        ]);

        let json = snapshot.to_json().unwrap();
        let restored = Snapshot::from_json(&json).unwrap();

        assert_eq!(snapshot, restored);
    }

    #[test]
    fn deterministic_serialization() {
        let a = Snapshot::new(vec![patient(1, "A"), patient(2, "B")]);
        let b = Snapshot::new(vec![patient(2, "B"), patient(1, "A")]);
        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    }

    #[test]
    fn reject_garbage_payload() {
        let result = Snapshot::from_json("{not json");
        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));

        let result = Snapshot::from_json(r#"{"id": 1}"#);
        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));

        let result = Snapshot::from_json(r#"[{"first_name": "no id"}]"#);
        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));
    }

    #[test]
    fn reject_id_without_successor() {
        let json = format!(r#"[{{"id": {}, "first_name": "Max"}}]"#, i64::MAX);
        assert!(matches!(
            Snapshot::from_json(&json),
            Err(Error::InvalidSnapshot(_))
        ));

        let json = format!(r#"[{{"id": {}, "first_name": "Max"}}]"#, MAX_RECORD_ID);
        assert_eq!(Snapshot::from_json(&json).unwrap().max_id(), MAX_RECORD_ID);
    }

    #[test]
    fn meta_capture() {
        let snapshot = Snapshot::new(vec![patient(2, "A"), patient(9, "B")]);
        let meta = SnapshotMeta::capture(&snapshot, 1706745600000);

        assert_eq!(meta.captured_at, 1706745600000);
        assert_eq!(meta.high_water_mark, 9);
        assert_eq!(meta.encode_high_water_mark(), "9");
        assert_eq!(meta.encode_captured_at(), "1706745600000");
    }

    #[test]
    fn parse_high_water_mark() {
        assert_eq!(SnapshotMeta::parse_high_water_mark("12"), Ok(12));
        assert_eq!(SnapshotMeta::parse_high_water_mark(" 0\n"), Ok(0));
        assert!(SnapshotMeta::parse_high_water_mark("-1").is_err());
        assert!(SnapshotMeta::parse_high_water_mark("twelve").is_err());
        assert_eq!(
            SnapshotMeta::parse_high_water_mark(&MAX_RECORD_ID.to_string()),
            Ok(MAX_RECORD_ID)
        );
        assert!(SnapshotMeta::parse_high_water_mark(&i64::MAX.to_string()).is_err());
        assert_eq!(SnapshotMeta::parse_captured_at("oops"), None);
    }

    #[test]
    fn key_names() {
        let keys = SnapshotKeys::default();
        assert_eq!(keys.payload, "patient-db-snapshot");
        assert_eq!(keys.timestamp, "patient-db-snapshot-timestamp");
        assert_eq!(keys.high_water_mark, "patient-db-last-id");
        assert_eq!(keys.all().len(), 3);
    }
}
