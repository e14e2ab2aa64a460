//! Record types for the replicated table.

use crate::{error::Result, Error, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Column holding the record identifier.
pub const ID_COLUMN: &str = "id";

/// Column holding the creation timestamp.
pub const CREATED_AT_COLUMN: &str = "created_at";

/// One row of the replicated table.
///
/// Only `id` is inspected structurally. `created_at` is carried verbatim so a
/// restored row keeps the timestamp it was created with, and every other
/// column travels as opaque payload in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Identifier assigned by the engine that first inserted the row
    pub id: RecordId,
    /// Creation timestamp as stored by the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Remaining column values, keyed by column name
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create a record from an id and a JSON object of column values.
    ///
    /// A `created_at` string in the payload is lifted into the record; an `id`
    /// key in the payload is ignored in favour of the explicit one.
    pub fn new(id: RecordId, payload: Value) -> Result<Self> {
        let Value::Object(mut fields) = payload else {
            return Err(Error::InvalidPayload("payload must be an object".into()));
        };

        fields.remove(ID_COLUMN);
        let created_at = take_created_at(&mut fields)?;

        Ok(Self {
            id,
            created_at,
            fields,
        })
    }

    /// Build a record from a row returned by the engine.
    pub fn from_row(mut row: Map<String, Value>) -> Result<Self> {
        let id = match row.remove(ID_COLUMN) {
            Some(value) => value
                .as_i64()
                .ok_or_else(|| Error::InvalidRow(format!("non-integer id: {}", value)))?,
            None => return Err(Error::InvalidRow("missing id column".into())),
        };
        let created_at = take_created_at(&mut row)?;

        Ok(Self {
            id,
            created_at,
            fields: row,
        })
    }

    /// Builder-style method to set the creation timestamp.
    pub fn with_created_at(mut self, created_at: impl Into<String>) -> Self {
        self.created_at = Some(created_at.into());
        self
    }

    /// Get a column value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

fn take_created_at(fields: &mut Map<String, Value>) -> Result<Option<String>> {
    match fields.remove(CREATED_AT_COLUMN) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(Error::InvalidRow(format!(
            "created_at must be a string, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_record() {
        let record = Record::new(1, json!({"first_name": "Jo", "last_name": "Doe"})).unwrap();

        assert_eq!(record.id, 1);
        assert_eq!(record.created_at, None);
        assert_eq!(record.field("first_name"), Some(&json!("Jo")));
    }

    #[test]
    fn payload_id_is_ignored() {
        let record = Record::new(7, json!({"id": 99, "first_name": "Jo"})).unwrap();
        assert_eq!(record.id, 7);
        assert!(record.field("id").is_none());
    }

    #[test]
    fn payload_must_be_object() {
        let result = Record::new(1, json!(["not", "an", "object"]));
        assert!(matches!(result, Err(Error::InvalidPayload(_))));
    }

    #[test]
    fn from_row_extracts_id_and_created_at() {
        let row = json!({
            "id": 3,
            "first_name": "Ana",
            "created_at": "2024-02-01 10:00:00",
        });
        let Value::Object(row) = row else {
            unreachable!()
        };

        let record = Record::from_row(row).unwrap();
        assert_eq!(record.id, 3);
        assert_eq!(record.created_at.as_deref(), Some("2024-02-01 10:00:00"));
        assert_eq!(record.fields.len(), 1);
    }

    #[test]
    fn from_row_without_id() {
        let mut row = Map::new();
        row.insert("first_name".into(), json!("Ana"));

        let result = Record::from_row(row);
        assert!(matches!(result, Err(Error::InvalidRow(_))));
    }

    #[test]
    fn serialization_is_flat() {
        let record = Record::new(1, json!({"first_name": "Jo"}))
            .unwrap()
            .with_created_at("2024-01-01 00:00:00");

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({"id": 1, "created_at": "2024-01-01 00:00:00", "first_name": "Jo"})
        );

        let parsed: Record = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, record);
    }
}
