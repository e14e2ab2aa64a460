//! Table schema definition and validation.
//!
//! The schema describes the replicated table: its name and the typed columns
//! that travel as record payload. It is used to validate snapshot content
//! before a reconcile rewrites anything, and to generate the SQL the engine
//! adapter runs.

use crate::{
    error::Result,
    record::{CREATED_AT_COLUMN, ID_COLUMN},
    Error, Record, TableName,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    /// Stored as an integer; `0`/`1` are accepted alongside JSON booleans
    Bool,
    /// Calendar date as `YYYY-MM-DD` text
    Date,
}

impl FieldType {
    /// SQL column type used in generated DDL.
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::String | FieldType::Date => "TEXT",
            FieldType::Int | FieldType::Bool => "INTEGER",
            FieldType::Float => "REAL",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Date => write!(f, "Date"),
        }
    }
}

/// Definition of a column in the replicated table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Column name
    pub name: String,
    /// Column type
    pub field_type: FieldType,
    /// Whether this column is NOT NULL
    pub required: bool,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    /// Validate a JSON value against this field definition.
    pub fn validate(&self, value: Option<&Value>) -> Result<()> {
        match value {
            None | Some(Value::Null) if self.required => {
                Err(Error::MissingRequiredField(self.name.clone()))
            }
            None | Some(Value::Null) => Ok(()),
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &Value) -> Result<()> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean() || matches!(value.as_i64(), Some(0 | 1)),
            FieldType::Date => value.as_str().is_some_and(is_iso_date),
        };

        if valid {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }

    fn column_sql(&self) -> String {
        if self.required {
            format!("{} {} NOT NULL", self.name, self.field_type.sql_type())
        } else {
            format!("{} {}", self.name, self.field_type.sql_type())
        }
    }
}

fn is_iso_date(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidIdentifier(name.to_string()))
    }
}

/// Schema for the replicated table.
///
/// `id` and `created_at` are implicit: every table gets an auto-incrementing
/// integer key and a creation timestamp defaulting to the insert time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    /// Table name
    pub name: TableName,
    /// Payload column definitions
    pub fields: Vec<FieldDef>,
}

impl TableSchema {
    /// Create a new table schema.
    pub fn new(name: impl Into<TableName>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// The patient registry table.
    pub fn patients() -> Self {
        Self::new(
            "patients",
            vec![
                FieldDef::required("first_name", FieldType::String),
                FieldDef::required("last_name", FieldType::String),
                FieldDef::required("date_of_birth", FieldType::Date),
                FieldDef::required("gender", FieldType::String),
                FieldDef::optional("email", FieldType::String),
                FieldDef::optional("phone", FieldType::String),
                FieldDef::optional("address", FieldType::String),
                FieldDef::optional("medical_history", FieldType::String),
            ],
        )
    }

    /// Check that the table and column names are plain SQL identifiers.
    ///
    /// Generated SQL interpolates these names, so this must pass before any
    /// statement is built from the schema.
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.name)?;
        for field in &self.fields {
            validate_identifier(&field.name)?;
            if field.name == ID_COLUMN || field.name == CREATED_AT_COLUMN {
                return Err(Error::InvalidIdentifier(format!(
                    "{} is reserved",
                    field.name
                )));
            }
        }
        Ok(())
    }

    /// Get a field definition by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validate a payload object against this schema.
    ///
    /// Columns the schema does not know are rejected so that an adopted
    /// snapshot can be written back without dropping data.
    pub fn validate_payload(&self, payload: &Map<String, Value>) -> Result<()> {
        for field in &self.fields {
            field.validate(payload.get(&field.name))?;
        }

        if let Some(unknown) = payload.keys().find(|k| self.field(k).is_none()) {
            return Err(Error::InvalidPayload(format!(
                "unknown column '{}' for table {}",
                unknown, self.name
            )));
        }

        Ok(())
    }

    /// Validate a record against this schema.
    pub fn validate_record(&self, record: &Record) -> Result<()> {
        self.validate_payload(&record.fields)
    }

    /// Check that a record can be written back into this table.
    ///
    /// Values stay opaque: only column names and NOT NULL columns are
    /// checked, since that is all the insert itself would reject. Types and
    /// formats are whatever the writing engine accepted.
    pub fn check_writable(&self, record: &Record) -> Result<()> {
        if let Some(unknown) = record.fields.keys().find(|k| self.field(k).is_none()) {
            return Err(Error::InvalidPayload(format!(
                "unknown column '{}' for table {}",
                unknown, self.name
            )));
        }

        let missing = self.fields.iter().find(|f| {
            f.required && record.field(&f.name).map_or(true, Value::is_null)
        });
        match missing {
            Some(field) => Err(Error::MissingRequiredField(field.name.clone())),
            None => Ok(()),
        }
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this table.
    pub fn create_table_sql(&self) -> String {
        let mut columns = vec![format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", ID_COLUMN)];
        columns.extend(self.fields.iter().map(FieldDef::column_sql));
        columns.push(format!(
            "{} TEXT DEFAULT CURRENT_TIMESTAMP",
            CREATED_AT_COLUMN
        ));

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.name,
            columns.join(", ")
        )
    }

    /// Insert statement with an explicit id that ignores id conflicts.
    ///
    /// Bind order: id, created_at, then every field in schema order. A null
    /// created_at falls back to the current time.
    pub fn insert_with_id_sql(&self) -> String {
        let mut columns = vec![ID_COLUMN.to_string(), CREATED_AT_COLUMN.to_string()];
        columns.extend(self.fields.iter().map(|f| f.name.clone()));

        let mut values = vec!["?".to_string(), "COALESCE(?, CURRENT_TIMESTAMP)".to_string()];
        values.extend(self.fields.iter().map(|_| "?".to_string()));

        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO NOTHING",
            self.name,
            columns.join(", "),
            values.join(", "),
            ID_COLUMN
        )
    }

    /// Statement selecting every row in id order.
    pub fn select_all_sql(&self) -> String {
        let mut columns = vec![ID_COLUMN.to_string()];
        columns.extend(self.fields.iter().map(|f| f.name.clone()));
        columns.push(CREATED_AT_COLUMN.to_string());

        format!(
            "SELECT {} FROM {} ORDER BY {}",
            columns.join(", "),
            self.name,
            ID_COLUMN
        )
    }
}
