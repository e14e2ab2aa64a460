//! SQLite engine adapter.

use std::str::FromStr;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tabsync_engine::{Record, RecordId, TableSchema};

use super::{LocalEngine, QueryRow};
use crate::error::Result;

/// A private SQLite database holding one replicated table.
///
/// The pool keeps exactly one connection open for its whole life, so an
/// in-memory database (`sqlite::memory:`) survives between statements.
#[derive(Debug, Clone)]
pub struct SqliteEngine {
    pool: SqlitePool,
    schema: TableSchema,
}

impl SqliteEngine {
    /// Open the database at `url` for `schema`.
    pub async fn connect(url: &str, schema: TableSchema) -> Result<Self> {
        schema.validate()?;

        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        tracing::debug!(url = %url, table = %schema.name, "Local engine opened");

        Ok(Self { pool, schema })
    }

    /// The replicated table's schema.
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }
}

#[async_trait]
impl LocalEngine for SqliteEngine {
    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(&self.schema.create_table_sql())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<QueryRow>> {
        let query = params.iter().fold(sqlx::query(sql), bind_value);
        let rows = query.fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| row_to_json(row).map_err(Into::into))
            .collect()
    }

    async fn fetch_records(&self) -> Result<Vec<Record>> {
        let rows = sqlx::query(&self.schema.select_all_sql())
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(Record::from_row(row_to_json(row)?)?);
        }
        Ok(records)
    }

    async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query(&format!("DELETE FROM {}", self.schema.name))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_record(&self, record: &Record) -> Result<bool> {
        let sql = self.schema.insert_with_id_sql();
        let query = sqlx::query(&sql)
            .bind(record.id)
            .bind(record.created_at.clone());

        let query = self
            .schema
            .fields
            .iter()
            .map(|field| record.field(&field.name).unwrap_or(&Value::Null))
            .fold(query, bind_value);

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn reset_sequence(&self, next_id: RecordId) -> Result<()> {
        let floor = next_id.saturating_sub(1).max(0);

        // The sequence only ever moves forward: ids handed out locally stay
        // unique even if the adopted snapshot is older than them.
        let updated = sqlx::query("UPDATE sqlite_sequence SET seq = MAX(seq, ?) WHERE name = ?")
            .bind(floor)
            .bind(self.schema.name.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            sqlx::query("INSERT INTO sqlite_sequence (name, seq) VALUES (?, ?)")
                .bind(self.schema.name.as_str())
                .bind(floor)
                .execute(&self.pool)
                .await?;
        }

        tracing::debug!(table = %self.schema.name, next_id, "Id sequence advanced");
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

fn row_to_json(row: &SqliteRow) -> std::result::Result<QueryRow, sqlx::Error> {
    let mut map = Map::with_capacity(row.len());

    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;

        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_ascii_uppercase();
            match type_name.as_str() {
                "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" => {
                    Value::from(row.try_get_unchecked::<i64, _>(index)?)
                }
                "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => {
                    Value::from(row.try_get_unchecked::<f64, _>(index)?)
                }
                "BLOB" => Value::from(row.try_get_unchecked::<Vec<u8>, _>(index)?),
                _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
            }
        };

        map.insert(column.name().to_string(), value);
    }

    Ok(map)
}
