//! Mutation intents and statement classification.
//!
//! Only the *intent* of a statement matters to the consistency layer: which
//! table it touched and whether it inserted, updated or deleted. Callers can
//! state that intent explicitly; otherwise it is sniffed from the SQL text.
//!
//! Sniffing is shallow. Subqueries and multi-table statements can
//! name several tables, and only the first match of `INTO x`, `UPDATE x` or
//! `FROM x` (in that priority) is reported.

use crate::TableName;
use serde::{Deserialize, Serialize};

/// Table reported when a mutating statement names no recognizable table.
pub const UNKNOWN_TABLE: &str = "unknown";

/// Kind of a statement, by its leading verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
    /// Reads, DDL and anything else that does not replicate
    Other,
}

impl StatementKind {
    /// The replicated action for a mutating kind.
    pub fn action(&self) -> Option<Action> {
        match self {
            StatementKind::Insert => Some(Action::Insert),
            StatementKind::Update => Some(Action::Update),
            StatementKind::Delete => Some(Action::Delete),
            StatementKind::Other => None,
        }
    }

    /// Whether statements of this kind change replicated state.
    pub fn is_mutating(&self) -> bool {
        self.action().is_some()
    }
}

/// A replicated change action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Insert => write!(f, "insert"),
            Action::Update => write!(f, "update"),
            Action::Delete => write!(f, "delete"),
        }
    }
}

/// What a mutating statement did: the table and the action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationIntent {
    /// Target table, or [`UNKNOWN_TABLE`]
    pub table: TableName,
    /// Change action
    pub action: Action,
}

impl MutationIntent {
    /// Create an explicit intent.
    pub fn new(table: impl Into<TableName>, action: Action) -> Self {
        Self {
            table: table.into(),
            action,
        }
    }

    /// Infer the intent of a statement from its text.
    ///
    /// Returns `None` for non-mutating statements. A mutating statement with
    /// no recognizable table is tagged with [`UNKNOWN_TABLE`] rather than
    /// dropped.
    pub fn infer(sql: &str) -> Option<Self> {
        let action = classify(sql).action()?;
        let table = target_table(sql).unwrap_or_else(|| UNKNOWN_TABLE.to_string());
        Some(Self { table, action })
    }

    /// Whether the table could not be determined.
    pub fn is_unknown_table(&self) -> bool {
        self.table == UNKNOWN_TABLE
    }
}

/// Classify a statement by its leading verb.
pub fn classify(sql: &str) -> StatementKind {
    let verb = sql
        .split(|c: char| c.is_whitespace() || c == '(')
        .find(|s| !s.is_empty())
        .unwrap_or_default();

    if verb.eq_ignore_ascii_case("insert") {
        StatementKind::Insert
    } else if verb.eq_ignore_ascii_case("update") {
        StatementKind::Update
    } else if verb.eq_ignore_ascii_case("delete") {
        StatementKind::Delete
    } else {
        StatementKind::Other
    }
}

/// Extract the table a statement targets.
///
/// Looks for the first `INTO x`, then `UPDATE x`, then `FROM x`. Quotes and
/// brackets around the name are stripped; a schema qualifier is kept.
pub fn target_table(sql: &str) -> Option<TableName> {
    let tokens: Vec<&str> = sql.split_whitespace().collect();

    ["into", "update", "from"].iter().find_map(|keyword| {
        tokens
            .windows(2)
            .find(|pair| pair[0].eq_ignore_ascii_case(keyword))
            .and_then(|pair| table_name(pair[1]))
    })
}

fn table_name(token: &str) -> Option<TableName> {
    let name: String = token
        .trim_start_matches(['"', '`', '['])
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.'))
        .collect();

    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}
