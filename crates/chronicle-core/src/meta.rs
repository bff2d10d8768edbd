//! Typed table metadata.
//!
//! Trackedness, primary keys, and stable column ids are discovered from the
//! database schema and carried in these records — there is no map-driven
//! field-name configuration. Validation happens at discovery time; a column
//! that could not be given a stable id is simply excluded from tracking.

use std::fmt;

use serde::{Deserialize, Serialize};

// ─── Catalog ids ─────────────────────────────────────────────────────────────

/// Stable id of a tracked table in the engine's catalog.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TableId(pub i64);

/// Stable id of a (table, column) pair in the engine's catalog. Ledger
/// entries reference columns by this id, never by name.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ColumnId(pub i64);

impl fmt::Display for TableId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl fmt::Display for ColumnId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

// ─── Column metadata ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
  pub name:       String,
  /// `None` when no stable id could be allocated; such a column is excluded
  /// from tracking but writes to it still succeed.
  pub column_id:  Option<ColumnId>,
  /// Target table when this column is a single-column foreign key into
  /// another table. Old values of such columns are recorded as uid
  /// references when the target is tracked.
  pub references: Option<String>,
}

// ─── Table metadata ──────────────────────────────────────────────────────────

/// Everything the engine knows about one logical table, cached per engine
/// instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
  pub name:        String,
  /// Catalog id; present only for tracked tables.
  pub table_id:    Option<TableId>,
  /// A table is tracked iff it is linked to the registry table by a
  /// single-column foreign key on its uid column and has a single-column
  /// primary key.
  pub tracked:     bool,
  pub primary_key: Option<String>,
  /// Name of the column holding the row uid, when tracked.
  pub uid_column:  Option<String>,
  pub columns:     Vec<ColumnMeta>,
  /// Column tuples covered by unique indexes, used to match re-inserts of
  /// soft-deleted rows that do not supply the primary key.
  pub unique_keys: Vec<Vec<String>>,
}

impl TableMetadata {
  pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
    self.columns.iter().find(|c| c.name == name)
  }

  pub fn column_id(&self, name: &str) -> Option<ColumnId> {
    self.column(name).and_then(|c| c.column_id)
  }

  /// The primary key's stable column id, when both exist.
  pub fn primary_key_id(&self) -> Option<ColumnId> {
    self.primary_key.as_deref().and_then(|pk| self.column_id(pk))
  }
}
