//! Error type for `chronicle-engine`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] chronicle_core::Error),

  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// The named table does not exist in the attached database.
  #[error("unknown table: {0:?}")]
  UnknownTable(String),

  /// The operation requires a tracked table.
  #[error("table {0:?} is not tracked")]
  NotTracked(String),

  #[error("unknown column {column:?} on table {table:?}")]
  UnknownColumn { table: String, column: String },

  #[error("table {0:?} has no single-column primary key")]
  NoPrimaryKey(String),

  #[error("timestamp parse error: {0}")]
  TimestampParse(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
