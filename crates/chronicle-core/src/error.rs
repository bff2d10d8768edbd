//! Error types for `chronicle-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid row uid: {0:?}")]
  InvalidUid(String),

  #[error("unknown change operation: {0:?}")]
  UnknownOp(String),

  /// A stored ledger entry violated the literal-xor-reference rule.
  #[error("change entry {0} carries neither or both of literal and reference")]
  MalformedEntry(i64),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
