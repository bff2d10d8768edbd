//! Change-ledger entry types.
//!
//! A change entry is an immutable record of one operation on one column of
//! one tracked row. Entries are never updated or deleted; the only way out
//! of the ledger is the explicit purge path, which bypasses it entirely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, meta::ColumnId, uid::RowUid, value::Value};

// ─── Operation ───────────────────────────────────────────────────────────────

/// The kind of change an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
  /// The row's first appearance. Exactly one per live tracked row.
  Insert,
  /// A column changed; the entry records the *old* value.
  Update,
  /// The row was soft-deleted (active flag cleared).
  Delete,
  /// A previously deleted row was brought back by a matching insert.
  /// Logged instead of a second `Insert`.
  Restore,
}

impl ChangeOp {
  /// The discriminant string stored in the `op` column.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Insert => "insert",
      Self::Update => "update",
      Self::Delete => "delete",
      Self::Restore => "restore",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "insert" => Ok(Self::Insert),
      "update" => Ok(Self::Update),
      "delete" => Ok(Self::Delete),
      "restore" => Ok(Self::Restore),
      other => Err(Error::UnknownOp(other.to_owned())),
    }
  }
}

// ─── Recorded value ──────────────────────────────────────────────────────────

/// The payload of a change entry: exactly one of a literal value or a
/// reference to another tracked row. The enum makes the
/// neither-nor-both case unrepresentable; decoding from storage validates
/// it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum RecordedValue {
  /// A plain old value, stored as JSON text.
  Literal(Value),
  /// The uid of the tracked row the old value pointed at. Used for columns
  /// that are foreign keys into another tracked table, so the ledger stays
  /// valid across key rewrites there.
  Reference(RowUid),
}

// ─── Entries ─────────────────────────────────────────────────────────────────

/// A persisted ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
  pub entry_id:  i64,
  pub op:        ChangeOp,
  pub uid:       RowUid,
  pub column_id: ColumnId,
  pub value:     RecordedValue,
  /// Ledger timestamp, microsecond resolution. Ties for a (uid, column)
  /// pair are broken by `entry_id` order.
  pub at:        DateTime<Utc>,
  pub user:      String,
}

/// Input to the ledger's append operation. The timestamp and acting user
/// are filled in by the engine; callers never supply them.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChangeEntry {
  pub op:        ChangeOp,
  pub uid:       RowUid,
  pub column_id: ColumnId,
  pub value:     RecordedValue,
}
