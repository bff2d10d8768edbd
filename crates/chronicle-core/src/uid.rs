//! [`RowUid`] — the opaque per-row identifier.
//!
//! A uid is assigned once, on the row's first insert into a tracked table,
//! and never changes for the row's lifetime. It is independent of the
//! table's native primary key, so registry and ledger entries survive key
//! rewrites in the origin table.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Opaque, fixed-format row identifier. Stored as a hyphenated lowercase
/// UUID string in the database.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RowUid(Uuid);

impl RowUid {
  /// Mint a fresh uid for a newly inserted row.
  pub fn generate() -> Self { Self(Uuid::new_v4()) }

  pub fn parse(s: &str) -> Result<Self> {
    Uuid::parse_str(s)
      .map(Self)
      .map_err(|_| Error::InvalidUid(s.to_owned()))
  }

  pub fn as_uuid(&self) -> Uuid { self.0 }
}

impl fmt::Display for RowUid {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0.hyphenated())
  }
}
