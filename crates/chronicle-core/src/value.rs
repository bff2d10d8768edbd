//! Dynamic values and rows for the generic query surface.
//!
//! The host query layer works with arbitrary tables, so cell values are a
//! small dynamic enum mirroring SQLite's storage classes rather than typed
//! domain records.

use serde::{Deserialize, Serialize};

// ─── Value ───────────────────────────────────────────────────────────────────

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
  Null,
  Integer(i64),
  Real(f64),
  Text(String),
  Blob(Vec<u8>),
}

impl Value {
  pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

  pub fn as_integer(&self) -> Option<i64> {
    match self {
      Self::Integer(i) => Some(*i),
      _ => None,
    }
  }

  pub fn as_text(&self) -> Option<&str> {
    match self {
      Self::Text(s) => Some(s),
      _ => None,
    }
  }
}

impl From<i64> for Value {
  fn from(i: i64) -> Self { Self::Integer(i) }
}

impl From<f64> for Value {
  fn from(r: f64) -> Self { Self::Real(r) }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self { Self::Text(s.to_owned()) }
}

impl From<String> for Value {
  fn from(s: String) -> Self { Self::Text(s) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(v: Option<T>) -> Self {
    match v {
      Some(v) => v.into(),
      None => Self::Null,
    }
  }
}

// ─── Row ─────────────────────────────────────────────────────────────────────

/// An ordered set of named cells, as returned by the executor and by row
/// reconstruction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Row {
  cells: Vec<(String, Value)>,
}

impl Row {
  pub fn new(cells: Vec<(String, Value)>) -> Self { Self { cells } }

  pub fn get(&self, column: &str) -> Option<&Value> {
    self
      .cells
      .iter()
      .find(|(name, _)| name == column)
      .map(|(_, v)| v)
  }

  pub fn push(&mut self, column: impl Into<String>, value: Value) {
    self.cells.push((column.into(), value));
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
    self.cells.iter().map(|(n, v)| (n.as_str(), v))
  }

  pub fn len(&self) -> usize { self.cells.len() }

  pub fn is_empty(&self) -> bool { self.cells.is_empty() }
}
