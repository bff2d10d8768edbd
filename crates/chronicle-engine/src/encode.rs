//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings with microsecond precision — sub-second
//! resolution is required because several entries can legitimately share a
//! wall-clock second, and the fixed-width UTC form keeps lexicographic and
//! chronological order identical. Uids are hyphenated lowercase UUID
//! strings. Literal values are compact JSON.

use chrono::{DateTime, SecondsFormat, Utc};
use chronicle_core::{uid::RowUid, value::Value};
use rusqlite::types::{Value as SqlValue, ValueRef};

use crate::{Error, Result};

// ─── RowUid ──────────────────────────────────────────────────────────────────

pub fn encode_uid(uid: RowUid) -> String { uid.to_string() }

pub fn decode_uid(s: &str) -> Result<RowUid> { Ok(RowUid::parse(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::TimestampParse(e.to_string()))
}

// ─── Literal values ──────────────────────────────────────────────────────────

pub fn encode_literal(v: &Value) -> Result<String> {
  Ok(serde_json::to_string(v)?)
}

pub fn decode_literal(s: &str) -> Result<Value> {
  Ok(serde_json::from_str(s)?)
}

// ─── Value ↔ SQLite ──────────────────────────────────────────────────────────

pub fn to_sql(v: &Value) -> SqlValue {
  match v {
    Value::Null => SqlValue::Null,
    Value::Integer(i) => SqlValue::Integer(*i),
    Value::Real(r) => SqlValue::Real(*r),
    Value::Text(s) => SqlValue::Text(s.clone()),
    Value::Blob(b) => SqlValue::Blob(b.clone()),
  }
}

pub fn from_sql(v: ValueRef<'_>) -> Value {
  match v {
    ValueRef::Null => Value::Null,
    ValueRef::Integer(i) => Value::Integer(i),
    ValueRef::Real(r) => Value::Real(r),
    ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
    ValueRef::Blob(b) => Value::Blob(b.to_vec()),
  }
}
