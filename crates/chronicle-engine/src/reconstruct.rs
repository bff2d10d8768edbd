//! Point-in-time reconstruction.
//!
//! The ledger records the *old* value of every changed column, so the value
//! of (row, column) at a past moment is the recorded old value of the
//! earliest update entry stamped after that moment — or, when no later
//! update exists, the live value. A moment older than the row's insert
//! entry yields "not found", never an error.

use chrono::{DateTime, Utc};
use chronicle_core::{
  entry::{ChangeEntry, RecordedValue},
  value::{Row, Value},
};
use rusqlite::OptionalExtension as _;

use crate::{
  Engine, Error, Result,
  encode::{encode_uid, from_sql, to_sql},
  ledger::{self, RecentChange},
  metadata, registry,
  sql::quote_ident,
};

impl Engine {
  // ── Column reconstruction ─────────────────────────────────────────────────

  /// The value of `column` for the row keyed by `key`, as it stood at
  /// `moment`. `Ok(None)` when the row did not exist yet (or at all);
  /// `moment >= now` yields the live value.
  pub fn value_at(
    &self,
    table: &str,
    key: &Value,
    column: &str,
    moment: DateTime<Utc>,
  ) -> Result<Option<Value>> {
    self.reconstruct_value(table, key, column, moment, false)
  }

  /// The value as it stood immediately *before* `moment` — entries stamped
  /// exactly at `moment` are treated as not yet applied.
  pub fn value_before(
    &self,
    table: &str,
    key: &Value,
    column: &str,
    moment: DateTime<Utc>,
  ) -> Result<Option<Value>> {
    self.reconstruct_value(table, key, column, moment, true)
  }

  /// The value as of `moment` once changes stamped at `moment` have
  /// applied. Alias of [`Engine::value_at`] under its conventional name.
  pub fn value_after(
    &self,
    table: &str,
    key: &Value,
    column: &str,
    moment: DateTime<Utc>,
  ) -> Result<Option<Value>> {
    self.value_at(table, key, column, moment)
  }

  fn reconstruct_value(
    &self,
    table: &str,
    key: &Value,
    column: &str,
    moment: DateTime<Utc>,
    before: bool,
  ) -> Result<Option<Value>> {
    let meta = self.metadata(table)?;
    if !meta.tracked {
      return Err(Error::NotTracked(table.to_owned()));
    }
    let Some(col_meta) = meta.column(column) else {
      return Err(Error::UnknownColumn {
        table:  table.to_owned(),
        column: column.to_owned(),
      });
    };
    let _pause = self.pause();

    let Some(uid) = self.find_uid(&meta, key)? else {
      return Ok(None);
    };
    if let Some(created) = ledger::creation(self.conn(), uid)? {
      let predates = if before { moment <= created.at } else { moment < created.at };
      if predates {
        return Ok(None);
      }
    }

    if let Some(cid) = col_meta.column_id {
      if let Some(entry) =
        ledger::earliest_update_after(self.conn(), uid, cid, moment, before)?
      {
        return Ok(Some(self.resolve_recorded(entry.value)?));
      }
    }
    // No later update (or the column is untracked and assumed constant):
    // the live value is the value at `moment`.
    self.live_value(&meta, key, column)
  }

  // ── Row reconstruction ────────────────────────────────────────────────────

  /// The whole row (or the requested `columns`) as it stood at `moment`.
  /// Untracked columns are taken live.
  pub fn row_at(
    &self,
    table: &str,
    key: &Value,
    moment: DateTime<Utc>,
    columns: Option<&[&str]>,
  ) -> Result<Option<Row>> {
    let meta = self.metadata(table)?;
    if !meta.tracked {
      return Err(Error::NotTracked(table.to_owned()));
    }
    if let Some(requested) = columns {
      for column in requested {
        if meta.column(column).is_none() {
          return Err(Error::UnknownColumn {
            table:  table.to_owned(),
            column: (*column).to_owned(),
          });
        }
      }
    }
    let _pause = self.pause();

    let Some(uid) = self.find_uid(&meta, key)? else {
      return Ok(None);
    };
    if let Some(created) = ledger::creation(self.conn(), uid)? {
      if moment < created.at {
        return Ok(None);
      }
    }
    let Some(live) = self.live_row(&meta, key)? else {
      return Ok(None);
    };

    let names: Vec<String> = match columns {
      Some(requested) => requested.iter().map(|c| (*c).to_owned()).collect(),
      None => meta
        .columns
        .iter()
        .filter(|c| Some(c.name.as_str()) != meta.uid_column.as_deref())
        .map(|c| c.name.clone())
        .collect(),
    };

    let mut out = Row::default();
    for name in names {
      let reconstructed = match meta.column_id(&name) {
        Some(cid) => {
          match ledger::earliest_update_after(self.conn(), uid, cid, moment, false)? {
            Some(entry) => Some(self.resolve_recorded(entry.value)?),
            None => None,
          }
        }
        None => None,
      };
      let value = match reconstructed {
        Some(v) => v,
        None => live.get(&name).cloned().unwrap_or(Value::Null),
      };
      out.push(name, value);
    }
    Ok(Some(out))
  }

  // ── Raw ledger queries ────────────────────────────────────────────────────

  /// Full change history for one row, oldest first.
  pub fn history(&self, table: &str, key: &Value) -> Result<Vec<ChangeEntry>> {
    let meta = self.metadata(table)?;
    if !meta.tracked {
      return Err(Error::NotTracked(table.to_owned()));
    }
    let _pause = self.pause();
    match self.find_uid(&meta, key)? {
      Some(uid) => ledger::history_for_uid(self.conn(), uid),
      None => Ok(Vec::new()),
    }
  }

  /// The row's first-seen record. Survives soft deletion.
  pub fn creation(&self, table: &str, key: &Value) -> Result<Option<ChangeEntry>> {
    let meta = self.metadata(table)?;
    if !meta.tracked {
      return Err(Error::NotTracked(table.to_owned()));
    }
    let _pause = self.pause();
    match self.find_uid(&meta, key)? {
      Some(uid) => ledger::creation(self.conn(), uid),
      None => Ok(None),
    }
  }

  /// Paginated listing of recently-touched rows, most recent first.
  pub fn recently_changed(
    &self,
    limit: usize,
    offset: usize,
  ) -> Result<Vec<RecentChange>> {
    let _pause = self.pause();
    ledger::recently_changed(self.conn(), limit, offset)
  }

  // ── Reference resolution ──────────────────────────────────────────────────

  /// A recorded reference resolves to the referenced row's current primary
  /// key; a dangling reference resolves to null.
  fn resolve_recorded(&self, value: RecordedValue) -> Result<Value> {
    let uid = match value {
      RecordedValue::Literal(v) => return Ok(v),
      RecordedValue::Reference(uid) => uid,
    };
    let Some(origin) = registry::origin(self.conn(), uid)? else {
      return Ok(Value::Null);
    };
    let Some(table) = metadata::table_name(self.conn(), origin)? else {
      return Ok(Value::Null);
    };
    let meta = self.metadata(&table)?;
    let (Some(pk), Some(uid_col)) =
      (meta.primary_key.as_deref(), meta.uid_column.as_deref())
    else {
      return Ok(Value::Null);
    };
    let resolved: Option<Value> = self
      .conn()
      .query_row(
        &format!(
          "SELECT {} FROM {} WHERE {} = ?1 LIMIT 1",
          quote_ident(pk),
          quote_ident(&meta.name),
          quote_ident(uid_col),
        ),
        [to_sql(&Value::Text(encode_uid(uid)))],
        |row| Ok(from_sql(row.get_ref(0)?)),
      )
      .optional()?;
    Ok(resolved.unwrap_or(Value::Null))
  }
}
