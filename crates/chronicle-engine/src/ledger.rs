//! Change ledger — the append-only `history` table and its read queries.

use chrono::{DateTime, Utc};
use chronicle_core::{
  entry::{ChangeEntry, ChangeOp, NewChangeEntry, RecordedValue},
  meta::ColumnId,
  uid::RowUid,
};
use rusqlite::{Connection, OptionalExtension as _};

use crate::{
  Result,
  encode::{decode_dt, decode_literal, decode_uid, encode_dt, encode_literal, encode_uid},
  schema::{HISTORY_TABLE, REGISTRY_TABLE, TABLES_CATALOG},
};

const ENTRY_COLUMNS: &str =
  "entry_id, op, uid, column_id, literal_value, reference_uid, at, user";

// ─── Raw row mapping ─────────────────────────────────────────────────────────

struct RawEntry {
  entry_id:  i64,
  op:        String,
  uid:       String,
  column_id: i64,
  literal:   Option<String>,
  reference: Option<String>,
  at:        String,
  user:      String,
}

impl RawEntry {
  fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      entry_id:  row.get(0)?,
      op:        row.get(1)?,
      uid:       row.get(2)?,
      column_id: row.get(3)?,
      literal:   row.get(4)?,
      reference: row.get(5)?,
      at:        row.get(6)?,
      user:      row.get(7)?,
    })
  }

  fn into_entry(self) -> Result<ChangeEntry> {
    let value = match (self.literal, self.reference) {
      (Some(l), None) => RecordedValue::Literal(decode_literal(&l)?),
      (None, Some(r)) => RecordedValue::Reference(decode_uid(&r)?),
      // The CHECK constraint makes this unreachable for rows the engine
      // wrote itself; guard against foreign tampering anyway.
      _ => return Err(chronicle_core::Error::MalformedEntry(self.entry_id).into()),
    };
    Ok(ChangeEntry {
      entry_id: self.entry_id,
      op: ChangeOp::parse(&self.op)?,
      uid: decode_uid(&self.uid)?,
      column_id: ColumnId(self.column_id),
      value,
      at: decode_dt(&self.at)?,
      user: self.user,
    })
  }
}

// ─── Append ──────────────────────────────────────────────────────────────────

/// Append one entry; returns its rowid. The ledger is never updated or
/// deleted outside the purge path.
pub fn append(
  conn: &Connection,
  entry: &NewChangeEntry,
  at: DateTime<Utc>,
  user: &str,
) -> Result<i64> {
  let (literal, reference) = match &entry.value {
    RecordedValue::Literal(v) => (Some(encode_literal(v)?), None),
    RecordedValue::Reference(uid) => (None, Some(encode_uid(*uid))),
  };
  conn.execute(
    &format!(
      "INSERT INTO {HISTORY_TABLE} (op, uid, column_id, literal_value, reference_uid, at, user)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
    ),
    rusqlite::params![
      entry.op.as_str(),
      encode_uid(entry.uid),
      entry.column_id.0,
      literal,
      reference,
      encode_dt(at),
      user,
    ],
  )?;
  Ok(conn.last_insert_rowid())
}

// ─── Reads ───────────────────────────────────────────────────────────────────

/// Full change history for one row, oldest first. Entry order for a
/// (uid, column) pair is (timestamp, rowid).
pub fn history_for_uid(conn: &Connection, uid: RowUid) -> Result<Vec<ChangeEntry>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {ENTRY_COLUMNS} FROM {HISTORY_TABLE}
     WHERE uid = ?1 ORDER BY at, entry_id"
  ))?;
  let raws: Vec<RawEntry> = stmt
    .query_map(rusqlite::params![encode_uid(uid)], RawEntry::from_row)?
    .collect::<rusqlite::Result<_>>()?;
  raws.into_iter().map(RawEntry::into_entry).collect()
}

/// The row's first-seen record: its earliest `insert` entry.
pub fn creation(conn: &Connection, uid: RowUid) -> Result<Option<ChangeEntry>> {
  conn
    .query_row(
      &format!(
        "SELECT {ENTRY_COLUMNS} FROM {HISTORY_TABLE}
         WHERE uid = ?1 AND op = 'insert' ORDER BY at, entry_id LIMIT 1"
      ),
      rusqlite::params![encode_uid(uid)],
      RawEntry::from_row,
    )
    .optional()?
    .map(RawEntry::into_entry)
    .transpose()
}

/// The earliest `update` entry for (uid, column) after `moment` — the entry
/// whose recorded old value was still current at `moment`. `inclusive`
/// widens the cut to entries stamped exactly at `moment`.
pub fn earliest_update_after(
  conn: &Connection,
  uid: RowUid,
  column: ColumnId,
  moment: DateTime<Utc>,
  inclusive: bool,
) -> Result<Option<ChangeEntry>> {
  let cmp = if inclusive { ">=" } else { ">" };
  conn
    .query_row(
      &format!(
        "SELECT {ENTRY_COLUMNS} FROM {HISTORY_TABLE}
         WHERE uid = ?1 AND column_id = ?2 AND op = 'update' AND at {cmp} ?3
         ORDER BY at, entry_id LIMIT 1"
      ),
      rusqlite::params![encode_uid(uid), column.0, encode_dt(moment)],
      RawEntry::from_row,
    )
    .optional()?
    .map(RawEntry::into_entry)
    .transpose()
}

// ─── Recently-touched listing ────────────────────────────────────────────────

/// One page entry of the recently-touched-row listing.
#[derive(Debug, Clone, PartialEq)]
pub struct RecentChange {
  pub uid:     RowUid,
  pub table:   String,
  pub last_at: DateTime<Utc>,
}

pub fn recently_changed(
  conn: &Connection,
  limit: usize,
  offset: usize,
) -> Result<Vec<RecentChange>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT h.uid, t.name, max(h.at) AS last_at
     FROM {HISTORY_TABLE} h
     JOIN {REGISTRY_TABLE} u ON u.uid = h.uid
     JOIN {TABLES_CATALOG} t ON t.table_id = u.origin_table_id
     GROUP BY h.uid
     ORDER BY last_at DESC
     LIMIT ?1 OFFSET ?2"
  ))?;
  let raws: Vec<(String, String, String)> = stmt
    .query_map(rusqlite::params![limit as i64, offset as i64], |row| {
      Ok((row.get(0)?, row.get(1)?, row.get(2)?))
    })?
    .collect::<rusqlite::Result<_>>()?;

  raws
    .into_iter()
    .map(|(uid, table, at)| {
      Ok(RecentChange {
        uid:     decode_uid(&uid)?,
        table,
        last_at: decode_dt(&at)?,
      })
    })
    .collect()
}

// ─── Purge ───────────────────────────────────────────────────────────────────

/// Drop every entry for a uid. Bypasses the append-only rule; only the
/// explicit purge path calls this.
pub fn purge_uid(conn: &Connection, uid: RowUid) -> Result<()> {
  conn.execute(
    &format!("DELETE FROM {HISTORY_TABLE} WHERE uid = ?1"),
    rusqlite::params![encode_uid(uid)],
  )?;
  Ok(())
}
