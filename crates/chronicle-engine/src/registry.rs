//! Row registry — per-uid active flag and origin-table pointer.
//!
//! The registry is flag-only: rows are inserted once, have their `active`
//! flag flipped by soft delete and restore, and are removed only by the
//! purge path.

use chronicle_core::{meta::TableId, uid::RowUid};
use rusqlite::{Connection, OptionalExtension as _};

use crate::{Result, encode::encode_uid, schema::REGISTRY_TABLE};

pub fn create(conn: &Connection, uid: RowUid, origin: TableId) -> Result<()> {
  conn.execute(
    &format!(
      "INSERT INTO {REGISTRY_TABLE} (uid, origin_table_id, active) VALUES (?1, ?2, 1)"
    ),
    rusqlite::params![encode_uid(uid), origin.0],
  )?;
  Ok(())
}

pub fn set_active(conn: &Connection, uid: RowUid, active: bool) -> Result<()> {
  conn.execute(
    &format!("UPDATE {REGISTRY_TABLE} SET active = ?1 WHERE uid = ?2"),
    rusqlite::params![active as i64, encode_uid(uid)],
  )?;
  Ok(())
}

/// `None` when the uid has no registry row at all.
pub fn is_active(conn: &Connection, uid: RowUid) -> Result<Option<bool>> {
  Ok(
    conn
      .query_row(
        &format!("SELECT active FROM {REGISTRY_TABLE} WHERE uid = ?1"),
        rusqlite::params![encode_uid(uid)],
        |row| row.get::<_, i64>(0),
      )
      .optional()?
      .map(|a| a != 0),
  )
}

pub fn origin(conn: &Connection, uid: RowUid) -> Result<Option<TableId>> {
  Ok(
    conn
      .query_row(
        &format!("SELECT origin_table_id FROM {REGISTRY_TABLE} WHERE uid = ?1"),
        rusqlite::params![encode_uid(uid)],
        |row| row.get::<_, i64>(0),
      )
      .optional()?
      .map(TableId),
  )
}

/// Hard removal; only the purge path calls this.
pub fn remove(conn: &Connection, uid: RowUid) -> Result<()> {
  conn.execute(
    &format!("DELETE FROM {REGISTRY_TABLE} WHERE uid = ?1"),
    rusqlite::params![encode_uid(uid)],
  )?;
  Ok(())
}
