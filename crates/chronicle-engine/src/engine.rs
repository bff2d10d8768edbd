//! [`Engine`] — the engine facade.
//!
//! One engine instance is constructed per process (or per unit of work) and
//! passed by reference to collaborators; there is no global state. The
//! instance owns the connection, the enabled flag, the re-entrancy depth
//! counter, the acting user, the as-of clock, and the metadata cache.
//! Interior mutability keeps the public API `&self`; the type is `!Sync`,
//! matching the one-logical-writer contract.

use std::{
  cell::{Cell, RefCell},
  collections::HashMap,
  path::Path,
  rc::Rc,
};

use chrono::{DateTime, Utc};
use chronicle_core::{
  meta::TableMetadata,
  query::{HookOutcome, Query},
  uid::RowUid,
  value::{Row, Value},
};
use rusqlite::{Connection, OptionalExtension as _};

use crate::{
  Error, Result,
  encode::{decode_uid, from_sql, to_sql},
  ledger, metadata, registry,
  schema::SCHEMA,
  sql::{self, quote_ident},
};

// ─── Result of an executed query ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Exec {
  Rows(Vec<Row>),
  Affected(usize),
}

impl Exec {
  pub fn rows(self) -> Vec<Row> {
    match self {
      Self::Rows(rows) => rows,
      Self::Affected(_) => Vec::new(),
    }
  }

  pub fn affected(&self) -> usize {
    match self {
      Self::Rows(_) => 0,
      Self::Affected(n) => *n,
    }
  }
}

// ─── Pause guard ─────────────────────────────────────────────────────────────

/// Scoped suspension of interception, used around every internal
/// self-query. Nestable: the depth counter is decremented on drop, on every
/// exit path, so composed internal calls cannot prematurely re-enable
/// interception mid-operation.
pub struct InterceptPause<'e> {
  depth: &'e Cell<u32>,
}

impl Drop for InterceptPause<'_> {
  fn drop(&mut self) {
    self.depth.set(self.depth.get() - 1);
  }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct Engine {
  conn:     Connection,
  enabled:  Cell<bool>,
  depth:    Cell<u32>,
  user:     RefCell<String>,
  as_of:    Cell<Option<DateTime<Utc>>>,
  last_key: Cell<i64>,
  metadata: RefCell<HashMap<String, Rc<TableMetadata>>>,
}

impl Engine {
  /// Open (or create) a database at `path` and run schema initialisation.
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    Self::from_connection(Connection::open(path)?)
  }

  /// Open an in-memory database — useful for testing.
  pub fn open_in_memory() -> Result<Self> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn.execute_batch(SCHEMA)?;
    Ok(Self {
      conn,
      enabled: Cell::new(true),
      depth: Cell::new(0),
      user: RefCell::new("system".to_owned()),
      as_of: Cell::new(None),
      last_key: Cell::new(0),
      metadata: RefCell::new(HashMap::new()),
    })
  }

  /// Run raw DDL/SQL directly, bypassing interception. Intended for host
  /// schema setup; ordinary traffic goes through [`Engine::execute`].
  pub fn batch(&self, sql: &str) -> Result<()> {
    self.conn.execute_batch(sql)?;
    Ok(())
  }

  pub(crate) fn conn(&self) -> &Connection { &self.conn }

  /// Generated key of the most recent insert executed through
  /// [`Engine::execute`]. Captured before the after-phase bookkeeping
  /// writes, which overwrite the connection-level rowid.
  pub fn last_insert_rowid(&self) -> i64 { self.last_key.get() }

  // ── Interception state ────────────────────────────────────────────────────

  pub fn enable(&self) { self.enabled.set(true); }

  pub fn disable(&self) { self.enabled.set(false); }

  pub fn is_enabled(&self) -> bool { self.enabled.get() }

  /// Suspend interception for the returned guard's lifetime.
  pub fn pause(&self) -> InterceptPause<'_> {
    self.depth.set(self.depth.get() + 1);
    InterceptPause { depth: &self.depth }
  }

  pub(crate) fn intercepting(&self) -> bool {
    self.enabled.get() && self.depth.get() == 0
  }

  // ── Acting user and as-of clock ───────────────────────────────────────────

  pub fn set_user(&self, user: impl Into<String>) {
    *self.user.borrow_mut() = user.into();
  }

  pub fn user(&self) -> String { self.user.borrow().clone() }

  /// Override the ledger clock, e.g. for backfills. A future timestamp is
  /// clamped to real time at write.
  pub fn set_as_of(&self, at: DateTime<Utc>) { self.as_of.set(Some(at)); }

  pub fn clear_as_of(&self) { self.as_of.set(None); }

  pub fn as_of(&self) -> Option<DateTime<Utc>> { self.as_of.get() }

  /// The timestamp ledger writes carry right now.
  pub(crate) fn effective_now(&self) -> DateTime<Utc> {
    let now = Utc::now();
    match self.as_of.get() {
      Some(at) if at < now => at,
      _ => now,
    }
  }

  // ── Metadata ──────────────────────────────────────────────────────────────

  pub(crate) fn metadata(&self, table: &str) -> Result<Rc<TableMetadata>> {
    if let Some(meta) = self.metadata.borrow().get(table) {
      return Ok(meta.clone());
    }
    let meta = Rc::new(metadata::discover(&self.conn, table)?);
    self
      .metadata
      .borrow_mut()
      .insert(table.to_owned(), meta.clone());
    Ok(meta)
  }

  pub fn table_metadata(&self, table: &str) -> Result<Rc<TableMetadata>> {
    self.metadata(table)
  }

  /// Whether the table participates in soft delete and audit logging.
  pub fn has_history(&self, table: &str) -> Result<bool> {
    Ok(self.metadata(table)?.tracked)
  }

  /// Drop the metadata cache; the next lookup re-discovers from the schema.
  pub fn refresh_metadata(&self) {
    self.metadata.borrow_mut().clear();
  }

  // ── Executor ──────────────────────────────────────────────────────────────

  /// Run a query through the interceptor hook pair.
  pub fn execute(&self, query: Query) -> Result<Exec> {
    let intercept = self.before_hook(&query)?;
    let effective = match &intercept.outcome {
      HookOutcome::Unchanged => Some(&query),
      HookOutcome::Replaced(q) => Some(q),
      HookOutcome::Suppressed => None,
    };

    if matches!(query, Query::Select(_)) {
      // Reads have no after phase; a read is never suppressed.
      return self.fetch(effective.unwrap_or(&query));
    }

    let mut affected = intercept.affected.unwrap_or(0);
    let mut generated_key = None;
    if let Some(q) = effective {
      let (text, params) = sql::render(q);
      affected = self.conn.execute(&text, rusqlite::params_from_iter(params))?;
      if matches!(q, Query::Insert(_)) {
        let key = self.conn.last_insert_rowid();
        self.last_key.set(key);
        generated_key = Some(key);
      }
    }

    // The primary write is committed; bookkeeping failures past this point
    // are logged, never propagated.
    self.after_hook(intercept, generated_key);
    Ok(Exec::Affected(affected))
  }

  pub(crate) fn fetch(&self, query: &Query) -> Result<Exec> {
    let (text, params) = sql::render(query);
    let mut stmt = self.conn.prepare(&text)?;
    let names: Vec<String> =
      stmt.column_names().iter().map(|n| n.to_string()).collect();
    let rows = stmt
      .query_map(rusqlite::params_from_iter(params), |row| {
        let mut cells = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
          cells.push((name.clone(), from_sql(row.get_ref(i)?)));
        }
        Ok(Row::new(cells))
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Exec::Rows(rows))
  }

  // ── Internal row access (callers hold a pause) ────────────────────────────

  /// Resolve a tracked row's uid from its primary-key value. `None` when no
  /// such row exists or the row predates the engine (NULL uid).
  pub(crate) fn find_uid(
    &self,
    meta: &TableMetadata,
    key: &Value,
  ) -> Result<Option<RowUid>> {
    let (Some(pk), Some(uid_col)) = (&meta.primary_key, &meta.uid_column)
    else {
      return Err(Error::NotTracked(meta.name.clone()));
    };
    let raw: Option<Option<String>> = self
      .conn
      .query_row(
        &format!(
          "SELECT {} FROM {} WHERE {} = ?1 LIMIT 1",
          quote_ident(uid_col),
          quote_ident(&meta.name),
          quote_ident(pk),
        ),
        [to_sql(key)],
        |row| row.get(0),
      )
      .optional()?;
    raw.flatten().as_deref().map(decode_uid).transpose()
  }

  /// Current value of one column of the physical row, soft-deleted or not.
  pub(crate) fn live_value(
    &self,
    meta: &TableMetadata,
    key: &Value,
    column: &str,
  ) -> Result<Option<Value>> {
    let Some(pk) = &meta.primary_key else {
      return Err(Error::NoPrimaryKey(meta.name.clone()));
    };
    Ok(
      self
        .conn
        .query_row(
          &format!(
            "SELECT {} FROM {} WHERE {} = ?1 LIMIT 1",
            quote_ident(column),
            quote_ident(&meta.name),
            quote_ident(pk),
          ),
          [to_sql(key)],
          |row| Ok(from_sql(row.get_ref(0)?)),
        )
        .optional()?,
    )
  }

  /// The full physical row, soft-deleted or not.
  pub(crate) fn live_row(
    &self,
    meta: &TableMetadata,
    key: &Value,
  ) -> Result<Option<Row>> {
    let Some(pk) = &meta.primary_key else {
      return Err(Error::NoPrimaryKey(meta.name.clone()));
    };
    let mut stmt = self.conn.prepare(&format!(
      "SELECT * FROM {} WHERE {} = ?1 LIMIT 1",
      quote_ident(&meta.name),
      quote_ident(pk),
    ))?;
    let names: Vec<String> =
      stmt.column_names().iter().map(|n| n.to_string()).collect();
    Ok(
      stmt
        .query_row([to_sql(key)], |row| {
          let mut cells = Vec::with_capacity(names.len());
          for (i, name) in names.iter().enumerate() {
            cells.push((name.clone(), from_sql(row.get_ref(i)?)));
          }
          Ok(Row::new(cells))
        })
        .optional()?,
    )
  }

  // ── Purge ─────────────────────────────────────────────────────────────────

  /// Hard removal of one row: physical row, registry row, and every ledger
  /// entry. Bypasses the ledger entirely; nothing about the purge itself is
  /// recorded.
  pub fn purge(&self, table: &str, key: &Value) -> Result<()> {
    let meta = self.metadata(table)?;
    if !meta.tracked {
      return Err(Error::NotTracked(table.to_owned()));
    }
    let _pause = self.pause();

    if let Some(uid) = self.find_uid(&meta, key)? {
      ledger::purge_uid(&self.conn, uid)?;
      registry::remove(&self.conn, uid)?;
    }
    let pk = meta
      .primary_key
      .as_deref()
      .ok_or_else(|| Error::NoPrimaryKey(table.to_owned()))?;
    self.conn.execute(
      &format!(
        "DELETE FROM {} WHERE {} = ?1",
        quote_ident(&meta.name),
        quote_ident(pk),
      ),
      [to_sql(key)],
    )?;
    Ok(())
  }
}
