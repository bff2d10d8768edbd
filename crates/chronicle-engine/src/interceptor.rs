//! The query interceptor — the before/after hook pair around every query.
//!
//! The before phase rewrites reads to hide soft-deleted rows, turns deletes
//! into active-flag flips, turns matching re-inserts into restores, and
//! queues ledger entries describing the change. The after phase, once the
//! primary write has committed and any generated key is known, creates
//! registry rows and flushes the queued entries. After-phase failures are
//! logged and absorbed: the primary write is already committed, so the
//! audit trail accepts an eventual-consistency gap rather than rolling it
//! back.

use chronicle_core::{
  entry::{ChangeOp, NewChangeEntry, RecordedValue},
  meta::{ColumnId, ColumnMeta, TableId, TableMetadata},
  query::{
    ColumnRef, DeleteQuery, Filter, HookOutcome, InsertQuery, Join, Operand,
    Query, SelectQuery, UpdateQuery,
  },
  uid::RowUid,
  value::{Row, Value},
};
use tracing::{debug, warn};

use crate::{
  Engine, Result,
  encode::{decode_uid, encode_uid},
  ledger, registry,
  schema::REGISTRY_TABLE,
  sql::{self, quote_ident},
};

// ─── Queued work ─────────────────────────────────────────────────────────────

/// A ledger entry queued by the before phase, flushed in the after phase.
pub(crate) struct PendingEntry {
  pub op:        ChangeOp,
  pub uid:       RowUid,
  pub column_id: ColumnId,
  /// `None` until the insert's generated key is known.
  pub value:     Option<RecordedValue>,
}

/// A registry row to create once a fresh insert has committed.
pub(crate) struct PendingRow {
  pub uid:    RowUid,
  pub origin: TableId,
}

/// The before phase's full answer: the hook outcome plus queued work for
/// the after phase.
pub(crate) struct Intercept {
  pub outcome:  HookOutcome,
  pub pending:  Vec<PendingEntry>,
  pub new_row:  Option<PendingRow>,
  /// Row count to report when the original statement was suppressed.
  pub affected: Option<usize>,
}

impl Intercept {
  fn passthrough() -> Self {
    Self {
      outcome:  HookOutcome::Unchanged,
      pending:  Vec::new(),
      new_row:  None,
      affected: None,
    }
  }
}

// ─── Hooks ───────────────────────────────────────────────────────────────────

impl Engine {
  pub(crate) fn before_hook(&self, query: &Query) -> Result<Intercept> {
    if !self.intercepting() {
      return Ok(Intercept::passthrough());
    }
    match query {
      Query::Select(q) => self.rewrite_select(q),
      Query::Insert(q) => self.intercept_insert(q),
      Query::Update(q) => self.intercept_update(q),
      Query::Delete(q) => self.intercept_delete(q),
    }
  }

  /// Flush queued bookkeeping after the primary write has executed.
  /// Failures here are warnings, never errors.
  pub(crate) fn after_hook(
    &self,
    intercept: Intercept,
    generated_key: Option<i64>,
  ) {
    let Intercept { pending, new_row, .. } = intercept;
    if pending.is_empty() && new_row.is_none() {
      return;
    }
    let _pause = self.pause();
    let at = self.effective_now();
    let user = self.user();

    if let Some(row) = new_row {
      if let Err(e) = registry::create(self.conn(), row.uid, row.origin) {
        warn!(uid = %row.uid, error = %e, "registry write failed after commit; audit gap");
      }
    }

    for entry in pending {
      let value = match entry.value {
        Some(v) => v,
        None => match generated_key {
          Some(k) => RecordedValue::Literal(Value::Integer(k)),
          None => {
            warn!(uid = %entry.uid, "queued entry has no generated key; dropped");
            continue;
          }
        },
      };
      let entry = NewChangeEntry {
        op: entry.op,
        uid: entry.uid,
        column_id: entry.column_id,
        value,
      };
      if let Err(e) = ledger::append(self.conn(), &entry, at, &user) {
        warn!(uid = %entry.uid, error = %e, "ledger write failed after commit; audit gap");
      }
    }
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  /// Hide soft-deleted rows by joining the registry on `active = 1`, once
  /// per tracked table the select touches, base and joined alike.
  fn rewrite_select(&self, q: &SelectQuery) -> Result<Intercept> {
    let mut touched: Vec<(String, String)> =
      vec![(q.base_name().to_owned(), q.table.clone())];
    for join in &q.joins {
      if join.table != REGISTRY_TABLE {
        touched.push((join.name().to_owned(), join.table.clone()));
      }
    }

    let mut rewritten = q.clone();
    let mut injected = false;
    for (name, table) in touched {
      let meta = self.metadata(&table)?;
      let (true, Some(uid_col)) = (meta.tracked, meta.uid_column.as_deref())
      else {
        continue;
      };

      // An equivalent registry join may already be present.
      let already_joined = rewritten
        .joins
        .iter()
        .any(|j| j.table == REGISTRY_TABLE && j.on.mentions(&name, uid_col));
      if already_joined {
        continue;
      }

      let mut alias = format!("{name}_uids");
      while alias == rewritten.base_name()
        || rewritten.joins.iter().any(|j| j.name() == alias)
      {
        alias.push('_');
      }

      let on = Filter::Eq(
        ColumnRef::qualified(alias.clone(), "uid"),
        Operand::Column(ColumnRef::qualified(name.clone(), uid_col)),
      )
      .and(Filter::Eq(
        ColumnRef::qualified(alias.clone(), "active"),
        Operand::Value(Value::Integer(1)),
      ));

      if rewritten.columns.is_empty() {
        // Keep the select list scoped to the query's own tables so registry
        // columns don't leak into the result.
        rewritten.columns = std::iter::once(q.base_name())
          .chain(
            q.joins
              .iter()
              .filter(|j| j.table != REGISTRY_TABLE)
              .map(|j| j.name()),
          )
          .map(|n| format!("{}.*", quote_ident(n)))
          .collect();
      }
      rewritten.joins.push(Join {
        table: REGISTRY_TABLE.to_owned(),
        alias: Some(alias),
        on,
      });
      injected = true;
    }

    if !injected {
      return Ok(Intercept::passthrough());
    }
    debug!(table = %q.table, "injected registry joins");
    Ok(Intercept {
      outcome: HookOutcome::Replaced(Query::Select(rewritten)),
      ..Intercept::passthrough()
    })
  }

  // ── Inserts ───────────────────────────────────────────────────────────────

  fn intercept_insert(&self, q: &InsertQuery) -> Result<Intercept> {
    let meta = self.metadata(&q.table)?;
    let (Some(pk), Some(uid_col), Some(table_id)) =
      (meta.primary_key.as_deref(), meta.uid_column.as_deref(), meta.table_id)
    else {
      return Ok(Intercept::passthrough());
    };

    // A matching soft-deleted row turns this insert into a restore.
    if let Some((uid, existing)) = self.restore_probe(&meta, q)? {
      if registry::is_active(self.conn(), uid)? == Some(false) {
        return self.restore_insert(&meta, q, uid, existing);
      }
      // Active twin: let the insert run and fail on its own constraints.
    }

    let mut pending = Vec::new();
    let (uid, rewritten) = match q.value_of(uid_col) {
      // A caller-supplied uid is respected (backfill tooling).
      Some(Value::Text(s)) => (decode_uid(s)?, None),
      _ => {
        let uid = RowUid::generate();
        let mut rewritten = q.clone();
        rewritten.columns.push(uid_col.to_owned());
        rewritten.values.push(Value::Text(encode_uid(uid)));
        (uid, Some(rewritten))
      }
    };

    match meta.primary_key_id() {
      Some(cid) => pending.push(PendingEntry {
        op: ChangeOp::Insert,
        uid,
        column_id: cid,
        // Finalized with the generated key if the caller didn't supply one.
        value: q.value_of(pk).cloned().map(RecordedValue::Literal),
      }),
      None => warn!(table = %meta.name, "primary key has no column id; insert not logged"),
    }

    Ok(Intercept {
      outcome: match rewritten {
        Some(r) => HookOutcome::Replaced(Query::Insert(r)),
        None => HookOutcome::Unchanged,
      },
      pending,
      new_row: Some(PendingRow { uid, origin: table_id }),
      affected: None,
    })
  }

  /// Look for an existing physical row matching the insert's key — the
  /// caller-supplied primary key first, then any fully-supplied unique
  /// tuple. Returns the row's uid and current values.
  fn restore_probe(
    &self,
    meta: &TableMetadata,
    q: &InsertQuery,
  ) -> Result<Option<(RowUid, Row)>> {
    let _pause = self.pause();
    let (Some(pk), Some(uid_col)) =
      (meta.primary_key.as_deref(), meta.uid_column.as_deref())
    else {
      return Ok(None);
    };

    let mut candidates: Vec<Filter> = Vec::new();
    if let Some(v) = q.value_of(pk) {
      candidates.push(Filter::eq(pk, v.clone()));
    }
    for tuple in &meta.unique_keys {
      let supplied: Option<Vec<(&String, &Value)>> =
        tuple.iter().map(|c| q.value_of(c).map(|v| (c, v))).collect();
      let Some(supplied) = supplied else { continue };
      let mut parts = supplied.into_iter();
      let Some((col, value)) = parts.next() else { continue };
      let mut filter = Filter::eq(col.clone(), value.clone());
      for (col, value) in parts {
        filter = filter.and(Filter::eq(col.clone(), value.clone()));
      }
      candidates.push(filter);
    }

    for filter in candidates {
      let probe = SelectQuery::from(meta.name.clone()).with_filter(filter);
      let rows = self.fetch(&Query::Select(probe))?.rows();
      let Some(row) = rows.into_iter().next() else { continue };
      let Some(Value::Text(raw)) = row.get(uid_col).cloned() else { continue };
      return Ok(Some((decode_uid(&raw)?, row)));
    }
    Ok(None)
  }

  /// Revive a soft-deleted row in place of a physical insert: apply only
  /// the changed columns, flip the active flag, and log a restore (never a
  /// second insert).
  fn restore_insert(
    &self,
    meta: &TableMetadata,
    q: &InsertQuery,
    uid: RowUid,
    existing: Row,
  ) -> Result<Intercept> {
    let _pause = self.pause();
    let (Some(pk), Some(uid_col)) =
      (meta.primary_key.as_deref(), meta.uid_column.as_deref())
    else {
      return Ok(Intercept::passthrough());
    };
    let key = existing.get(pk).cloned().unwrap_or(Value::Null);

    let mut pending = Vec::new();
    match meta.primary_key_id() {
      Some(cid) => pending.push(PendingEntry {
        op: ChangeOp::Restore,
        uid,
        column_id: cid,
        value: Some(RecordedValue::Literal(key.clone())),
      }),
      None => warn!(table = %meta.name, "primary key has no column id; restore not logged"),
    }

    let mut changed: Vec<(String, Value)> = Vec::new();
    for (col, new_value) in q.columns.iter().zip(&q.values) {
      if col == pk || col == uid_col {
        continue;
      }
      let Some(col_meta) = meta.column(col) else { continue };
      let old = existing.get(col).cloned().unwrap_or(Value::Null);
      if old == *new_value {
        continue;
      }
      changed.push((col.clone(), new_value.clone()));
      if let Some(cid) = col_meta.column_id {
        pending.push(PendingEntry {
          op: ChangeOp::Update,
          uid,
          column_id: cid,
          value: Some(self.record_old(col_meta, old)?),
        });
      }
    }

    if !changed.is_empty() {
      let update = UpdateQuery {
        table:       meta.name.clone(),
        assignments: changed,
        filter:      Some(Filter::eq(pk, key)),
      };
      let (text, params) = sql::render_update(&update);
      self.conn().execute(&text, rusqlite::params_from_iter(params))?;
    }
    registry::set_active(self.conn(), uid, true)?;

    debug!(table = %meta.name, uid = %uid, "insert restored soft-deleted row");
    Ok(Intercept {
      outcome:  HookOutcome::Suppressed,
      pending,
      new_row:  None,
      affected: Some(1),
    })
  }

  // ── Updates ───────────────────────────────────────────────────────────────

  fn intercept_update(&self, q: &UpdateQuery) -> Result<Intercept> {
    let meta = self.metadata(&q.table)?;
    let (Some(pk), Some(uid_col)) =
      (meta.primary_key.as_deref(), meta.uid_column.as_deref())
    else {
      return Ok(Intercept::passthrough());
    };

    // The uid is assigned once for the row's lifetime; assignments to its
    // column never reach the table.
    let assignments: Vec<(String, Value)> = q
      .assignments
      .iter()
      .filter(|(col, _)| col != uid_col)
      .cloned()
      .collect();

    let pinned = q
      .filter
      .as_ref()
      .and_then(|f| f.pinned_value(Some(&q.table), pk))
      .cloned();
    let keys: Vec<Value> = match &pinned {
      Some(v) => vec![v.clone()],
      None => self.matching_keys(&meta, q.filter.as_ref())?,
    };
    let keys = self.live_tracked_keys(&meta, keys)?;

    if keys.is_empty() {
      // Nothing visible matches; absorb the statement.
      return Ok(Intercept {
        outcome:  HookOutcome::Suppressed,
        pending:  Vec::new(),
        new_row:  None,
        affected: Some(0),
      });
    }
    if assignments.is_empty() {
      // Only the uid column was assigned; nothing to write.
      return Ok(Intercept {
        outcome:  HookOutcome::Suppressed,
        pending:  Vec::new(),
        new_row:  None,
        affected: Some(keys.len()),
      });
    }

    // Pre-update snapshot: old value per changed tracked column.
    let mut pending = Vec::new();
    {
      let _pause = self.pause();
      for (key, uid) in &keys {
        for (col, new_value) in &assignments {
          let Some(col_meta) = meta.column(col) else { continue };
          let Some(cid) = col_meta.column_id else { continue };
          let old = self.live_value(&meta, key, col)?.unwrap_or(Value::Null);
          if old == *new_value {
            continue;
          }
          pending.push(PendingEntry {
            op: ChangeOp::Update,
            uid: *uid,
            column_id: cid,
            value: Some(self.record_old(col_meta, old)?),
          });
        }
      }
    }

    if pinned.is_some() {
      if assignments.len() == q.assignments.len() {
        return Ok(Intercept {
          outcome: HookOutcome::Unchanged,
          pending,
          new_row: None,
          affected: None,
        });
      }
      let stripped = UpdateQuery {
        table: q.table.clone(),
        assignments,
        filter: q.filter.clone(),
      };
      return Ok(Intercept {
        outcome: HookOutcome::Replaced(Query::Update(stripped)),
        pending,
        new_row: None,
        affected: None,
      });
    }

    // Fan the bulk update out to one statement per key so each row's change
    // is attributable; the fan-out is atomic via a savepoint.
    {
      let _pause = self.pause();
      self.with_savepoint(|| {
        for (key, _) in &keys {
          let per_key = UpdateQuery {
            table:       q.table.clone(),
            assignments: assignments.clone(),
            filter:      Some(Filter::eq(pk, key.clone())),
          };
          let (text, params) = sql::render_update(&per_key);
          self.conn().execute(&text, rusqlite::params_from_iter(params))?;
        }
        Ok(())
      })?;
    }

    Ok(Intercept {
      outcome:  HookOutcome::Suppressed,
      pending,
      new_row:  None,
      affected: Some(keys.len()),
    })
  }

  // ── Deletes ───────────────────────────────────────────────────────────────

  /// A delete never runs physically against a tracked table.
  fn intercept_delete(&self, q: &DeleteQuery) -> Result<Intercept> {
    let meta = self.metadata(&q.table)?;
    if !meta.tracked {
      return Ok(Intercept::passthrough());
    }
    let Some(pk) = meta.primary_key.as_deref() else {
      return Ok(Intercept::passthrough());
    };

    let pinned = q
      .filter
      .as_ref()
      .and_then(|f| f.pinned_value(Some(&q.table), pk))
      .cloned();
    let keys: Vec<Value> = match pinned {
      Some(v) => vec![v],
      None => self.matching_keys(&meta, q.filter.as_ref())?,
    };
    // An already-inactive row is invisible; flipping it again would log a
    // duplicate delete entry.
    let keys = self.live_tracked_keys(&meta, keys)?;

    let _pause = self.pause();
    let mut pending = Vec::new();
    self.with_savepoint(|| {
      for (key, uid) in &keys {
        registry::set_active(self.conn(), *uid, false)?;
        if let Some(cid) = meta.primary_key_id() {
          pending.push(PendingEntry {
            op: ChangeOp::Delete,
            uid: *uid,
            column_id: cid,
            value: Some(RecordedValue::Literal(key.clone())),
          });
        }
      }
      Ok(())
    })?;

    Ok(Intercept {
      outcome:  HookOutcome::Suppressed,
      pending,
      new_row:  None,
      affected: Some(keys.len()),
    })
  }

  // ── Shared helpers ────────────────────────────────────────────────────────

  /// Snapshot read of the primary keys a filter matches.
  fn matching_keys(
    &self,
    meta: &TableMetadata,
    filter: Option<&Filter>,
  ) -> Result<Vec<Value>> {
    let _pause = self.pause();
    let Some(pk) = meta.primary_key.as_deref() else {
      return Ok(Vec::new());
    };
    let query = SelectQuery {
      table:   meta.name.clone(),
      alias:   None,
      columns: vec![quote_ident(pk)],
      filter:  filter.cloned(),
      joins:   Vec::new(),
    };
    let rows = self.fetch(&Query::Select(query))?.rows();
    Ok(
      rows
        .into_iter()
        .filter_map(|row| row.iter().next().map(|(_, v)| v.clone()))
        .collect(),
    )
  }

  /// Keep only keys whose registry row exists and is active, resolving each
  /// to its uid. Rows without a registry row or flagged inactive are
  /// invisible to reads and are left alone by writes.
  fn live_tracked_keys(
    &self,
    meta: &TableMetadata,
    keys: Vec<Value>,
  ) -> Result<Vec<(Value, RowUid)>> {
    let _pause = self.pause();
    let mut live = Vec::with_capacity(keys.len());
    for key in keys {
      let Some(uid) = self.find_uid(meta, &key)? else { continue };
      if registry::is_active(self.conn(), uid)? == Some(true) {
        live.push((key, uid));
      }
    }
    Ok(live)
  }

  /// How to record an old value: columns that are foreign keys into another
  /// tracked table record the referenced row's uid, everything else records
  /// the literal.
  fn record_old(&self, col: &ColumnMeta, old: Value) -> Result<RecordedValue> {
    if old.is_null() {
      return Ok(RecordedValue::Literal(old));
    }
    let Some(target) = &col.references else {
      return Ok(RecordedValue::Literal(old));
    };
    let target_meta = self.metadata(target)?;
    if !target_meta.tracked {
      return Ok(RecordedValue::Literal(old));
    }
    match self.find_uid(&target_meta, &old)? {
      Some(uid) => Ok(RecordedValue::Reference(uid)),
      None => Ok(RecordedValue::Literal(old)),
    }
  }

  /// Run `f` inside a savepoint: a partial fan-out failure rolls the whole
  /// fan-out back.
  fn with_savepoint<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
    self.conn().execute_batch("SAVEPOINT chronicle_fanout")?;
    match f() {
      Ok(v) => {
        self.conn().execute_batch("RELEASE chronicle_fanout")?;
        Ok(v)
      }
      Err(e) => {
        let _ = self
          .conn()
          .execute_batch("ROLLBACK TO chronicle_fanout; RELEASE chronicle_fanout");
        Err(e)
      }
    }
  }
}
