//! Integration tests for the engine against an in-memory database.
//!
//! The sample schema has two tracked tables (`contacts` references `orgs`,
//! so old `org_id` values are recorded as uid references) and one untracked
//! table. Tests use the as-of clock to pin ledger timestamps to known
//! instants.

use chrono::{DateTime, Duration, Utc};
use chronicle_core::{
  entry::{ChangeOp, RecordedValue},
  query::{
    ColumnRef, DeleteQuery, Filter, HookOutcome, InsertQuery, Join, Operand,
    Query, SelectQuery, UpdateQuery,
  },
  value::Value,
};

use crate::Engine;

const SAMPLE_SCHEMA: &str = "
CREATE TABLE orgs (
    id   INTEGER PRIMARY KEY,
    uid  TEXT REFERENCES uids(uid),
    name TEXT NOT NULL
);

CREATE TABLE contacts (
    id     INTEGER PRIMARY KEY,
    uid    TEXT REFERENCES uids(uid),
    name   TEXT NOT NULL,
    email  TEXT,
    org_id INTEGER REFERENCES orgs(id)
);
CREATE UNIQUE INDEX contacts_email_idx ON contacts(email);

CREATE TABLE plain_notes (
    id   INTEGER PRIMARY KEY,
    body TEXT
);
";

fn engine() -> Engine {
  let e = Engine::open_in_memory().expect("in-memory engine");
  e.batch(SAMPLE_SCHEMA).expect("sample schema");
  e
}

fn minutes_ago(minutes: i64) -> DateTime<Utc> {
  Utc::now() - Duration::minutes(minutes)
}

fn insert_contact(e: &Engine, name: &str, email: Option<&str>) -> i64 {
  e.execute(Query::Insert(
    InsertQuery::into("contacts").set("name", name).set("email", email),
  ))
  .expect("insert contact");
  e.last_insert_rowid()
}

fn insert_org(e: &Engine, name: &str) -> i64 {
  e.execute(Query::Insert(InsertQuery::into("orgs").set("name", name)))
    .expect("insert org");
  e.last_insert_rowid()
}

fn delete_contact(e: &Engine, id: i64) {
  e.execute(Query::Delete(
    DeleteQuery::from("contacts").with_filter(Filter::eq("id", id)),
  ))
  .expect("delete contact");
}

fn select_contacts(e: &Engine, filter: Option<Filter>) -> Vec<chronicle_core::value::Row> {
  let mut q = SelectQuery::from("contacts");
  q.filter = filter;
  e.execute(Query::Select(q)).expect("select contacts").rows()
}

fn ops(e: &Engine, table: &str, id: i64) -> Vec<ChangeOp> {
  e.history(table, &Value::Integer(id))
    .expect("history")
    .iter()
    .map(|entry| entry.op)
    .collect()
}

// ─── Untracked tables ────────────────────────────────────────────────────────

#[test]
fn untracked_table_is_left_alone() {
  let e = engine();
  assert!(!e.has_history("plain_notes").unwrap());

  e.execute(Query::Insert(InsertQuery::into("plain_notes").set("body", "hi")))
    .unwrap();
  let id = e.last_insert_rowid();

  // No registry rows were created.
  let registry = e
    .execute(Query::Select(SelectQuery::from("uids")))
    .unwrap()
    .rows();
  assert!(registry.is_empty());

  // A delete runs physically.
  e.execute(Query::Delete(
    DeleteQuery::from("plain_notes").with_filter(Filter::eq("id", id)),
  ))
  .unwrap();
  let rows = e
    .execute(Query::Select(SelectQuery::from("plain_notes")))
    .unwrap()
    .rows();
  assert!(rows.is_empty());
}

// ─── Inserts ─────────────────────────────────────────────────────────────────

#[test]
fn insert_assigns_uid_and_logs_creation() {
  let e = engine();
  let id = insert_contact(&e, "Ann", Some("ann@example.com"));

  let rows = select_contacts(&e, Some(Filter::eq("id", id)));
  assert_eq!(rows.len(), 1);
  assert!(matches!(rows[0].get("uid"), Some(Value::Text(_))));

  let history = e.history("contacts", &Value::Integer(id)).unwrap();
  assert_eq!(history.len(), 1);
  assert_eq!(history[0].op, ChangeOp::Insert);
  // The generated key was substituted into the queued entry.
  assert_eq!(history[0].value, RecordedValue::Literal(Value::Integer(id)));
}

#[test]
fn insert_attributes_acting_user() {
  let e = engine();
  e.set_user("carol");
  let id = insert_contact(&e, "Ann", None);

  let history = e.history("contacts", &Value::Integer(id)).unwrap();
  assert_eq!(history[0].user, "carol");
}

#[test]
fn tracked_insert_precedes_its_registry_row() {
  let e = engine();
  let id = insert_contact(&e, "Ann", None);

  // The primary insert commits first; the registry row follows in the
  // after phase, so the uid key must not be enforced against it.
  let rows = select_contacts(&e, Some(Filter::eq("id", id)));
  let registry = e
    .execute(Query::Select(SelectQuery::from("uids")))
    .unwrap()
    .rows();
  assert_eq!(registry.len(), 1);
  assert_eq!(registry[0].get("uid"), rows[0].get("uid"));
  assert_eq!(registry[0].get("active"), Some(&Value::Integer(1)));
}

#[test]
fn generated_key_survives_bookkeeping_writes() {
  let e = engine();
  let ann = insert_contact(&e, "Ann", Some("ann@example.com"));
  // Grow the ledger past the host table's rowids before the next insert.
  e.execute(Query::Update(
    UpdateQuery::table("contacts")
      .set("name", "Annie")
      .with_filter(Filter::eq("id", ann)),
  ))
  .unwrap();

  e.execute(Query::Insert(
    InsertQuery::into("contacts")
      .set("name", "Bea")
      .set("email", "bea@example.com"),
  ))
  .unwrap();
  let key = e.last_insert_rowid();

  let rows = select_contacts(&e, Some(Filter::eq("email", "bea@example.com")));
  assert_eq!(rows[0].get("id"), Some(&Value::Integer(key)));
}

// ─── Read rewriting ──────────────────────────────────────────────────────────

#[test]
fn select_rewrite_injects_registry_join() {
  let e = engine();
  let q = Query::Select(SelectQuery::from("contacts"));
  let intercept = e.before_hook(&q).unwrap();

  let HookOutcome::Replaced(Query::Select(rewritten)) = intercept.outcome
  else {
    panic!("expected a replaced select");
  };
  assert_eq!(rewritten.joins.len(), 1);
  assert_eq!(rewritten.joins[0].table, "uids");
  // The select list was scoped to the base table.
  assert_eq!(rewritten.columns, vec![r#""contacts".*"#.to_owned()]);
}

#[test]
fn select_rewrite_skips_existing_registry_join() {
  let e = engine();
  let mut q = SelectQuery::from("contacts");
  q.joins.push(Join {
    table: "uids".to_owned(),
    alias: Some("u".to_owned()),
    on:    Filter::Eq(
      ColumnRef::qualified("u", "uid"),
      Operand::Column(ColumnRef::qualified("contacts", "uid")),
    )
    .and(Filter::Eq(
      ColumnRef::qualified("u", "active"),
      Operand::Value(Value::Integer(1)),
    )),
  });

  let intercept = e.before_hook(&Query::Select(q)).unwrap();
  assert_eq!(intercept.outcome, HookOutcome::Unchanged);
}

#[test]
fn select_rewrite_guards_joined_tracked_tables() {
  let e = engine();
  let mut q = SelectQuery::from("contacts");
  q.joins.push(Join {
    table: "orgs".to_owned(),
    alias: None,
    on:    Filter::Eq(
      ColumnRef::qualified("orgs", "id"),
      Operand::Column(ColumnRef::qualified("contacts", "org_id")),
    ),
  });

  let intercept = e.before_hook(&Query::Select(q)).unwrap();
  let HookOutcome::Replaced(Query::Select(rewritten)) = intercept.outcome
  else {
    panic!("expected a replaced select");
  };
  let registry_joins =
    rewritten.joins.iter().filter(|j| j.table == "uids").count();
  assert_eq!(registry_joins, 2);
  assert_eq!(
    rewritten.columns,
    vec![r#""contacts".*"#.to_owned(), r#""orgs".*"#.to_owned()]
  );
}

#[test]
fn joined_read_hides_rows_of_soft_deleted_targets() {
  let e = engine();
  let org = insert_org(&e, "Acme");
  let id = insert_contact(&e, "Ann", None);
  e.execute(Query::Update(
    UpdateQuery::table("contacts")
      .set("org_id", org)
      .with_filter(Filter::eq("id", id)),
  ))
  .unwrap();

  let joined = || {
    let mut q = SelectQuery::from("contacts");
    q.joins.push(Join {
      table: "orgs".to_owned(),
      alias: None,
      on:    Filter::Eq(
        ColumnRef::qualified("orgs", "id"),
        Operand::Column(ColumnRef::qualified("contacts", "org_id")),
      ),
    });
    Query::Select(q)
  };
  assert_eq!(e.execute(joined()).unwrap().rows().len(), 1);

  e.execute(Query::Delete(
    DeleteQuery::from("orgs").with_filter(Filter::eq("id", org)),
  ))
  .unwrap();
  assert!(e.execute(joined()).unwrap().rows().is_empty());
}

#[test]
fn select_hides_soft_deleted_rows() {
  let e = engine();
  let ann = insert_contact(&e, "Ann", Some("ann@example.com"));
  insert_contact(&e, "Bea", Some("bea@example.com"));

  delete_contact(&e, ann);

  let rows = select_contacts(&e, None);
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].get("name"), Some(&Value::Text("Bea".to_owned())));
}

// ─── Updates ─────────────────────────────────────────────────────────────────

#[test]
fn pinned_update_logs_old_value_and_runs_physically() {
  let e = engine();
  let id = insert_contact(&e, "Ann", None);

  let exec = e
    .execute(Query::Update(
      UpdateQuery::table("contacts")
        .set("name", "Bea")
        .with_filter(Filter::eq("id", id)),
    ))
    .unwrap();
  assert_eq!(exec.affected(), 1);

  let rows = select_contacts(&e, Some(Filter::eq("id", id)));
  assert_eq!(rows[0].get("name"), Some(&Value::Text("Bea".to_owned())));

  let history = e.history("contacts", &Value::Integer(id)).unwrap();
  assert_eq!(history.len(), 2);
  assert_eq!(history[1].op, ChangeOp::Update);
  assert_eq!(
    history[1].value,
    RecordedValue::Literal(Value::Text("Ann".to_owned()))
  );
}

#[test]
fn update_with_unchanged_value_logs_nothing() {
  let e = engine();
  let id = insert_contact(&e, "Ann", None);

  e.execute(Query::Update(
    UpdateQuery::table("contacts")
      .set("name", "Ann")
      .with_filter(Filter::eq("id", id)),
  ))
  .unwrap();

  assert_eq!(ops(&e, "contacts", id), vec![ChangeOp::Insert]);
}

#[test]
fn bulk_update_fans_out_per_row() {
  let e = engine();
  let org = insert_org(&e, "Acme");
  let ann = insert_contact(&e, "Ann", Some("ann@example.com"));
  let bea = insert_contact(&e, "Bea", Some("bea@example.com"));
  for id in [ann, bea] {
    e.execute(Query::Update(
      UpdateQuery::table("contacts")
        .set("org_id", org)
        .with_filter(Filter::eq("id", id)),
    ))
    .unwrap();
  }

  // Filter on a non-key column: the bulk statement is suppressed and
  // fanned out per matching key.
  let exec = e
    .execute(Query::Update(
      UpdateQuery::table("contacts")
        .set("name", "Renamed")
        .with_filter(Filter::eq("org_id", org)),
    ))
    .unwrap();
  assert_eq!(exec.affected(), 2);

  for id in [ann, bea] {
    let rows = select_contacts(&e, Some(Filter::eq("id", id)));
    assert_eq!(rows[0].get("name"), Some(&Value::Text("Renamed".to_owned())));
    assert_eq!(*ops(&e, "contacts", id).last().unwrap(), ChangeOp::Update);
  }
}

#[test]
fn update_matching_no_rows_is_harmless() {
  let e = engine();
  let exec = e
    .execute(Query::Update(
      UpdateQuery::table("contacts")
        .set("name", "Nobody")
        .with_filter(Filter::eq("id", 999)),
    ))
    .unwrap();
  assert_eq!(exec.affected(), 0);
}

#[test]
fn update_cannot_rewrite_the_uid_column() {
  let e = engine();
  let id = insert_contact(&e, "Ann", None);
  let uid_before = select_contacts(&e, Some(Filter::eq("id", id)))[0]
    .get("uid")
    .cloned()
    .unwrap();

  let exec = e
    .execute(Query::Update(
      UpdateQuery::table("contacts")
        .set("uid", "forged")
        .set("name", "Bea")
        .with_filter(Filter::eq("id", id)),
    ))
    .unwrap();
  assert_eq!(exec.affected(), 1);

  // A uid-only statement never reaches the table at all.
  let exec = e
    .execute(Query::Update(
      UpdateQuery::table("contacts")
        .set("uid", "forged")
        .with_filter(Filter::eq("id", id)),
    ))
    .unwrap();
  assert_eq!(exec.affected(), 1);

  let rows = select_contacts(&e, Some(Filter::eq("id", id)));
  assert_eq!(rows[0].get("uid"), Some(&uid_before));
  assert_eq!(rows[0].get("name"), Some(&Value::Text("Bea".to_owned())));
  assert_eq!(*ops(&e, "contacts", id).last().unwrap(), ChangeOp::Update);
}

#[test]
fn bulk_update_leaves_soft_deleted_rows_alone() {
  let e = engine();
  let org = insert_org(&e, "Acme");
  let ann = insert_contact(&e, "Ann", Some("ann@example.com"));
  let bea = insert_contact(&e, "Bea", Some("bea@example.com"));
  for id in [ann, bea] {
    e.execute(Query::Update(
      UpdateQuery::table("contacts")
        .set("org_id", org)
        .with_filter(Filter::eq("id", id)),
    ))
    .unwrap();
  }
  delete_contact(&e, ann);

  let exec = e
    .execute(Query::Update(
      UpdateQuery::table("contacts")
        .set("name", "Renamed")
        .with_filter(Filter::eq("org_id", org)),
    ))
    .unwrap();
  assert_eq!(exec.affected(), 1);

  // The deleted row keeps its old name, physically and in the ledger.
  {
    let _raw = e.pause();
    let rows = select_contacts(&e, Some(Filter::eq("id", ann)));
    assert_eq!(rows[0].get("name"), Some(&Value::Text("Ann".to_owned())));
  }
  assert_eq!(*ops(&e, "contacts", ann).last().unwrap(), ChangeOp::Delete);
}

#[test]
fn reference_column_records_uid_of_old_target() {
  let e = engine();
  let acme = insert_org(&e, "Acme");
  let globex = insert_org(&e, "Globex");
  let id = insert_contact(&e, "Ann", None);
  e.execute(Query::Update(
    UpdateQuery::table("contacts")
      .set("org_id", acme)
      .with_filter(Filter::eq("id", id)),
  ))
  .unwrap();

  let before_switch = Utc::now();
  e.execute(Query::Update(
    UpdateQuery::table("contacts")
      .set("org_id", globex)
      .with_filter(Filter::eq("id", id)),
  ))
  .unwrap();

  // The old org_id was recorded as a reference to the org's uid, not as
  // the raw key.
  let history = e.history("contacts", &Value::Integer(id)).unwrap();
  let entry = history.last().unwrap();
  assert_eq!(entry.op, ChangeOp::Update);
  assert!(matches!(entry.value, RecordedValue::Reference(_)));

  // Reconstruction resolves the reference back to the org's key.
  let old = e
    .value_at("contacts", &Value::Integer(id), "org_id", before_switch)
    .unwrap();
  assert_eq!(old, Some(Value::Integer(acme)));
}

// ─── Soft delete and restore ─────────────────────────────────────────────────

#[test]
fn scenario_delete_preserves_creation_record() {
  let e = engine();
  let t0 = minutes_ago(30);
  e.set_as_of(t0);
  let id = insert_contact(&e, "Ann", Some("ann@example.com"));
  e.clear_as_of();

  delete_contact(&e, id);

  assert!(select_contacts(&e, Some(Filter::eq("id", id))).is_empty());

  let creation = e.creation("contacts", &Value::Integer(id)).unwrap();
  let creation = creation.expect("creation record survives soft delete");
  assert_eq!(creation.op, ChangeOp::Insert);
  assert!((creation.at - t0).num_seconds().abs() < 1);
}

#[test]
fn scenario_reinsert_restores_and_diffs() {
  let e = engine();
  e.set_as_of(minutes_ago(30));
  let id = insert_contact(&e, "Ann", Some("ann@old.example.com"));
  e.set_as_of(minutes_ago(20));
  delete_contact(&e, id);

  // Re-insert under the same primary key with one changed field.
  e.set_as_of(minutes_ago(10));
  let exec = e
    .execute(Query::Insert(
      InsertQuery::into("contacts")
        .set("id", id)
        .set("name", "Ann")
        .set("email", "ann@new.example.com"),
    ))
    .unwrap();
  e.clear_as_of();
  assert_eq!(exec.affected(), 1);

  // Visible again through an ordinary filtered read, with the new email.
  let rows = select_contacts(&e, Some(Filter::eq("id", id)));
  assert_eq!(rows.len(), 1);
  assert_eq!(
    rows[0].get("email"),
    Some(&Value::Text("ann@new.example.com".to_owned()))
  );

  // Ledger shows insert, delete, restore, update — in timestamp order,
  // with no second insert.
  assert_eq!(
    ops(&e, "contacts", id),
    vec![ChangeOp::Insert, ChangeOp::Delete, ChangeOp::Restore, ChangeOp::Update]
  );

  // The one update entry recorded the pre-restore email.
  let history = e.history("contacts", &Value::Integer(id)).unwrap();
  assert_eq!(
    history[3].value,
    RecordedValue::Literal(Value::Text("ann@old.example.com".to_owned()))
  );
}

#[test]
fn reinsert_matches_by_unique_key_without_primary_key() {
  let e = engine();
  let id = insert_contact(&e, "Ann", Some("ann@example.com"));
  delete_contact(&e, id);

  // No primary key supplied; the unique email tuple identifies the
  // soft-deleted row.
  e.execute(Query::Insert(
    InsertQuery::into("contacts")
      .set("name", "Ann")
      .set("email", "ann@example.com"),
  ))
  .unwrap();

  let rows = select_contacts(&e, None);
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].get("id"), Some(&Value::Integer(id)));

  assert_eq!(
    ops(&e, "contacts", id),
    vec![ChangeOp::Insert, ChangeOp::Delete, ChangeOp::Restore]
  );
}

#[test]
fn soft_delete_then_identical_reinsert_logs_exactly_one_restore() {
  let e = engine();
  let id = insert_contact(&e, "Ann", Some("ann@example.com"));
  delete_contact(&e, id);
  e.execute(Query::Insert(
    InsertQuery::into("contacts")
      .set("id", id)
      .set("name", "Ann")
      .set("email", "ann@example.com"),
  ))
  .unwrap();

  let all = ops(&e, "contacts", id);
  assert_eq!(all.iter().filter(|op| **op == ChangeOp::Insert).count(), 1);
  assert_eq!(all.iter().filter(|op| **op == ChangeOp::Restore).count(), 1);
}

#[test]
fn bulk_delete_flags_every_matching_row() {
  let e = engine();
  let org = insert_org(&e, "Acme");
  let ann = insert_contact(&e, "Ann", Some("ann@example.com"));
  let bea = insert_contact(&e, "Bea", Some("bea@example.com"));
  for id in [ann, bea] {
    e.execute(Query::Update(
      UpdateQuery::table("contacts")
        .set("org_id", org)
        .with_filter(Filter::eq("id", id)),
    ))
    .unwrap();
  }

  let exec = e
    .execute(Query::Delete(
      DeleteQuery::from("contacts").with_filter(Filter::eq("org_id", org)),
    ))
    .unwrap();
  assert_eq!(exec.affected(), 2);

  assert!(select_contacts(&e, None).is_empty());
  // The rows still exist physically, flagged inactive.
  assert_eq!(*ops(&e, "contacts", ann).last().unwrap(), ChangeOp::Delete);
  assert_eq!(*ops(&e, "contacts", bea).last().unwrap(), ChangeOp::Delete);
}

#[test]
fn repeated_delete_flags_and_logs_once() {
  let e = engine();
  let id = insert_contact(&e, "Ann", Some("ann@example.com"));

  let delete = || {
    Query::Delete(
      DeleteQuery::from("contacts")
        .with_filter(Filter::eq("email", "ann@example.com")),
    )
  };
  assert_eq!(e.execute(delete()).unwrap().affected(), 1);
  // The second pass matches the same physical row, now inactive.
  assert_eq!(e.execute(delete()).unwrap().affected(), 0);

  assert_eq!(
    ops(&e, "contacts", id),
    vec![ChangeOp::Insert, ChangeOp::Delete]
  );
}

// ─── Reconstruction ──────────────────────────────────────────────────────────

#[test]
fn scenario_value_at_between_insert_and_update() {
  let e = engine();
  let t0 = minutes_ago(30);
  let t1 = minutes_ago(20);
  let t2 = minutes_ago(10);

  e.set_as_of(t0);
  let id = insert_contact(&e, "Ann", None);
  e.set_as_of(t2);
  e.execute(Query::Update(
    UpdateQuery::table("contacts")
      .set("name", "Bea")
      .with_filter(Filter::eq("id", id)),
  ))
  .unwrap();
  e.clear_as_of();

  let key = Value::Integer(id);
  // Between insert and update: the old value.
  assert_eq!(
    e.value_at("contacts", &key, "name", t1).unwrap(),
    Some(Value::Text("Ann".to_owned()))
  );
  // At and after the update instant: the new value.
  assert_eq!(
    e.value_at("contacts", &key, "name", t2).unwrap(),
    Some(Value::Text("Bea".to_owned()))
  );
  assert_eq!(
    e.value_at("contacts", &key, "name", Utc::now()).unwrap(),
    Some(Value::Text("Bea".to_owned()))
  );
  // Strictly before the update instant: still the old value.
  assert_eq!(
    e.value_before("contacts", &key, "name", t2).unwrap(),
    Some(Value::Text("Ann".to_owned()))
  );
  assert_eq!(
    e.value_after("contacts", &key, "name", t2).unwrap(),
    Some(Value::Text("Bea".to_owned()))
  );
}

#[test]
fn reconstruction_is_monotonic() {
  let e = engine();
  e.set_as_of(minutes_ago(40));
  let id = insert_contact(&e, "v1", None);
  for (minutes, name) in [(30, "v2"), (20, "v3"), (10, "v4")] {
    e.set_as_of(minutes_ago(minutes));
    e.execute(Query::Update(
      UpdateQuery::table("contacts")
        .set("name", name)
        .with_filter(Filter::eq("id", id)),
    ))
    .unwrap();
  }
  e.clear_as_of();

  let key = Value::Integer(id);
  let observed: Vec<Option<Value>> = [35, 25, 15, 5]
    .iter()
    .map(|m| e.value_at("contacts", &key, "name", minutes_ago(*m)).unwrap())
    .collect();
  assert_eq!(
    observed,
    vec![
      Some(Value::Text("v1".to_owned())),
      Some(Value::Text("v2".to_owned())),
      Some(Value::Text("v3".to_owned())),
      Some(Value::Text("v4".to_owned())),
    ]
  );
}

#[test]
fn scenario_moment_before_creation_is_not_found() {
  let e = engine();
  e.set_as_of(minutes_ago(10));
  let id = insert_contact(&e, "Ann", None);
  e.clear_as_of();

  let key = Value::Integer(id);
  let ancient = minutes_ago(60);
  assert_eq!(e.value_at("contacts", &key, "name", ancient).unwrap(), None);
  assert_eq!(e.row_at("contacts", &key, ancient, None).unwrap(), None);
}

#[test]
fn row_at_now_matches_live_row() {
  let e = engine();
  let org = insert_org(&e, "Acme");
  let id = insert_contact(&e, "Ann", Some("ann@example.com"));
  e.execute(Query::Update(
    UpdateQuery::table("contacts")
      .set("org_id", org)
      .with_filter(Filter::eq("id", id)),
  ))
  .unwrap();

  let key = Value::Integer(id);
  let row = e
    .row_at("contacts", &key, Utc::now(), None)
    .unwrap()
    .expect("live row");

  let live = select_contacts(&e, Some(Filter::eq("id", id)));
  for column in ["id", "name", "email", "org_id"] {
    assert_eq!(row.get(column), live[0].get(column), "column {column}");
  }
  // The uid bookkeeping column is not part of the reconstructed row.
  assert_eq!(row.get("uid"), None);
}

#[test]
fn row_at_applies_overrides_per_requested_column() {
  let e = engine();
  let t0 = minutes_ago(30);
  let t1 = minutes_ago(20);

  e.set_as_of(t0);
  let id = insert_contact(&e, "Ann", Some("ann@example.com"));
  e.set_as_of(minutes_ago(10));
  e.execute(Query::Update(
    UpdateQuery::table("contacts")
      .set("name", "Bea")
      .set("email", "bea@example.com")
      .with_filter(Filter::eq("id", id)),
  ))
  .unwrap();
  e.clear_as_of();

  let row = e
    .row_at("contacts", &Value::Integer(id), t1, Some(["name", "email"].as_slice()))
    .unwrap()
    .expect("row existed at t1");
  assert_eq!(row.get("name"), Some(&Value::Text("Ann".to_owned())));
  assert_eq!(
    row.get("email"),
    Some(&Value::Text("ann@example.com".to_owned()))
  );
  assert_eq!(row.len(), 2);
}

#[test]
fn reconstruction_rejects_untracked_tables_and_unknown_columns() {
  let e = engine();
  let id = insert_contact(&e, "Ann", None);

  let err = e
    .value_at("plain_notes", &Value::Integer(1), "body", Utc::now())
    .unwrap_err();
  assert!(matches!(err, crate::Error::NotTracked(_)));

  let err = e
    .value_at("contacts", &Value::Integer(id), "nope", Utc::now())
    .unwrap_err();
  assert!(matches!(err, crate::Error::UnknownColumn { .. }));
}

// ─── As-of clock ─────────────────────────────────────────────────────────────

#[test]
fn future_as_of_is_clamped_to_now() {
  let e = engine();
  e.set_as_of(Utc::now() + Duration::hours(1));
  let id = insert_contact(&e, "Ann", None);
  e.clear_as_of();

  let history = e.history("contacts", &Value::Integer(id)).unwrap();
  assert!(history[0].at <= Utc::now() + Duration::seconds(1));
}

// ─── Interception state ──────────────────────────────────────────────────────

#[test]
fn pause_guard_nests() {
  let e = engine();
  assert!(e.intercepting());

  let outer = e.pause();
  assert!(!e.intercepting());
  {
    let _inner = e.pause();
    assert!(!e.intercepting());
  }
  // Dropping the inner guard must not re-enable interception while the
  // outer one is held.
  assert!(!e.intercepting());
  drop(outer);
  assert!(e.intercepting());
}

#[test]
fn disabled_engine_passes_writes_through() {
  let e = engine();
  let id = insert_contact(&e, "Ann", None);

  e.disable();
  assert!(!e.is_enabled());
  delete_contact(&e, id);
  e.enable();

  // The delete ran physically and left no ledger trace.
  assert!(select_contacts(&e, Some(Filter::eq("id", id))).is_empty());
  assert_eq!(ops(&e, "contacts", id), Vec::<ChangeOp>::new());
}

// ─── Ledger listings ─────────────────────────────────────────────────────────

#[test]
fn recently_changed_pages_most_recent_first() {
  let e = engine();
  e.set_as_of(minutes_ago(30));
  let ann = insert_contact(&e, "Ann", Some("ann@example.com"));
  e.set_as_of(minutes_ago(20));
  let bea = insert_contact(&e, "Bea", Some("bea@example.com"));
  e.set_as_of(minutes_ago(10));
  e.execute(Query::Update(
    UpdateQuery::table("contacts")
      .set("name", "Annie")
      .with_filter(Filter::eq("id", ann)),
  ))
  .unwrap();
  e.clear_as_of();

  let first = e.recently_changed(1, 0).unwrap();
  assert_eq!(first.len(), 1);
  assert_eq!(first[0].table, "contacts");

  let second = e.recently_changed(1, 1).unwrap();
  assert_eq!(second.len(), 1);
  assert!(first[0].last_at > second[0].last_at);
  assert_ne!(first[0].uid, second[0].uid);

  // Page ordering: Ann was touched last, Bea before that.
  let ann_history = e.history("contacts", &Value::Integer(ann)).unwrap();
  let bea_history = e.history("contacts", &Value::Integer(bea)).unwrap();
  assert_eq!(first[0].uid, ann_history[0].uid);
  assert_eq!(second[0].uid, bea_history[0].uid);
}

// ─── Purge ───────────────────────────────────────────────────────────────────

#[test]
fn purge_removes_row_registry_and_trail() {
  let e = engine();
  let id = insert_contact(&e, "Ann", None);
  let key = Value::Integer(id);

  e.purge("contacts", &key).unwrap();

  assert!(select_contacts(&e, Some(Filter::eq("id", id))).is_empty());
  assert!(e.history("contacts", &key).unwrap().is_empty());
  assert_eq!(e.creation("contacts", &key).unwrap(), None);

  let registry = e
    .execute(Query::Select(SelectQuery::from("uids")))
    .unwrap()
    .rows();
  assert!(registry.is_empty());
}

// ─── Metadata ────────────────────────────────────────────────────────────────

#[test]
fn metadata_discovers_tracking_and_keys() {
  let e = engine();
  assert!(e.has_history("contacts").unwrap());
  assert!(e.has_history("orgs").unwrap());
  assert!(!e.has_history("plain_notes").unwrap());

  let meta = e.table_metadata("contacts").unwrap();
  assert_eq!(meta.primary_key.as_deref(), Some("id"));
  assert_eq!(meta.uid_column.as_deref(), Some("uid"));
  assert!(meta.unique_keys.contains(&vec!["email".to_owned()]));
  assert_eq!(
    meta.column("org_id").and_then(|c| c.references.as_deref()),
    Some("orgs")
  );
  // The uid bookkeeping column has no stable column id.
  assert_eq!(meta.column_id("uid"), None);
  assert!(meta.column_id("name").is_some());
}

#[test]
fn metadata_refresh_picks_up_schema_changes() {
  let e = engine();
  let before = e.table_metadata("contacts").unwrap();
  assert!(before.column("nickname").is_none());

  e.batch("ALTER TABLE contacts ADD COLUMN nickname TEXT").unwrap();
  // The cache still holds the old shape until refreshed.
  assert!(e.table_metadata("contacts").unwrap().column("nickname").is_none());

  e.refresh_metadata();
  assert!(e.table_metadata("contacts").unwrap().column("nickname").is_some());
}

#[test]
fn unknown_table_is_a_configuration_error() {
  let e = engine();
  let err = e
    .execute(Query::Select(SelectQuery::from("no_such_table")))
    .unwrap_err();
  assert!(matches!(err, crate::Error::UnknownTable(_)));
}
