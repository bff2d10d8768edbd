//! Table metadata discovery.
//!
//! Trackedness is derived from the schema itself: a table participates iff
//! it is linked to the registry table by a single-column foreign key on its
//! uid column and carries a single-column primary key. No per-table
//! configuration exists. Stable column ids are allocated in the engine's
//! catalog tables the first time a table is discovered.

use std::collections::HashMap;

use chronicle_core::meta::{ColumnId, ColumnMeta, TableId, TableMetadata};
use rusqlite::{Connection, OptionalExtension as _};
use tracing::warn;

use crate::{
  Error, Result,
  schema::{COLUMNS_CATALOG, REGISTRY_TABLE, TABLES_CATALOG},
  sql::quote_ident,
};

struct FkEdge {
  target: String,
  from:   String,
}

/// Inspect `table` and build its metadata record.
pub fn discover(conn: &Connection, table: &str) -> Result<TableMetadata> {
  let exists: bool = conn
    .query_row(
      "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
      rusqlite::params![table],
      |_| Ok(true),
    )
    .optional()?
    .unwrap_or(false);
  if !exists {
    return Err(Error::UnknownTable(table.to_owned()));
  }

  // Column list and primary key.
  let mut stmt =
    conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
  let raw_columns: Vec<(String, i64)> = stmt
    .query_map([], |row| Ok((row.get("name")?, row.get("pk")?)))?
    .collect::<rusqlite::Result<_>>()?;

  let pk_columns: Vec<&String> = raw_columns
    .iter()
    .filter(|(_, pk)| *pk > 0)
    .map(|(name, _)| name)
    .collect();
  let primary_key =
    (pk_columns.len() == 1).then(|| pk_columns[0].clone());

  // Single-column foreign keys: the registry edge decides trackedness,
  // edges into other tables mark reference columns.
  let mut stmt = conn
    .prepare(&format!("PRAGMA foreign_key_list({})", quote_ident(table)))?;
  let fk_rows: Vec<(i64, String, String)> = stmt
    .query_map([], |row| {
      Ok((row.get("id")?, row.get("table")?, row.get("from")?))
    })?
    .collect::<rusqlite::Result<_>>()?;

  let mut fk_groups: HashMap<i64, Vec<FkEdge>> = HashMap::new();
  for (id, target, from) in fk_rows {
    fk_groups.entry(id).or_default().push(FkEdge { target, from });
  }

  let mut uid_column: Option<String> = None;
  let mut references: HashMap<String, String> = HashMap::new();
  for edges in fk_groups.values() {
    let [edge] = edges.as_slice() else { continue };
    if edge.target == REGISTRY_TABLE {
      uid_column = Some(edge.from.clone());
    } else {
      references.insert(edge.from.clone(), edge.target.clone());
    }
  }

  let tracked = uid_column.is_some() && primary_key.is_some();

  // Unique indexes, used to match re-inserts that don't supply the key.
  let unique_keys = if tracked {
    unique_key_tuples(conn, table, uid_column.as_deref())?
  } else {
    Vec::new()
  };

  let table_id = if tracked {
    Some(ensure_table_id(conn, table)?)
  } else {
    None
  };

  let columns = raw_columns
    .into_iter()
    .map(|(name, _)| {
      let is_uid = uid_column.as_deref() == Some(name.as_str());
      let column_id = match (table_id, is_uid) {
        (Some(tid), false) => match ensure_column_id(conn, tid, &name) {
          Ok(id) => Some(id),
          Err(e) => {
            // No stable id means the column is excluded from tracking;
            // writes to it still go through.
            warn!(table, column = %name, error = %e, "column id allocation failed");
            None
          }
        },
        _ => None,
      };
      ColumnMeta {
        references: references.get(&name).cloned(),
        name,
        column_id,
      }
    })
    .collect();

  Ok(TableMetadata {
    name: table.to_owned(),
    table_id,
    tracked,
    primary_key,
    uid_column,
    columns,
    unique_keys,
  })
}

fn unique_key_tuples(
  conn: &Connection,
  table: &str,
  uid_column: Option<&str>,
) -> Result<Vec<Vec<String>>> {
  let mut stmt =
    conn.prepare(&format!("PRAGMA index_list({})", quote_ident(table)))?;
  let indexes: Vec<(String, i64, String)> = stmt
    .query_map([], |row| {
      Ok((row.get("name")?, row.get("unique")?, row.get("origin")?))
    })?
    .collect::<rusqlite::Result<_>>()?;

  let mut tuples = Vec::new();
  for (name, unique, origin) in indexes {
    // Skip non-unique indexes and the implicit primary-key index.
    if unique != 1 || origin == "pk" {
      continue;
    }
    let mut stmt =
      conn.prepare(&format!("PRAGMA index_info({})", quote_ident(&name)))?;
    let columns: Vec<Option<String>> = stmt
      .query_map([], |row| row.get("name"))?
      .collect::<rusqlite::Result<_>>()?;

    // Expression index members come back NULL; such indexes can't be
    // matched against an incoming value list.
    let Some(columns) = columns.into_iter().collect::<Option<Vec<String>>>()
    else {
      continue;
    };
    if columns.iter().any(|c| Some(c.as_str()) == uid_column) {
      continue;
    }
    if !columns.is_empty() {
      tuples.push(columns);
    }
  }
  Ok(tuples)
}

fn ensure_table_id(conn: &Connection, table: &str) -> Result<TableId> {
  conn.execute(
    &format!("INSERT OR IGNORE INTO {TABLES_CATALOG} (name) VALUES (?1)"),
    rusqlite::params![table],
  )?;
  let id: i64 = conn.query_row(
    &format!("SELECT table_id FROM {TABLES_CATALOG} WHERE name = ?1"),
    rusqlite::params![table],
    |row| row.get(0),
  )?;
  Ok(TableId(id))
}

fn ensure_column_id(
  conn: &Connection,
  table_id: TableId,
  column: &str,
) -> Result<ColumnId> {
  conn.execute(
    &format!(
      "INSERT OR IGNORE INTO {COLUMNS_CATALOG} (table_id, name) VALUES (?1, ?2)"
    ),
    rusqlite::params![table_id.0, column],
  )?;
  let id: i64 = conn.query_row(
    &format!(
      "SELECT column_id FROM {COLUMNS_CATALOG} WHERE table_id = ?1 AND name = ?2"
    ),
    rusqlite::params![table_id.0, column],
    |row| row.get(0),
  )?;
  Ok(ColumnId(id))
}

/// Resolve a catalog table id back to the table name.
pub fn table_name(conn: &Connection, id: TableId) -> Result<Option<String>> {
  Ok(
    conn
      .query_row(
        &format!("SELECT name FROM {TABLES_CATALOG} WHERE table_id = ?1"),
        rusqlite::params![id.0],
        |row| row.get(0),
      )
      .optional()?,
  )
}
