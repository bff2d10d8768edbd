//! Rendering of the typed query AST to SQL text plus positional params.

use chronicle_core::query::{
  ColumnRef, DeleteQuery, Filter, InsertQuery, Operand, Query, SelectQuery,
  UpdateQuery,
};
use rusqlite::types::Value as SqlValue;

use crate::encode::to_sql;

pub type Params = Vec<SqlValue>;

/// Double-quote an identifier, escaping embedded quotes.
pub fn quote_ident(name: &str) -> String {
  format!("\"{}\"", name.replace('"', "\"\""))
}

fn render_column_ref(c: &ColumnRef) -> String {
  match &c.table {
    Some(t) => format!("{}.{}", quote_ident(t), quote_ident(&c.column)),
    None => quote_ident(&c.column),
  }
}

fn render_comparison(
  col: &ColumnRef,
  op: &str,
  rhs: &Operand,
  sql: &mut String,
  params: &mut Params,
) {
  sql.push_str(&render_column_ref(col));
  sql.push_str(op);
  match rhs {
    Operand::Column(c) => sql.push_str(&render_column_ref(c)),
    Operand::Value(v) => {
      sql.push('?');
      params.push(to_sql(v));
    }
  }
}

pub fn render_filter(filter: &Filter, sql: &mut String, params: &mut Params) {
  match filter {
    Filter::Eq(c, o) => render_comparison(c, " = ", o, sql, params),
    Filter::Ne(c, o) => render_comparison(c, " != ", o, sql, params),
    Filter::Lt(c, o) => render_comparison(c, " < ", o, sql, params),
    Filter::Le(c, o) => render_comparison(c, " <= ", o, sql, params),
    Filter::Gt(c, o) => render_comparison(c, " > ", o, sql, params),
    Filter::Ge(c, o) => render_comparison(c, " >= ", o, sql, params),
    Filter::IsNull(c) => {
      sql.push_str(&render_column_ref(c));
      sql.push_str(" IS NULL");
    }
    Filter::And(parts) | Filter::Or(parts) => {
      let sep = if matches!(filter, Filter::And(_)) { " AND " } else { " OR " };
      sql.push('(');
      for (i, part) in parts.iter().enumerate() {
        if i > 0 {
          sql.push_str(sep);
        }
        render_filter(part, sql, params);
      }
      sql.push(')');
    }
  }
}

fn push_where(filter: Option<&Filter>, sql: &mut String, params: &mut Params) {
  if let Some(f) = filter {
    sql.push_str(" WHERE ");
    render_filter(f, sql, params);
  }
}

pub fn render_select(q: &SelectQuery) -> (String, Params) {
  let mut params = Params::new();
  let select_list = if q.columns.is_empty() {
    "*".to_owned()
  } else {
    q.columns.join(", ")
  };

  let mut sql = format!("SELECT {select_list} FROM {}", quote_ident(&q.table));
  if let Some(alias) = &q.alias {
    sql.push_str(&format!(" AS {}", quote_ident(alias)));
  }

  for join in &q.joins {
    sql.push_str(&format!(" JOIN {}", quote_ident(&join.table)));
    if let Some(alias) = &join.alias {
      sql.push_str(&format!(" AS {}", quote_ident(alias)));
    }
    sql.push_str(" ON ");
    render_filter(&join.on, &mut sql, &mut params);
  }

  push_where(q.filter.as_ref(), &mut sql, &mut params);
  (sql, params)
}

pub fn render_insert(q: &InsertQuery) -> (String, Params) {
  let columns = q
    .columns
    .iter()
    .map(|c| quote_ident(c))
    .collect::<Vec<_>>()
    .join(", ");
  let placeholders =
    q.values.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
  let sql = format!(
    "INSERT INTO {} ({columns}) VALUES ({placeholders})",
    quote_ident(&q.table)
  );
  (sql, q.values.iter().map(to_sql).collect())
}

pub fn render_update(q: &UpdateQuery) -> (String, Params) {
  let mut params: Params =
    q.assignments.iter().map(|(_, v)| to_sql(v)).collect();
  let assignments = q
    .assignments
    .iter()
    .map(|(c, _)| format!("{} = ?", quote_ident(c)))
    .collect::<Vec<_>>()
    .join(", ");

  let mut sql =
    format!("UPDATE {} SET {assignments}", quote_ident(&q.table));
  push_where(q.filter.as_ref(), &mut sql, &mut params);
  (sql, params)
}

pub fn render_delete(q: &DeleteQuery) -> (String, Params) {
  let mut params = Params::new();
  let mut sql = format!("DELETE FROM {}", quote_ident(&q.table));
  push_where(q.filter.as_ref(), &mut sql, &mut params);
  (sql, params)
}

pub fn render(query: &Query) -> (String, Params) {
  match query {
    Query::Select(q) => render_select(q),
    Query::Insert(q) => render_insert(q),
    Query::Update(q) => render_update(q),
    Query::Delete(q) => render_delete(q),
  }
}
