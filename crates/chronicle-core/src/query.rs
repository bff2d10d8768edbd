//! The typed query surface between the host query layer and the engine.
//!
//! Queries are tagged variants with explicit field/value lists, a predicate
//! tree, and a join list — not an open-ended mutable bag. The interceptor
//! answers with a [`HookOutcome`]: leave the query alone, suppress it, or
//! replace it wholesale.

use serde::{Deserialize, Serialize};

use crate::value::Value;

// ─── Column references ───────────────────────────────────────────────────────

/// A possibly-qualified column reference inside a predicate or join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRef {
  /// Table name or alias; `None` means the query's base table.
  pub table:  Option<String>,
  pub column: String,
}

impl ColumnRef {
  pub fn bare(column: impl Into<String>) -> Self {
    Self { table: None, column: column.into() }
  }

  pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
    Self { table: Some(table.into()), column: column.into() }
  }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
  Column(ColumnRef),
  Value(Value),
}

// ─── Filter tree ─────────────────────────────────────────────────────────────

/// A predicate tree over column references and values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
  Eq(ColumnRef, Operand),
  Ne(ColumnRef, Operand),
  Lt(ColumnRef, Operand),
  Le(ColumnRef, Operand),
  Gt(ColumnRef, Operand),
  Ge(ColumnRef, Operand),
  IsNull(ColumnRef),
  And(Vec<Filter>),
  Or(Vec<Filter>),
}

impl Filter {
  /// `column = value` against the base table.
  pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
    Self::Eq(ColumnRef::bare(column), Operand::Value(value.into()))
  }

  /// Conjoin with another predicate, flattening nested `And`s.
  pub fn and(self, other: Filter) -> Self {
    match self {
      Self::And(mut parts) => {
        parts.push(other);
        Self::And(parts)
      }
      first => Self::And(vec![first, other]),
    }
  }

  /// The top-level conjuncts: the filter itself unless it is an `And`.
  pub fn conjuncts(&self) -> Vec<&Filter> {
    match self {
      Self::And(parts) => parts.iter().flat_map(|p| p.conjuncts()).collect(),
      other => vec![other],
    }
  }

  /// If this predicate pins `column` (of the base table or `alias`) to a
  /// single value via an equality conjunct, return that value.
  pub fn pinned_value(&self, alias: Option<&str>, column: &str) -> Option<&Value> {
    for conjunct in self.conjuncts() {
      if let Self::Eq(col, Operand::Value(v)) = conjunct {
        let table_matches = match (&col.table, alias) {
          (None, _) => true,
          (Some(t), Some(a)) => t == a,
          (Some(_), None) => false,
        };
        if table_matches && col.column == column {
          return Some(v);
        }
      }
    }
    None
  }

  /// Whether any leaf of the tree references `table.column`.
  pub fn mentions(&self, table: &str, column: &str) -> bool {
    let col_matches = |c: &ColumnRef| {
      c.column == column && c.table.as_deref() == Some(table)
    };
    let op_matches = |o: &Operand| match o {
      Operand::Column(c) => col_matches(c),
      Operand::Value(_) => false,
    };
    match self {
      Self::Eq(c, o)
      | Self::Ne(c, o)
      | Self::Lt(c, o)
      | Self::Le(c, o)
      | Self::Gt(c, o)
      | Self::Ge(c, o) => col_matches(c) || op_matches(o),
      Self::IsNull(c) => col_matches(c),
      Self::And(parts) | Self::Or(parts) => {
        parts.iter().any(|p| p.mentions(table, column))
      }
    }
  }
}

// ─── Queries ─────────────────────────────────────────────────────────────────

/// One joined table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
  pub table: String,
  pub alias: Option<String>,
  pub on:    Filter,
}

impl Join {
  /// The name other parts of the query refer to this join by.
  pub fn name(&self) -> &str { self.alias.as_deref().unwrap_or(&self.table) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectQuery {
  pub table:   String,
  pub alias:   Option<String>,
  /// Select list, rendered verbatim; empty means `*`.
  pub columns: Vec<String>,
  pub filter:  Option<Filter>,
  pub joins:   Vec<Join>,
}

impl SelectQuery {
  pub fn from(table: impl Into<String>) -> Self {
    Self {
      table:   table.into(),
      alias:   None,
      columns: Vec::new(),
      filter:  None,
      joins:   Vec::new(),
    }
  }

  pub fn with_filter(mut self, filter: Filter) -> Self {
    self.filter = Some(filter);
    self
  }

  /// The name predicates refer to the base table by.
  pub fn base_name(&self) -> &str { self.alias.as_deref().unwrap_or(&self.table) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertQuery {
  pub table:   String,
  pub columns: Vec<String>,
  pub values:  Vec<Value>,
}

impl InsertQuery {
  pub fn into(table: impl Into<String>) -> Self {
    Self { table: table.into(), columns: Vec::new(), values: Vec::new() }
  }

  pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
    self.columns.push(column.into());
    self.values.push(value.into());
    self
  }

  /// The value supplied for `column`, if any.
  pub fn value_of(&self, column: &str) -> Option<&Value> {
    self
      .columns
      .iter()
      .position(|c| c == column)
      .map(|i| &self.values[i])
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateQuery {
  pub table:       String,
  pub assignments: Vec<(String, Value)>,
  pub filter:      Option<Filter>,
}

impl UpdateQuery {
  pub fn table(table: impl Into<String>) -> Self {
    Self { table: table.into(), assignments: Vec::new(), filter: None }
  }

  pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
    self.assignments.push((column.into(), value.into()));
    self
  }

  pub fn with_filter(mut self, filter: Filter) -> Self {
    self.filter = Some(filter);
    self
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteQuery {
  pub table:  String,
  pub filter: Option<Filter>,
}

impl DeleteQuery {
  pub fn from(table: impl Into<String>) -> Self {
    Self { table: table.into(), filter: None }
  }

  pub fn with_filter(mut self, filter: Filter) -> Self {
    self.filter = Some(filter);
    self
  }
}

/// A query passed through the interceptor hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Query {
  Select(SelectQuery),
  Insert(InsertQuery),
  Update(UpdateQuery),
  Delete(DeleteQuery),
}

impl Query {
  pub fn table(&self) -> &str {
    match self {
      Self::Select(q) => &q.table,
      Self::Insert(q) => &q.table,
      Self::Update(q) => &q.table,
      Self::Delete(q) => &q.table,
    }
  }

  pub fn is_write(&self) -> bool { !matches!(self, Self::Select(_)) }
}

// ─── Hook outcome ────────────────────────────────────────────────────────────

/// The interceptor's verdict on a query.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
  /// Execute the query as given.
  Unchanged,
  /// Do not execute the query; the interceptor has already done (or
  /// absorbed) the work.
  Suppressed,
  /// Execute this query instead of the original.
  Replaced(Query),
}
