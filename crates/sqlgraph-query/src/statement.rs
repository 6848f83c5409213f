//! Flat statement builders for SELECT, INSERT, UPDATE and DELETE.
//!
//! Each builder renders to `(sql, params)` for a given [`Dialect`], with
//! quoted identifiers and numbered placeholders. The graph engine builds one
//! statement per entity (writes) or per relation level (reads).

use crate::clause::{Constraints, Limit, Offset, OrderBy};
use crate::expr::Expr;
use sqlgraph_core::{Dialect, Value};

fn quote_list(dialect: Dialect, columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| dialect.quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// SELECT query builder.
#[derive(Debug, Clone)]
pub struct SelectStatement {
    table: String,
    columns: Vec<String>,
    filter: Option<Expr>,
    order_by: Vec<OrderBy>,
    limit: Option<Limit>,
    offset: Option<Offset>,
}

impl SelectStatement {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            filter: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Select these columns instead of `*`.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add a filter condition; several calls are ANDed.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(Limit(n));
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(Offset(n));
        self
    }

    /// Apply a load's filter, sort and paging.
    pub fn constrain(mut self, constraints: &Constraints) -> Self {
        if let Some(filter) = &constraints.filter {
            // Parenthesize so an OR in the caller's filter cannot escape.
            self = self.filter(filter.expr().clone().paren());
        }
        self.order_by.extend(constraints.order_by.iter().cloned());
        if constraints.limit.is_some() {
            self.limit = constraints.limit;
        }
        if constraints.offset.is_some() {
            self.offset = constraints.offset;
        }
        self
    }

    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            quote_list(dialect, &self.columns)
        };
        let mut sql = format!(
            "SELECT {} FROM {}",
            columns,
            dialect.quote_identifier(&self.table)
        );

        if let Some(filter) = &self.filter {
            let where_sql = filter.build_with_dialect(dialect, &mut params, 0);
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }

        if !self.order_by.is_empty() {
            let terms: Vec<_> = self.order_by.iter().map(|o| o.to_sql(dialect)).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        if let Some(Limit(n)) = self.limit {
            sql.push_str(&format!(" LIMIT {n}"));
        }

        if let Some(Offset(n)) = self.offset {
            sql.push_str(&format!(" OFFSET {n}"));
        }

        (sql, params)
    }
}

/// INSERT statement builder.
#[derive(Debug, Clone)]
pub struct InsertStatement {
    table: String,
    columns: Vec<String>,
    values: Vec<Value>,
}

impl InsertStatement {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Set a column, replacing an earlier value for the same column.
    pub fn value(mut self, column: impl Into<String>, value: Value) -> Self {
        let column = column.into();
        if let Some(i) = self.columns.iter().position(|c| *c == column) {
            self.values[i] = value;
        } else {
            self.columns.push(column);
            self.values.push(value);
        }
        self
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let table = dialect.quote_identifier(&self.table);
        if self.columns.is_empty() {
            let sql = match dialect {
                Dialect::Mysql => format!("INSERT INTO {table} () VALUES ()"),
                Dialect::Postgres | Dialect::Sqlite => {
                    format!("INSERT INTO {table} DEFAULT VALUES")
                }
            };
            return (sql, Vec::new());
        }

        let placeholders: Vec<_> = (1..=self.values.len())
            .map(|i| dialect.placeholder(i))
            .collect();

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            quote_list(dialect, &self.columns),
            placeholders.join(", ")
        );

        (sql, self.values.clone())
    }
}

/// UPDATE statement builder.
#[derive(Debug, Clone)]
pub struct UpdateStatement {
    table: String,
    set: Vec<(String, Value)>,
    filter: Option<Expr>,
}

impl UpdateStatement {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            set: Vec::new(),
            filter: None,
        }
    }

    /// Set a column, replacing an earlier value for the same column.
    pub fn set(mut self, column: impl Into<String>, value: Value) -> Self {
        let column = column.into();
        if let Some(entry) = self.set.iter_mut().find(|(c, _)| *c == column) {
            entry.1 = value;
        } else {
            self.set.push((column, value));
        }
        self
    }

    /// Add a WHERE condition; several calls are ANDed.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    /// Nothing to set means nothing to issue.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut set_clauses = Vec::new();

        for (i, (name, value)) in self.set.iter().enumerate() {
            set_clauses.push(format!(
                "{} = {}",
                dialect.quote_identifier(name),
                dialect.placeholder(i + 1)
            ));
            params.push(value.clone());
        }

        let mut sql = format!(
            "UPDATE {} SET {}",
            dialect.quote_identifier(&self.table),
            set_clauses.join(", ")
        );

        if let Some(filter) = &self.filter {
            let where_sql = filter.build_with_dialect(dialect, &mut params, 0);
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }

        (sql, params)
    }
}

/// DELETE statement builder.
#[derive(Debug, Clone)]
pub struct DeleteStatement {
    table: String,
    filter: Option<Expr>,
}

impl DeleteStatement {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: None,
        }
    }

    /// Add a WHERE condition; several calls are ANDed.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", dialect.quote_identifier(&self.table));

        if let Some(filter) = &self.filter {
            let where_sql = filter.build_with_dialect(dialect, &mut params, 0);
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }

        (sql, params)
    }
}
