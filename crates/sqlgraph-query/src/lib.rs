//! Dialect-aware SQL generation for SQLGraph.
//!
//! The graph engine needs a narrow slice of SQL: flat single-table SELECTs
//! with `IN` filters for batched child loads, filter/sort/paging injection
//! for root loads, and one INSERT, UPDATE or DELETE per entity. This crate
//! renders exactly that for PostgreSQL, SQLite and MySQL.

pub mod clause;
pub mod expr;
pub mod statement;

pub use clause::{Constraints, Limit, NullsOrder, Offset, OrderBy, OrderDirection, Where};
pub use expr::{BinaryOp, Expr};
pub use sqlgraph_core::Dialect;
pub use statement::{DeleteStatement, InsertStatement, SelectStatement, UpdateStatement};
