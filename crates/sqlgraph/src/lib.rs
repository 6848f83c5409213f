//! SQLGraph - aggregate persistence over relational tables.
//!
//! SQLGraph maps a tree of entities (an aggregate root plus nested
//! one-to-one and one-to-many children) onto normalized tables and keeps the
//! database and the in-memory tree synchronized:
//!
//! - Mapping metadata declared once per entity type, no runtime reflection
//! - Batched loading: one query per relation level, whatever the fan-out
//! - Snapshot diffing by identity key
//! - Cascading persistence in foreign-key-safe order, in one transaction
//! - Cancel-correct async operations built on asupersync
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlgraph::prelude::*;
//!
//! #[derive(Debug, Clone, Default)]
//! struct Order { id: i64, customer: String, lines: Vec<Line> }
//!
//! #[derive(Debug, Clone, Default)]
//! struct Line { id: i64, order_id: i64, sku: String }
//!
//! let orders = ClassMapping::builder::<Order>("orders", Order::default)
//!     .generated_key("id", |o| &o.id, |o| &mut o.id)
//!     .property("customer", |o| &o.customer, |o| &mut o.customer)
//!     .relation(
//!         RelationMapping::one_to_many::<Order, Line>("lines", |o| &o.lines, |o| &mut o.lines)
//!             .foreign_key(ForeignKeyDescriptor::new("order_id", "id").property("order_id")),
//!     )
//!     .build()?;
//! let lines = ClassMapping::builder::<Line>("lines", Line::default)
//!     .generated_key("id", |l| &l.id, |l| &mut l.id)
//!     .property("order_id", |l| &l.order_id, |l| &mut l.order_id)
//!     .property("sku", |l| &l.sku, |l| &mut l.sku)
//!     .build()?;
//! let registry = MappingRegistry::builder().register(orders).register(lines).build()?;
//!
//! let session = GraphSession::new(conn, Arc::new(registry));
//! let order: Order = session.fetch(&cx, &[Value::BigInt(5)]).await?;
//! let snapshot = session.snapshot(&order);
//!
//! let mut current = order;
//! current.lines.push(Line { sku: "C".into(), ..Line::default() });
//! let summary = session.synchronize(&cx, Some(&snapshot), Some(&mut current)).await?;
//! ```

pub use sqlgraph_core::{
    AnyEntity, ClassMapping, ClassMappingBuilder, Connection, Cx, Dialect, Entity, Error,
    Executor, FieldAccess, ForeignKeyDescriptor, FromValue, IdentityKey, IntegrityError,
    IntegrityErrorKind, KeyValue, MappingError, MappingErrorKind, MappingRegistry,
    MappingRegistryBuilder, NotFoundError, Outcome, PropertyMapping, RelationKind,
    RelationMapping, Result, Row, StatementError, SubsetColumn, TransactionOps, Value,
};

pub use sqlgraph_query::{
    BinaryOp, Constraints, DeleteStatement, Expr, InsertStatement, Limit, Offset, OrderBy,
    SelectStatement, UpdateStatement, Where,
};

pub use sqlgraph_session::{
    ChangeState, ChangeSummary, CompareResultItem, EntityPath, GraphSession, PersistOptions,
    PersistResult, PropertyFilter, Side, SyncConfig, TrackedGraph, compare, fetch_by_key,
    load, load_graph, persist, traverse,
};

/// Convenient imports for application code.
pub mod prelude {
    pub use crate::{
        // Core
        AnyEntity,
        ChangeState,
        ChangeSummary,
        ClassMapping,
        Connection,
        // Query building
        Constraints,
        Cx,
        Entity,
        Error,
        Expr,
        ForeignKeyDescriptor,
        // Session
        GraphSession,
        MappingRegistry,
        OrderBy,
        Outcome,
        RelationMapping,
        Result,
        Row,
        SyncConfig,
        Value,
    };
    pub use std::sync::Arc;
}
