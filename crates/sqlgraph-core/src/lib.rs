//! Core types and traits for SQLGraph.
//!
//! This crate provides the foundations the graph engine is built on:
//!
//! - `Value` / `Row` for dynamically-typed SQL data
//! - `Executor` / `Connection` / `TransactionOps` for the database seam
//! - `Entity` for type-erased aggregate members
//! - `ClassMapping` and `MappingRegistry` for statically declared mapping metadata
//! - `IdentityKey` for recognizing the same row across two copies of a graph
//! - `Outcome` and `Cx` re-exported from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod connection;
pub mod entity;
pub mod error;
pub mod field;
pub mod identity;
pub mod model;
pub mod registry;
pub mod relationship;
pub mod row;
pub mod value;

pub use connection::{Connection, Dialect, Executor, TransactionOps};
pub use entity::{AnyEntity, Entity, entity_type_id, live_identity};
pub use error::{
    Error, IntegrityError, IntegrityErrorKind, MappingError, MappingErrorKind, NotFoundError,
    Result, StatementError,
};
pub use field::{FieldAccess, PropertyAccess, PropertyMapping};
pub use identity::{IdentityKey, hash_values};
pub use model::{ClassMapping, ClassMappingBuilder, is_unsaved_sentinel};
pub use registry::{MappingRegistry, MappingRegistryBuilder};
pub use relationship::{
    ForeignKeyDescriptor, RelationAccess, RelationKind, RelationMapping, RelationOrder,
    RelationTarget, SubsetColumn,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::{KeyValue, Value};
