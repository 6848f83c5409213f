//! Graph synchronization engine for SQLGraph.
//!
//! `sqlgraph-session` keeps a database and an in-memory aggregate in step
//! across a request:
//!
//! - **Loading** ([`loader`]): one root query, then one batched query per
//!   relation level, with children routed to their parents by foreign key.
//! - **Snapshots**: a deep copy of the loaded aggregate, kept as the baseline.
//! - **Diffing** ([`compare`](mod@compare)): classifies every member of the later copy
//!   against the snapshot by identity key.
//! - **Persisting** ([`persist`]): parent-first inserts, child-first deletes,
//!   then updates, all inside one transaction.
//!
//! # Example
//!
//! ```ignore
//! let session = GraphSession::new(conn, Arc::new(registry));
//!
//! let order = unwrap(session.fetch::<Order>(&cx, &[Value::BigInt(5)]).await);
//! let snapshot = session.snapshot(&order);
//!
//! let mut current = order;
//! current.lines.push(Line::new("C"));
//!
//! let summary = session.synchronize(&cx, Some(&snapshot), Some(&mut current)).await;
//! ```

pub mod compare;
pub mod loader;
pub mod persist;
pub mod traversal;

#[cfg(test)]
mod testing;

pub use compare::{ChangeState, CompareResultItem, PropertyFilter, Side, compare, count};
pub use loader::{fetch_by_key, load, load_graph};
pub use persist::{PersistOptions, PersistResult, persist};
pub use traversal::{
    EntityPath, PathSegment, TrackedEntity, TrackedGraph, resolve, resolve_mut, traverse,
};

use serde::{Deserialize, Serialize};
use sqlgraph_core::{
    ClassMapping, Connection, Cx, Entity, Error, MappingRegistry, Outcome, PropertyMapping,
    Result, TransactionOps, Value,
};
use sqlgraph_query::Constraints;
use std::fmt;
use std::sync::Arc;

/// Configuration for a [`GraphSession`].
#[derive(Clone)]
pub struct SyncConfig {
    /// Scope DELETEs by the parent's referenced value.
    pub repropagate_on_delete: bool,
    /// Refresh foreign keys from the parent before each UPDATE.
    pub repropagate_on_update: bool,
    /// Decides which writable properties take part in change detection.
    pub property_filter: Option<Arc<PropertyFilter>>,
    /// Whether [`GraphSession::fetch`] loads the full aggregate.
    pub load_children: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            repropagate_on_delete: true,
            repropagate_on_update: true,
            property_filter: None,
            load_children: true,
        }
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("repropagate_on_delete", &self.repropagate_on_delete)
            .field("repropagate_on_update", &self.repropagate_on_update)
            .field("property_filter", &self.property_filter.is_some())
            .field("load_children", &self.load_children)
            .finish()
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn repropagate_on_delete(mut self, value: bool) -> Self {
        self.repropagate_on_delete = value;
        self
    }

    #[must_use]
    pub fn repropagate_on_update(mut self, value: bool) -> Self {
        self.repropagate_on_update = value;
        self
    }

    /// Only properties for which `filter` returns true are compared.
    #[must_use]
    pub fn property_filter(
        mut self,
        filter: impl Fn(&ClassMapping, &PropertyMapping) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.property_filter = Some(Arc::new(filter));
        self
    }

    #[must_use]
    pub fn load_children(mut self, value: bool) -> Self {
        self.load_children = value;
        self
    }

    fn persist_options(&self) -> PersistOptions {
        PersistOptions {
            repropagate_on_delete: self.repropagate_on_delete,
            repropagate_on_update: self.repropagate_on_update,
        }
    }
}

/// What a [`GraphSession::synchronize`] call found and wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    /// Classification of the aggregate root.
    pub root: Option<ChangeState>,
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub unmodified: usize,
    /// Statements issued by the persist step.
    pub statements: PersistResult,
}

impl ChangeSummary {
    /// Summarize a compare result and the statements that persisted it.
    pub fn from_items(items: &[CompareResultItem], statements: PersistResult) -> Self {
        let root = items
            .iter()
            .find(|i| i.is_root() && i.side == Side::Current)
            .or_else(|| items.iter().find(|i| i.is_root()))
            .map(|i| i.state);
        Self {
            root,
            added: count(items, ChangeState::Added),
            removed: count(items, ChangeState::Removed),
            modified: count(items, ChangeState::Modified),
            unmodified: count(items, ChangeState::Unmodified),
            statements,
        }
    }

    /// Whether anything was written.
    pub fn has_changes(&self) -> bool {
        self.statements.total() > 0
    }
}

/// Application surface: load, snapshot, diff and synchronize aggregates
/// over one connection.
pub struct GraphSession<C: Connection> {
    connection: C,
    registry: Arc<MappingRegistry>,
    config: SyncConfig,
}

impl<C: Connection> fmt::Debug for GraphSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphSession")
            .field("registry", &self.registry.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<C: Connection> GraphSession<C> {
    pub fn new(connection: C, registry: Arc<MappingRegistry>) -> Self {
        Self::with_config(connection, registry, SyncConfig::default())
    }

    pub fn with_config(connection: C, registry: Arc<MappingRegistry>, config: SyncConfig) -> Self {
        Self {
            connection,
            registry,
            config,
        }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn registry(&self) -> &MappingRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Give the connection back, e.g. to close it.
    pub fn into_connection(self) -> C {
        self.connection
    }

    /// Load every `T` matching `constraints`, with or without its children.
    ///
    /// An empty result is not an error.
    pub async fn load_graph<T: Entity>(
        &self,
        cx: &Cx,
        constraints: &Constraints,
        load_children: bool,
    ) -> Outcome<Vec<T>, Error> {
        load_graph::<T, C>(cx, &self.connection, &self.registry, constraints, load_children).await
    }

    /// Load the `T` with the given key values.
    ///
    /// Children are loaded when [`SyncConfig::load_children`] is set. Finding
    /// no row is [`Error::NotFound`].
    pub async fn fetch<T: Entity>(&self, cx: &Cx, key: &[Value]) -> Outcome<T, Error> {
        fetch_by_key::<T, C>(
            cx,
            &self.connection,
            &self.registry,
            key,
            self.config.load_children,
        )
        .await
    }

    /// Deep copy of `entity`, to be kept as the baseline for a later diff.
    pub fn snapshot<T: Entity + Clone>(&self, entity: &T) -> T {
        entity.clone()
    }

    /// Diff `current` against `snapshot`. Neither graph is modified.
    pub fn compare<T: Entity>(
        &self,
        snapshot: Option<&T>,
        current: Option<&T>,
    ) -> Result<Vec<CompareResultItem>> {
        compare::compare(
            &self.registry,
            snapshot.map(|s| s as &dyn Entity),
            current.map(|c| c as &dyn Entity),
            self.config.property_filter.as_deref(),
        )
    }

    /// Diff `current` against `snapshot` and write the differences in one
    /// transaction.
    ///
    /// The transaction is committed when every statement succeeds and rolled
    /// back on any error or cancellation. Generated keys and propagated
    /// foreign keys are written into `current`.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn synchronize<T: Entity>(
        &self,
        cx: &Cx,
        snapshot: Option<&T>,
        current: Option<&mut T>,
    ) -> Outcome<ChangeSummary, Error> {
        let items = match self.compare(snapshot, current.as_deref()) {
            Ok(items) => items,
            Err(e) => return Outcome::Err(e),
        };

        let tx = match self.connection.begin(cx).await {
            Outcome::Ok(tx) => tx,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let outcome = persist(
            cx,
            &tx,
            &self.registry,
            &items,
            snapshot.map(|s| s as &dyn Entity),
            current.map(|c| c as &mut dyn Entity),
            self.config.persist_options(),
        )
        .await;

        match outcome {
            Outcome::Ok(statements) => match tx.commit(cx).await {
                Outcome::Ok(()) => {
                    let summary = ChangeSummary::from_items(&items, statements);
                    tracing::info!(
                        root = ?summary.root,
                        added = summary.added,
                        removed = summary.removed,
                        modified = summary.modified,
                        "Graph synchronized"
                    );
                    Outcome::Ok(summary)
                }
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            },
            Outcome::Err(e) => {
                tracing::warn!(error = %e, "Synchronize failed, rolling back");
                roll_back(cx, tx).await;
                Outcome::Err(e)
            }
            Outcome::Cancelled(r) => {
                tracing::warn!("Synchronize cancelled, rolling back");
                roll_back(cx, tx).await;
                Outcome::Cancelled(r)
            }
            Outcome::Panicked(p) => {
                roll_back(cx, tx).await;
                Outcome::Panicked(p)
            }
        }
    }
}

async fn roll_back<T: TransactionOps>(cx: &Cx, tx: T) {
    if let Outcome::Err(e) = tx.rollback(cx).await {
        tracing::warn!(error = %e, "Rollback failed");
    }
}
