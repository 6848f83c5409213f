//! Cascading persistence of a compare result.
//!
//! Writes run in dependency-safe order:
//! - INSERT added members parent-first (depth ascending)
//! - DELETE removed members child-first (depth descending)
//! - UPDATE modified members
//!
//! Before each write the parent's referenced value is propagated into the
//! child's foreign key, either into the mapped property or as an extra
//! column on the statement when the child type has no such property.
//! Database-generated keys are written back into the current graph as soon
//! as the row is inserted, so descendants pick up the real id.

use crate::compare::{ChangeState, CompareResultItem, Side};
use crate::traversal::{resolve, resolve_mut};
use serde::{Deserialize, Serialize};
use sqlgraph_core::{
    ClassMapping, Cx, Dialect, Entity, Error, Executor, MappingError, MappingErrorKind,
    MappingRegistry, Outcome, Result, SubsetColumn, Value, is_unsaved_sentinel,
};
use sqlgraph_query::{DeleteStatement, Expr, InsertStatement, UpdateStatement};
use std::cmp::Reverse;

/// Result of a persist operation.
///
/// Counts are statements issued, not rows the database reported. An UPDATE
/// or DELETE that matched no row still counts; it is logged at `warn`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistResult {
    /// INSERT statements issued.
    pub inserted: usize,
    /// UPDATE statements issued.
    pub updated: usize,
    /// DELETE statements issued.
    pub deleted: usize,
}

impl PersistResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of statements issued.
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// Foreign-key handling for deletes and updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistOptions {
    /// Scope each DELETE by the parent's referenced value as well as the key.
    pub repropagate_on_delete: bool,
    /// Refresh the child's foreign key from its parent before each UPDATE.
    pub repropagate_on_update: bool,
}

impl Default for PersistOptions {
    fn default() -> Self {
        Self {
            repropagate_on_delete: true,
            repropagate_on_update: true,
        }
    }
}

/// The parent's referenced value, destined for the child's foreign key.
struct ForeignKeyValue {
    column: &'static str,
    property: Option<&'static str>,
    value: Value,
}

#[derive(Default)]
struct ParentLink {
    foreign_key: Option<ForeignKeyValue>,
    subset: Option<SubsetColumn>,
}

/// A rendered statement plus what is needed to report its failure.
struct PreparedWrite {
    sql: String,
    params: Vec<Value>,
    type_name: &'static str,
    entity: String,
    /// INSERT whose key the database generates.
    returns_id: bool,
}

/// Issue the INSERT, DELETE and UPDATE statements described by `items`.
///
/// `items` must come from comparing `snapshot` with `current`. Added and
/// modified members are read from `current`, which receives propagated
/// foreign keys and generated ids; removed members are read from `snapshot`,
/// which is never modified.
#[tracing::instrument(level = "debug", skip_all, fields(items = items.len()))]
pub async fn persist<E: Executor>(
    cx: &Cx,
    executor: &E,
    registry: &MappingRegistry,
    items: &[CompareResultItem],
    snapshot: Option<&dyn Entity>,
    mut current: Option<&mut dyn Entity>,
    options: PersistOptions,
) -> Outcome<PersistResult, Error> {
    let dialect = executor.dialect();
    let mut result = PersistResult::new();

    let mut added: Vec<&CompareResultItem> = items
        .iter()
        .filter(|i| i.state == ChangeState::Added)
        .collect();
    added.sort_by_key(|i| i.depth);
    let mut removed: Vec<&CompareResultItem> = items
        .iter()
        .filter(|i| i.state == ChangeState::Removed)
        .collect();
    removed.sort_by_key(|i| Reverse(i.depth));
    let modified: Vec<&CompareResultItem> = items
        .iter()
        .filter(|i| i.state == ChangeState::Modified)
        .collect();

    tracing::info!(
        inserts = added.len(),
        deletes = removed.len(),
        updates = modified.len(),
        "Persisting graph changes"
    );

    for item in added {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let Some(root) = current.as_deref_mut() else {
            return Outcome::Err(missing_graph(item, Side::Current));
        };
        let write = match prepare_insert(registry, item, snapshot, root, dialect) {
            Ok(w) => w,
            Err(e) => return Outcome::Err(e),
        };
        match execute(cx, executor, &write).await {
            Outcome::Ok(Some(id)) => {
                let Some(root) = current.as_deref_mut() else {
                    return Outcome::Err(missing_graph(item, Side::Current));
                };
                if let Err(e) = write_back(registry, root, item, id) {
                    return Outcome::Err(e);
                }
            }
            Outcome::Ok(None) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        result.inserted += 1;
    }

    for item in removed {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let write = match prepare_delete(
            registry,
            item,
            snapshot,
            current.as_deref(),
            dialect,
            options.repropagate_on_delete,
        ) {
            Ok(w) => w,
            Err(e) => return Outcome::Err(e),
        };
        match execute(cx, executor, &write).await {
            Outcome::Ok(_) => result.deleted += 1,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    }

    for item in modified {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let Some(root) = current.as_deref_mut() else {
            return Outcome::Err(missing_graph(item, Side::Current));
        };
        let write = match prepare_update(
            registry,
            item,
            snapshot,
            root,
            dialect,
            options.repropagate_on_update,
        ) {
            Ok(Some(w)) => w,
            Ok(None) => {
                tracing::trace!(entity = item.type_name, "No writable columns, skipping UPDATE");
                continue;
            }
            Err(e) => return Outcome::Err(e),
        };
        match execute(cx, executor, &write).await {
            Outcome::Ok(_) => result.updated += 1,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    }

    tracing::info!(
        inserted = result.inserted,
        updated = result.updated,
        deleted = result.deleted,
        "Graph changes persisted"
    );
    Outcome::Ok(result)
}

async fn execute<E: Executor>(
    cx: &Cx,
    executor: &E,
    write: &PreparedWrite,
) -> Outcome<Option<i64>, Error> {
    tracing::trace!(sql = %write.sql, entity = write.type_name, "Executing graph write");
    let outcome = if write.returns_id {
        executor
            .insert(cx, &write.sql, &write.params)
            .await
            .map(Some)
    } else {
        executor
            .execute(cx, &write.sql, &write.params)
            .await
            .map(|affected| {
                if affected == 0 {
                    tracing::warn!(
                        sql = %write.sql,
                        entity = %write.entity,
                        "Graph write matched no rows"
                    );
                }
                None
            })
    };
    match outcome {
        Outcome::Err(e) => Outcome::Err(Error::statement(
            e,
            write.sql.clone(),
            &write.params,
            Some(write.type_name),
            Some(write.entity.clone()),
        )),
        other => other,
    }
}

fn missing_graph(item: &CompareResultItem, side: Side) -> Error {
    Error::invalid_argument(format!(
        "{:?} {} needs the {side:?} graph, which was not given",
        item.state, item.type_name
    ))
}

/// Resolve the parent of `item` and, when `propagate` is set, the value its
/// foreign key must carry.
///
/// The parent is read from the same graph as the item: removed members take
/// the value their row was stored with, even when the parent still exists in
/// the current graph with a changed referenced property.
fn parent_link(
    registry: &MappingRegistry,
    item: &CompareResultItem,
    snapshot: Option<&dyn Entity>,
    current: Option<&dyn Entity>,
    propagate: bool,
) -> Result<ParentLink> {
    let (Some(parent_path), Some(relation_index)) = (item.path.parent(), item.relation) else {
        return Ok(ParentLink::default());
    };
    let root = match item.side {
        Side::Current => current,
        Side::Snapshot => snapshot,
    }
    .ok_or_else(|| missing_graph(item, item.side))?;
    let parent = resolve(registry, root, &parent_path)?;
    let parent_mapping = registry.mapping_for(parent)?;
    let relation = parent_mapping.relation_at(relation_index)?;
    let subset = relation.subset_column().cloned();
    if !propagate {
        return Ok(ParentLink {
            foreign_key: None,
            subset,
        });
    }

    let fk = relation.foreign_key_for(item.type_id).ok_or_else(|| {
        MappingError::new(
            MappingErrorKind::MissingForeignKey,
            format!(
                "relation '{}' has no foreign key for {}",
                relation.name(),
                item.type_name
            ),
        )
        .with_type(parent_mapping.type_name())
        .with_related(item.type_name)
    })?;

    let referenced = parent_mapping.require_property(fk.referenced)?;
    let value = referenced.get(parent)?;
    if value.is_null() || (referenced.is_generated() && is_unsaved_sentinel(&value)) {
        return Err(MappingError::new(
            MappingErrorKind::KeyGeneration,
            format!(
                "{} has no value for '{}' to give {}",
                parent_mapping.type_name(),
                fk.referenced,
                item.type_name
            ),
        )
        .with_type(parent_mapping.type_name())
        .with_related(item.type_name)
        .into());
    }

    Ok(ParentLink {
        foreign_key: Some(ForeignKeyValue {
            column: fk.column,
            property: fk.property,
            value,
        }),
        subset,
    })
}

/// Store the foreign key on the entity, or return it as an extra column.
fn apply_foreign_key(
    mapping: &ClassMapping,
    entity: &mut dyn Entity,
    foreign_key: Option<ForeignKeyValue>,
) -> Result<Option<(&'static str, Value)>> {
    match foreign_key {
        Some(ForeignKeyValue {
            property: Some(property),
            value,
            ..
        }) => {
            mapping.require_property(property)?.set(entity, &value)?;
            Ok(None)
        }
        Some(ForeignKeyValue {
            column,
            property: None,
            value,
        }) => Ok(Some((column, value))),
        None => Ok(None),
    }
}

fn key_filter(mapping: &ClassMapping, entity: &dyn Entity) -> Result<Expr> {
    let conditions = mapping
        .keys()
        .iter()
        .map(|k| Ok(Expr::col(k.column()).eq(k.get(entity)?)))
        .collect::<Result<Vec<_>>>()?;
    Expr::all(conditions).ok_or_else(|| {
        MappingError::new(MappingErrorKind::MissingKey, "no key columns to address the row")
            .with_type(mapping.type_name())
            .into()
    })
}

fn prepare_insert(
    registry: &MappingRegistry,
    item: &CompareResultItem,
    snapshot: Option<&dyn Entity>,
    current: &mut dyn Entity,
    dialect: Dialect,
) -> Result<PreparedWrite> {
    let link = parent_link(registry, item, snapshot, Some(&*current), true)?;
    let mapping = registry.get_mapping(item.type_id)?;
    let entity = resolve_mut(registry, current, &item.path)?;
    let extra = apply_foreign_key(mapping, entity, link.foreign_key)?;

    let mut statement = InsertStatement::new(mapping.table());
    let mut returns_id = false;
    for key in mapping.keys() {
        let value = key.get(entity)?;
        if key.is_generated() && is_unsaved_sentinel(&value) {
            returns_id = true;
            continue;
        }
        statement = statement.value(key.column(), value);
    }
    for property in mapping.writable_properties() {
        statement = statement.value(property.column(), property.get(entity)?);
    }
    if let Some((column, value)) = extra {
        statement = statement.value(column, value);
    }
    if let Some(subset) = link.subset {
        statement = statement.value(subset.column, subset.value);
    }

    let (sql, params) = statement.build(dialect);
    Ok(PreparedWrite {
        sql,
        params,
        type_name: mapping.type_name(),
        entity: mapping.describe(entity),
        returns_id,
    })
}

fn write_back(
    registry: &MappingRegistry,
    current: &mut dyn Entity,
    item: &CompareResultItem,
    id: i64,
) -> Result<()> {
    let mapping = registry.get_mapping(item.type_id)?;
    let Some(generated) = mapping.generated_key() else {
        return Ok(());
    };
    let entity = resolve_mut(registry, current, &item.path)?;
    generated.set(entity, &Value::BigInt(id))?;
    tracing::debug!(entity = item.type_name, id, "Assigned generated key");
    Ok(())
}

fn prepare_delete(
    registry: &MappingRegistry,
    item: &CompareResultItem,
    snapshot: Option<&dyn Entity>,
    current: Option<&dyn Entity>,
    dialect: Dialect,
    propagate: bool,
) -> Result<PreparedWrite> {
    let link = parent_link(registry, item, snapshot, current, propagate)?;
    let mapping = registry.get_mapping(item.type_id)?;
    let root = snapshot.ok_or_else(|| missing_graph(item, Side::Snapshot))?;
    let entity = resolve(registry, root, &item.path)?;

    let mut statement = DeleteStatement::new(mapping.table()).filter(key_filter(mapping, entity)?);
    if let Some(fk) = link.foreign_key {
        if !mapping.keys().iter().any(|k| k.column() == fk.column) {
            statement = statement.filter(Expr::col(fk.column).eq(fk.value));
        }
    }
    if let Some(subset) = link.subset {
        statement = statement.filter(Expr::col(subset.column).eq(subset.value));
    }

    let (sql, params) = statement.build(dialect);
    Ok(PreparedWrite {
        sql,
        params,
        type_name: mapping.type_name(),
        entity: mapping.describe(entity),
        returns_id: false,
    })
}

fn prepare_update(
    registry: &MappingRegistry,
    item: &CompareResultItem,
    snapshot: Option<&dyn Entity>,
    current: &mut dyn Entity,
    dialect: Dialect,
    propagate: bool,
) -> Result<Option<PreparedWrite>> {
    let link = parent_link(registry, item, snapshot, Some(&*current), propagate)?;
    let mapping = registry.get_mapping(item.type_id)?;
    let entity = resolve_mut(registry, current, &item.path)?;
    let extra = apply_foreign_key(mapping, entity, link.foreign_key)?;

    let mut statement = UpdateStatement::new(mapping.table());
    for property in mapping.writable_properties() {
        statement = statement.set(property.column(), property.get(entity)?);
    }
    if let Some((column, value)) = extra {
        statement = statement.set(column, value);
    }
    if statement.is_empty() {
        return Ok(None);
    }
    statement = statement.filter(key_filter(mapping, entity)?);
    if let Some(subset) = link.subset {
        statement = statement.filter(Expr::col(subset.column).eq(subset.value));
    }

    let (sql, params) = statement.build(dialect);
    Ok(Some(PreparedWrite {
        sql,
        params,
        type_name: mapping.type_name(),
        entity: mapping.describe(entity),
        returns_id: false,
    }))
}
