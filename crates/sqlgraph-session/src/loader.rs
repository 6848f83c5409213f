//! Batched hierarchical loading.
//!
//! One query fetches the root rows. Each further relation level is fetched
//! with one query per (parent type, relation, child type), constrained by
//! `foreign_key IN (referenced values of every loaded parent)`, so a wide
//! fan-out costs one round trip per level instead of one per parent.
//!
//! Fetched rows are routed to their parents through an index keyed by the
//! parent's referenced value. A row whose foreign key matches no parent is a
//! structural-integrity error. Entities are assembled bottom-up once every
//! level has loaded.

use sqlgraph_core::{
    Cx, Dialect, Entity, Error, Executor, IntegrityError, IntegrityErrorKind, KeyValue,
    MappingError, MappingErrorKind, MappingRegistry, NotFoundError, Outcome, RelationKind,
    RelationMapping, RelationTarget, Result, Row, Value, entity_type_id,
};
use sqlgraph_query::{Constraints, Expr, OrderBy, SelectStatement};
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::ops::Range;

/// An entity loaded but not yet attached to its parent.
struct LoadedNode {
    entity: Option<Box<dyn Entity>>,
    parent: Option<usize>,
    /// Relation index on the parent's mapping.
    relation: usize,
}

fn detached(index: usize) -> Error {
    Error::Custom(format!("loaded node {index} was already attached"))
}

fn loaded(nodes: &[LoadedNode], index: usize) -> Result<&dyn Entity> {
    nodes[index].entity.as_deref().ok_or_else(|| detached(index))
}

/// One batched child query, ready to run.
struct RelationFetch {
    parent_type_name: &'static str,
    relation_index: usize,
    relation_name: &'static str,
    kind: RelationKind,
    child_type: TypeId,
    child_type_name: &'static str,
    fk_column: &'static str,
    sql: String,
    params: Vec<Value>,
    /// Referenced value to the parents carrying it.
    parents: HashMap<KeyValue, Vec<usize>>,
    parent_count: usize,
}

/// Load every root of type `root` matching `constraints`, optionally with
/// their full child graphs.
#[tracing::instrument(level = "debug", skip(cx, executor, registry, constraints))]
pub async fn load<E: Executor>(
    cx: &Cx,
    executor: &E,
    registry: &MappingRegistry,
    root: TypeId,
    constraints: &Constraints,
    load_children: bool,
) -> Outcome<Vec<Box<dyn Entity>>, Error> {
    let mapping = match registry.get_mapping(root) {
        Ok(m) => m,
        Err(e) => return Outcome::Err(e),
    };
    let dialect = executor.dialect();

    let (sql, params) = SelectStatement::new(mapping.table())
        .columns(mapping.columns().map(|p| p.column()))
        .constrain(constraints)
        .build(dialect);
    tracing::trace!(sql = %sql, "Loading roots");

    let rows = match executor.query(cx, &sql, &params).await {
        Outcome::Ok(rows) => rows,
        Outcome::Err(e) => {
            return Outcome::Err(Error::statement(
                e,
                sql,
                &params,
                Some(mapping.type_name()),
                None,
            ));
        }
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let mut nodes = Vec::with_capacity(rows.len());
    for row in &rows {
        match mapping.hydrate(row) {
            Ok(entity) => nodes.push(LoadedNode {
                entity: Some(entity),
                parent: None,
                relation: 0,
            }),
            Err(e) => return Outcome::Err(e),
        }
    }
    let root_count = nodes.len();
    tracing::debug!(table = mapping.table(), count = root_count, "Loaded roots");

    let mut levels = vec![0..root_count];
    if load_children {
        let mut level: Vec<usize> = (0..root_count).collect();
        let mut depth = 1;
        while !level.is_empty() {
            let fetches = match plan_level(registry, dialect, &nodes, &level) {
                Ok(f) => f,
                Err(e) => return Outcome::Err(e),
            };
            if fetches.is_empty() {
                break;
            }

            let start = nodes.len();
            for fetch in fetches {
                tracing::info!(
                    parent_model = fetch.parent_type_name,
                    related_model = fetch.child_type_name,
                    relation = fetch.relation_name,
                    parent_count = fetch.parent_count,
                    query_parent_count = fetch.parents.len(),
                    depth,
                    "Batch loading relationship"
                );
                tracing::trace!(sql = %fetch.sql, "Executing batched child query");

                let rows = match executor.query(cx, &fetch.sql, &fetch.params).await {
                    Outcome::Ok(rows) => rows,
                    Outcome::Err(e) => {
                        return Outcome::Err(Error::statement(
                            e,
                            fetch.sql,
                            &fetch.params,
                            Some(fetch.child_type_name),
                            None,
                        ));
                    }
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                };

                if let Err(e) = route_rows(registry, &mut nodes, &fetch, &rows) {
                    return Outcome::Err(e);
                }
            }

            tracing::debug!(depth, count = nodes.len() - start, "Loaded relation level");
            levels.push(start..nodes.len());
            level = (start..nodes.len()).collect();
            depth += 1;
        }
    }

    match assemble(registry, nodes, &levels) {
        Ok(roots) => Outcome::Ok(roots),
        Err(e) => Outcome::Err(e),
    }
}

/// Load typed roots; see [`load`].
pub async fn load_graph<T: Entity, E: Executor>(
    cx: &Cx,
    executor: &E,
    registry: &MappingRegistry,
    constraints: &Constraints,
    load_children: bool,
) -> Outcome<Vec<T>, Error> {
    let roots = match load(cx, executor, registry, TypeId::of::<T>(), constraints, load_children)
        .await
    {
        Outcome::Ok(roots) => roots,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };
    match roots.into_iter().map(downcast_root::<T>).collect::<Result<Vec<T>>>() {
        Ok(typed) => Outcome::Ok(typed),
        Err(e) => Outcome::Err(e),
    }
}

/// Load the one `T` whose key fields equal `key`.
///
/// Finding no row is [`Error::NotFound`].
pub async fn fetch_by_key<T: Entity, E: Executor>(
    cx: &Cx,
    executor: &E,
    registry: &MappingRegistry,
    key: &[Value],
    load_children: bool,
) -> Outcome<T, Error> {
    let mapping = match registry.mapping_of::<T>() {
        Ok(m) => m,
        Err(e) => return Outcome::Err(e),
    };
    if key.len() != mapping.keys().len() {
        return Outcome::Err(Error::invalid_argument(format!(
            "{} has {} key fields but {} values were given",
            mapping.type_name(),
            mapping.keys().len(),
            key.len()
        )));
    }

    let columns: Vec<&str> = mapping.keys().iter().map(|k| k.column()).collect();
    let constraints = Constraints::by_key(&columns, key);
    match load_graph::<T, E>(cx, executor, registry, &constraints, load_children).await {
        Outcome::Ok(mut roots) => {
            if roots.is_empty() {
                Outcome::Err(Error::NotFound(NotFoundError {
                    type_name: mapping.type_name(),
                    key: key.to_vec(),
                }))
            } else {
                Outcome::Ok(roots.swap_remove(0))
            }
        }
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

fn downcast_root<T: Entity>(entity: Box<dyn Entity>) -> Result<T> {
    let name = entity.entity_type_name();
    entity.into_any().downcast::<T>().map(|b| *b).map_err(|_| {
        MappingError::new(
            MappingErrorKind::TypeMismatch,
            format!("loaded {name} where {} was requested", std::any::type_name::<T>()),
        )
        .with_type(std::any::type_name::<T>())
        .with_related(name)
        .into()
    })
}

/// Plan the batched queries for the children of `level`.
fn plan_level(
    registry: &MappingRegistry,
    dialect: Dialect,
    nodes: &[LoadedNode],
    level: &[usize],
) -> Result<Vec<RelationFetch>> {
    // Group parents by concrete type, keeping first-seen order.
    let mut by_type: Vec<(TypeId, Vec<usize>)> = Vec::new();
    for &index in level {
        let type_id = entity_type_id(loaded(nodes, index)?);
        match by_type.iter_mut().find(|(t, _)| *t == type_id) {
            Some((_, group)) => group.push(index),
            None => by_type.push((type_id, vec![index])),
        }
    }

    let mut fetches = Vec::new();
    for (type_id, parents) in by_type {
        let mapping = registry.get_mapping(type_id)?;
        for (relation_index, relation) in mapping.relations().iter().enumerate() {
            let Some(property) = relation.discriminator() else {
                let target = &relation.targets()[0];
                fetches.extend(plan_relation(
                    registry,
                    dialect,
                    nodes,
                    (relation, relation_index),
                    target,
                    &parents,
                )?);
                continue;
            };

            // A variant relation may map each subtype to its own table.
            let discriminator = mapping.require_property(property)?;
            let mut by_target: Vec<(&RelationTarget, Vec<usize>)> = Vec::new();
            for &index in &parents {
                let value = discriminator.get(loaded(nodes, index)?)?;
                if value.is_null() {
                    continue;
                }
                let target = relation.target_for_discriminator(&value).ok_or_else(|| {
                    MappingError::new(
                        MappingErrorKind::InvalidDiscriminator,
                        format!(
                            "{property} = {value} selects no variant of relation '{}'",
                            relation.name()
                        ),
                    )
                    .with_type(mapping.type_name())
                })?;
                match by_target.iter_mut().find(|(t, _)| t.type_id == target.type_id) {
                    Some((_, group)) => group.push(index),
                    None => by_target.push((target, vec![index])),
                }
            }
            for (target, group) in by_target {
                fetches.extend(plan_relation(
                    registry,
                    dialect,
                    nodes,
                    (relation, relation_index),
                    target,
                    &group,
                )?);
            }
        }
    }
    Ok(fetches)
}

fn plan_relation(
    registry: &MappingRegistry,
    dialect: Dialect,
    nodes: &[LoadedNode],
    (relation, relation_index): (&RelationMapping, usize),
    target: &RelationTarget,
    parents: &[usize],
) -> Result<Option<RelationFetch>> {
    let fk = target.foreign_key.as_ref().ok_or_else(|| {
        MappingError::new(
            MappingErrorKind::MissingForeignKey,
            format!("relation '{}' declares no foreign key", relation.name()),
        )
        .with_type(relation.parent_type_name())
        .with_related(target.type_name)
    })?;
    let parent_mapping = registry.get_mapping(relation.parent_type())?;
    let referenced = parent_mapping.require_property(fk.referenced)?;

    let mut index: HashMap<KeyValue, Vec<usize>> = HashMap::new();
    let mut ids = Vec::new();
    for &parent in parents {
        let value = referenced.get(loaded(nodes, parent)?)?;
        if value.is_null() {
            continue;
        }
        let owners = index.entry(KeyValue::new(&value)).or_default();
        if owners.is_empty() {
            ids.push(value);
        }
        owners.push(parent);
    }
    if ids.is_empty() {
        return Ok(None);
    }

    let child_mapping = registry.get_mapping(target.type_id)?;
    let mut columns: Vec<&str> = child_mapping.columns().map(|p| p.column()).collect();
    if !columns.contains(&fk.column) {
        columns.push(fk.column);
    }

    let mut statement = SelectStatement::new(child_mapping.table())
        .columns(columns)
        .filter(Expr::col(fk.column).in_list(ids));
    if let Some(subset) = relation.subset_column() {
        statement = statement.filter(Expr::col(subset.column).eq(subset.value.clone()));
    }
    for order in relation.ordering() {
        statement = statement.order_by(OrderBy::from(order));
    }
    let (sql, params) = statement.build(dialect);

    Ok(Some(RelationFetch {
        parent_type_name: relation.parent_type_name(),
        relation_index,
        relation_name: relation.name(),
        kind: relation.kind(),
        child_type: target.type_id,
        child_type_name: target.type_name,
        fk_column: fk.column,
        sql,
        params,
        parents: index,
        parent_count: parents.len(),
    }))
}

/// Hydrate fetched rows as children of the parents their foreign keys name.
fn route_rows(
    registry: &MappingRegistry,
    nodes: &mut Vec<LoadedNode>,
    fetch: &RelationFetch,
    rows: &[Row],
) -> Result<()> {
    let child_mapping = registry.get_mapping(fetch.child_type)?;
    let mut filled = HashSet::new();
    for row in rows {
        let value = row.get_by_name(fetch.fk_column).cloned().unwrap_or(Value::Null);
        let owners = fetch.parents.get(&KeyValue::new(&value)).ok_or_else(|| {
            Error::Integrity(IntegrityError {
                kind: IntegrityErrorKind::UnmatchedForeignKey,
                parent_type: fetch.parent_type_name,
                child_type: fetch.child_type_name,
                relation: Some(fetch.relation_name),
                value: value.clone(),
            })
        })?;
        for &owner in owners {
            if fetch.kind == RelationKind::OneToOne && !filled.insert(owner) {
                return Err(Error::Integrity(IntegrityError {
                    kind: IntegrityErrorKind::DuplicateOneToOne,
                    parent_type: fetch.parent_type_name,
                    child_type: fetch.child_type_name,
                    relation: Some(fetch.relation_name),
                    value: value.clone(),
                }));
            }
            nodes.push(LoadedNode {
                entity: Some(child_mapping.hydrate(row)?),
                parent: Some(owner),
                relation: fetch.relation_index,
            });
        }
    }
    Ok(())
}

/// Attach every loaded child to its parent, deepest level first, and return
/// the roots.
fn assemble(
    registry: &MappingRegistry,
    mut nodes: Vec<LoadedNode>,
    levels: &[Range<usize>],
) -> Result<Vec<Box<dyn Entity>>> {
    for range in levels.iter().skip(1).rev() {
        for index in range.clone() {
            let child = nodes[index].entity.take().ok_or_else(|| detached(index))?;
            let relation_index = nodes[index].relation;
            let parent = nodes[index]
                .parent
                .ok_or_else(|| Error::Custom(format!("loaded child {index} has no parent")))?;
            let parent_entity = nodes[parent]
                .entity
                .as_deref_mut()
                .ok_or_else(|| detached(parent))?;
            let relation = registry
                .mapping_for(&*parent_entity)?
                .relation_at(relation_index)?;
            relation.access().attach(parent_entity, child)?;
        }
    }

    levels
        .first()
        .cloned()
        .unwrap_or_default()
        .map(|index| nodes[index].entity.take().ok_or_else(|| detached(index)))
        .collect()
}
