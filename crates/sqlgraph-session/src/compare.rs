//! Snapshot diffing.
//!
//! [`compare`] traverses a snapshot and a current copy of one aggregate and
//! classifies every member by identity key: present only in current is
//! [`ChangeState::Added`], only in the snapshot is [`ChangeState::Removed`],
//! in both is [`ChangeState::Modified`] or [`ChangeState::Unmodified`]
//! depending on a shallow comparison of writable scalar properties. Members
//! without a key yet are always added.
//!
//! Neither graph is mutated. The result is an owned, depth-ordered list in
//! which each item points at its parent item by index.

use crate::traversal::{EntityPath, TrackedGraph, traverse};
use serde::{Deserialize, Serialize};
use sqlgraph_core::{
    ClassMapping, Entity, Error, IdentityKey, IntegrityError, IntegrityErrorKind, MappingRegistry,
    PropertyMapping, Result,
};
use std::any::TypeId;
use std::collections::HashMap;

/// Decides whether a property takes part in the comparison; `false` skips it.
pub type PropertyFilter = dyn Fn(&ClassMapping, &PropertyMapping) -> bool + Send + Sync;

/// Classification of one aggregate member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeState {
    Added,
    Removed,
    Modified,
    Unmodified,
}

/// Which graph an item's path and identity refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Snapshot,
    Current,
}

/// One classified member of the aggregate.
#[derive(Debug, Clone)]
pub struct CompareResultItem {
    pub state: ChangeState,
    /// `Snapshot` for removed members, `Current` otherwise.
    pub side: Side,
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub key: Option<IdentityKey>,
    /// Route to the member inside the graph named by `side`.
    pub path: EntityPath,
    pub depth: usize,
    /// Index of the parent item in the result list.
    pub parent: Option<usize>,
    /// Relation on the parent's mapping that holds this member.
    pub relation: Option<usize>,
    /// Live-object identity inside the graph named by `side`.
    pub identity: (TypeId, usize),
    /// Writable properties that differ, for modified members.
    pub changed_properties: Vec<&'static str>,
    parent_key: Option<IdentityKey>,
    parent_identity: Option<(TypeId, usize)>,
}

impl CompareResultItem {
    fn from_node(
        graph: &TrackedGraph<'_>,
        index: usize,
        state: ChangeState,
        side: Side,
        changed_properties: Vec<&'static str>,
    ) -> Self {
        let node = graph.node(index);
        let parent = graph.parent_of(index);
        Self {
            state,
            side,
            type_id: node.mapping.type_id(),
            type_name: node.mapping.type_name(),
            key: node.key.clone(),
            path: node.path.clone(),
            depth: node.depth,
            parent: None,
            relation: node.relation,
            identity: node.identity,
            changed_properties,
            parent_key: parent.and_then(|p| p.key.clone()),
            parent_identity: parent.map(|p| p.identity),
        }
    }

    /// The aggregate root has no parent relation.
    pub fn is_root(&self) -> bool {
        self.relation.is_none()
    }
}

/// Classify every member of `snapshot` and `current`.
///
/// A `None` snapshot makes every current member added; a `None` current
/// makes every snapshot member removed. Two members of one graph sharing an
/// identity key are an integrity error.
#[tracing::instrument(level = "debug", skip_all)]
pub fn compare(
    registry: &MappingRegistry,
    snapshot: Option<&dyn Entity>,
    current: Option<&dyn Entity>,
    filter: Option<&PropertyFilter>,
) -> Result<Vec<CompareResultItem>> {
    if snapshot.is_none() && current.is_none() {
        return Err(Error::invalid_argument(
            "cannot compare: snapshot and current are both null",
        ));
    }

    let before = snapshot.map(|s| traverse(registry, Some(s))).transpose()?;
    let after = current.map(|c| traverse(registry, Some(c))).transpose()?;
    let before_keys = before.as_ref().map(index_keys).transpose()?.unwrap_or_default();
    let after_keys = after.as_ref().map(index_keys).transpose()?.unwrap_or_default();

    let mut items = Vec::new();
    if let Some(graph) = &after {
        for index in graph.by_depth() {
            let node = graph.node(index);
            let previous = node
                .key
                .as_ref()
                .and_then(|k| before_keys.get(k))
                .zip(before.as_ref())
                .map(|(&i, g)| g.node(i));
            let (state, changed) = match previous {
                None => (ChangeState::Added, Vec::new()),
                Some(previous) => {
                    let changed =
                        changed_properties(node.mapping, previous.entity, node.entity, filter)?;
                    if changed.is_empty() {
                        (ChangeState::Unmodified, changed)
                    } else {
                        (ChangeState::Modified, changed)
                    }
                }
            };
            items.push(CompareResultItem::from_node(
                graph,
                index,
                state,
                Side::Current,
                changed,
            ));
        }
    }

    if let Some(graph) = &before {
        for index in graph.by_depth() {
            // A keyless snapshot member was never stored; nothing to delete.
            let Some(key) = &graph.node(index).key else {
                continue;
            };
            if !after_keys.contains_key(key) {
                items.push(CompareResultItem::from_node(
                    graph,
                    index,
                    ChangeState::Removed,
                    Side::Snapshot,
                    Vec::new(),
                ));
            }
        }
    }

    items.sort_by_key(|item| item.depth);
    link_parents(&mut items);

    tracing::debug!(
        count = items.len(),
        added = count(&items, ChangeState::Added),
        removed = count(&items, ChangeState::Removed),
        modified = count(&items, ChangeState::Modified),
        "Compared graphs"
    );
    Ok(items)
}

/// Number of items in `state`.
pub fn count(items: &[CompareResultItem], state: ChangeState) -> usize {
    items.iter().filter(|i| i.state == state).count()
}

fn index_keys(graph: &TrackedGraph<'_>) -> Result<HashMap<IdentityKey, usize>> {
    let mut keys = HashMap::with_capacity(graph.len());
    for (index, node) in graph.nodes().iter().enumerate() {
        let Some(key) = &node.key else {
            continue;
        };
        if keys.insert(key.clone(), index).is_some() {
            let parent_type = graph
                .parent_of(index)
                .map_or(node.mapping.type_name(), |p| p.mapping.type_name());
            return Err(Error::Integrity(IntegrityError {
                kind: IntegrityErrorKind::DuplicateIdentity,
                parent_type,
                child_type: node.mapping.type_name(),
                relation: None,
                value: key.as_value(),
            }));
        }
    }
    Ok(keys)
}

fn changed_properties(
    mapping: &ClassMapping,
    before: &dyn Entity,
    after: &dyn Entity,
    filter: Option<&PropertyFilter>,
) -> Result<Vec<&'static str>> {
    let mut changed = Vec::new();
    for property in mapping.writable_properties() {
        if filter.is_some_and(|f| !f(mapping, property)) {
            continue;
        }
        if property.get(before)? != property.get(after)? {
            changed.push(property.name());
        }
    }
    Ok(changed)
}

/// Point each item at its parent item: by the parent's identity key, or by
/// the parent's live identity on the same side when the parent has no key.
fn link_parents(items: &mut [CompareResultItem]) {
    let by_key: HashMap<IdentityKey, usize> = items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| item.key.clone().map(|k| (k, i)))
        .collect();
    let by_identity: HashMap<(Side, (TypeId, usize)), usize> = items
        .iter()
        .enumerate()
        .map(|(i, item)| ((item.side, item.identity), i))
        .collect();

    for index in 0..items.len() {
        let item = &items[index];
        if item.is_root() {
            continue;
        }
        let parent = item
            .parent_key
            .as_ref()
            .and_then(|k| by_key.get(k))
            .or_else(|| {
                item.parent_identity
                    .and_then(|id| by_identity.get(&(item.side, id)))
            })
            .copied();
        if parent.is_none() {
            tracing::warn!(
                entity = item.type_name,
                path = %item.path,
                "Could not resolve parent of compared entity"
            );
        }
        items[index].parent = parent;
    }
}
