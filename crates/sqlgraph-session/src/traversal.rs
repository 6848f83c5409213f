//! Graph traversal: walks an aggregate through its declared relations.
//!
//! [`traverse`] produces a [`TrackedGraph`], an arena of [`TrackedEntity`]
//! nodes borrowing the live entities. Each node remembers the
//! [`EntityPath`] that reaches it from the root, so a later pass holding the
//! root mutably can find the same entity again with [`resolve_mut`].
//!
//! Only declared relations are followed; scalar properties are never
//! descended into. Elements of a one-to-many relation become direct children
//! of the parent node, so depth counts entities, not collections.

use sqlgraph_core::{
    ClassMapping, Entity, Error, IdentityKey, MappingRegistry, Result, live_identity,
};
use std::any::TypeId;
use std::collections::HashSet;
use std::fmt;

/// One step from a parent to a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathSegment {
    /// Index of the relation in the parent's [`ClassMapping::relations`].
    pub relation: usize,
    /// Position of the child in the relation's collection order.
    pub index: usize,
}

/// The route from an aggregate root to one of its members.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct EntityPath(Vec<PathSegment>);

impl EntityPath {
    /// The empty path, naming the root itself.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// This path extended by one step.
    #[must_use]
    pub fn child(&self, relation: usize, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment { relation, index });
        Self(segments)
    }

    /// The path of the member holding this one; `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let (_, parent) = self.0.split_last()?;
        Some(Self(parent.to_vec()))
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for EntityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("root")?;
        for segment in &self.0 {
            write!(f, "/{}[{}]", segment.relation, segment.index)?;
        }
        Ok(())
    }
}

/// A traversal node.
#[derive(Debug)]
pub struct TrackedEntity<'g> {
    /// Identity key; `None` for an entity that has not been saved yet.
    pub key: Option<IdentityKey>,
    pub entity: &'g dyn Entity,
    pub mapping: &'g ClassMapping,
    pub path: EntityPath,
    /// Live-object identity (concrete type and address).
    pub identity: (TypeId, usize),
    /// Arena index of the parent node.
    pub parent: Option<usize>,
    /// Relation on the parent's mapping that holds this node.
    pub relation: Option<usize>,
    pub depth: usize,
    pub children: Vec<usize>,
}

/// The tracked tree of one aggregate, root at index 0.
#[derive(Debug)]
pub struct TrackedGraph<'g> {
    nodes: Vec<TrackedEntity<'g>>,
}

impl<'g> TrackedGraph<'g> {
    pub fn root(&self) -> &TrackedEntity<'g> {
        &self.nodes[0]
    }

    pub fn node(&self, index: usize) -> &TrackedEntity<'g> {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &[TrackedEntity<'g>] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node indices ordered by depth ascending, traversal order within a depth.
    pub fn by_depth(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.nodes.len()).collect();
        order.sort_by_key(|&i| self.nodes[i].depth);
        order
    }

    /// The parent node of `index`, if it has one.
    pub fn parent_of(&self, index: usize) -> Option<&TrackedEntity<'g>> {
        self.nodes[index].parent.map(|p| &self.nodes[p])
    }
}

/// Walk `root` and every entity reachable through declared relations.
///
/// A `None` root is an invalid argument. Every visited type must be
/// registered.
#[tracing::instrument(level = "trace", skip_all)]
pub fn traverse<'g>(
    registry: &'g MappingRegistry,
    root: Option<&'g dyn Entity>,
) -> Result<TrackedGraph<'g>> {
    let root = root.ok_or_else(|| Error::invalid_argument("cannot traverse a null root"))?;
    let mut walker = Walker {
        registry,
        nodes: Vec::new(),
        visited: HashSet::new(),
    };
    walker.visit(root, EntityPath::root(), None, None)?;
    tracing::trace!(nodes = walker.nodes.len(), "Traversed graph");
    Ok(TrackedGraph {
        nodes: walker.nodes,
    })
}

struct Walker<'g> {
    registry: &'g MappingRegistry,
    nodes: Vec<TrackedEntity<'g>>,
    visited: HashSet<(TypeId, usize)>,
}

impl<'g> Walker<'g> {
    fn visit(
        &mut self,
        entity: &'g dyn Entity,
        path: EntityPath,
        parent: Option<usize>,
        relation: Option<usize>,
    ) -> Result<()> {
        let identity = live_identity(entity);
        if !self.visited.insert(identity) {
            return Ok(());
        }

        let mapping = self.registry.mapping_for(entity)?;
        let key = mapping.identity_key(entity)?;
        let index = self.nodes.len();
        let depth = path.depth();
        self.nodes.push(TrackedEntity {
            key,
            entity,
            mapping,
            path: path.clone(),
            identity,
            parent,
            relation,
            depth,
            children: Vec::new(),
        });
        if let Some(p) = parent {
            self.nodes[p].children.push(index);
        }

        for (r, rel) in mapping.relations().iter().enumerate() {
            for (i, child) in rel.children(entity)?.into_iter().enumerate() {
                self.visit(child, path.child(r, i), Some(index), Some(r))?;
            }
        }
        Ok(())
    }
}

fn stale_path(path: &EntityPath) -> Error {
    Error::invalid_argument(format!("path {path} no longer resolves in the graph"))
}

/// The entity at `path` below `root`.
pub fn resolve<'a>(
    registry: &MappingRegistry,
    root: &'a dyn Entity,
    path: &EntityPath,
) -> Result<&'a dyn Entity> {
    let mut node = root;
    for segment in path.segments() {
        let relation = registry.mapping_for(node)?.relation_at(segment.relation)?;
        node = relation
            .children(node)?
            .get(segment.index)
            .copied()
            .ok_or_else(|| stale_path(path))?;
    }
    Ok(node)
}

/// The entity at `path` below `root`, mutably.
pub fn resolve_mut<'a>(
    registry: &MappingRegistry,
    root: &'a mut dyn Entity,
    path: &EntityPath,
) -> Result<&'a mut dyn Entity> {
    let mut node = root;
    for segment in path.segments() {
        let relation = registry.mapping_for(&*node)?.relation_at(segment.relation)?;
        node = relation
            .access()
            .child_mut(node, segment.index)?
            .ok_or_else(|| stale_path(path))?;
    }
    Ok(node)
}
