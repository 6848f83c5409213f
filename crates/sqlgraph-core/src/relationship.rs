//! Relationship metadata: one-to-one and one-to-many children of a mapped type.
//!
//! A relation is declared on the parent type and knows how to reach its
//! children in a live parent ([`RelationAccess`]), which child types it may
//! hold ([`RelationTarget`]) and how each child row points back at its parent
//! ([`ForeignKeyDescriptor`]).

use crate::entity::{AnyEntity, Entity, entity_type_id};
use crate::error::{MappingError, MappingErrorKind, Result};
use crate::field::type_mismatch;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// The cardinality of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
    /// Parent holds at most one child (`Option<C>` or `Option<AnyEntity>`).
    OneToOne,
    /// Parent holds a collection of children (`Vec<C>`).
    OneToMany,
}

/// How a child row references its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDescriptor {
    /// Column on the child table holding the parent's referenced value.
    pub column: &'static str,
    /// Child property backing `column`; `None` means the column is not
    /// represented on the child type and travels out of band.
    pub property: Option<&'static str>,
    /// Parent property whose value the foreign key carries.
    pub referenced: &'static str,
}

impl ForeignKeyDescriptor {
    pub fn new(column: &'static str, referenced: &'static str) -> Self {
        Self {
            column,
            property: None,
            referenced,
        }
    }

    /// Name the child property that holds the foreign key.
    pub fn property(mut self, property: &'static str) -> Self {
        self.property = Some(property);
        self
    }
}

/// A constant column/value pair distinguishing relation roles that share one table.
#[derive(Debug, Clone, PartialEq)]
pub struct SubsetColumn {
    pub column: &'static str,
    pub value: Value,
}

/// Sort applied to child rows when a relation is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationOrder {
    pub column: &'static str,
    pub descending: bool,
}

/// One child type a relation may hold.
#[derive(Debug, Clone)]
pub struct RelationTarget {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub foreign_key: Option<ForeignKeyDescriptor>,
    /// Parent discriminator value selecting this target, for variant relations.
    pub discriminator: Option<Value>,
}

/// Reaches the children of a relation inside an erased parent.
pub trait RelationAccess: Send + Sync {
    /// Current children, in collection order.
    fn children<'a>(&self, parent: &'a dyn Entity) -> Result<Vec<&'a dyn Entity>>;

    /// The child at `index` in collection order.
    fn child_mut<'a>(
        &self,
        parent: &'a mut dyn Entity,
        index: usize,
    ) -> Result<Option<&'a mut dyn Entity>>;

    /// Append (one-to-many) or store (one-to-one) a child.
    fn attach(&self, parent: &mut dyn Entity, child: Box<dyn Entity>) -> Result<()>;

    /// Empty the collection or slot.
    fn clear(&self, parent: &mut dyn Entity) -> Result<()>;
}

fn downcast_parent<P: Entity>(parent: &dyn Entity) -> Result<&P> {
    parent
        .as_any()
        .downcast_ref::<P>()
        .ok_or_else(|| type_mismatch(std::any::type_name::<P>(), parent.entity_type_name()))
}

fn downcast_parent_mut<P: Entity>(parent: &mut dyn Entity) -> Result<&mut P> {
    let actual = parent.entity_type_name();
    parent
        .as_any_mut()
        .downcast_mut::<P>()
        .ok_or_else(|| type_mismatch(std::any::type_name::<P>(), actual))
}

fn downcast_child<C: Entity>(child: Box<dyn Entity>) -> Result<C> {
    let name = child.entity_type_name();
    child.into_any().downcast::<C>().map(|c| *c).map_err(|_| {
        MappingError::new(
            MappingErrorKind::TypeMismatch,
            format!("cannot attach {name} where {} is expected", std::any::type_name::<C>()),
        )
        .with_related(name)
        .into()
    })
}

struct ManyAccess<P, C> {
    get: fn(&P) -> &Vec<C>,
    get_mut: fn(&mut P) -> &mut Vec<C>,
    _marker: PhantomData<fn() -> (P, C)>,
}

impl<P: Entity, C: Entity> RelationAccess for ManyAccess<P, C> {
    fn children<'a>(&self, parent: &'a dyn Entity) -> Result<Vec<&'a dyn Entity>> {
        let parent = downcast_parent::<P>(parent)?;
        Ok((self.get)(parent)
            .iter()
            .map(|c| c as &dyn Entity)
            .collect())
    }

    fn child_mut<'a>(
        &self,
        parent: &'a mut dyn Entity,
        index: usize,
    ) -> Result<Option<&'a mut dyn Entity>> {
        let parent = downcast_parent_mut::<P>(parent)?;
        Ok((self.get_mut)(parent)
            .get_mut(index)
            .map(|c| c as &mut dyn Entity))
    }

    fn attach(&self, parent: &mut dyn Entity, child: Box<dyn Entity>) -> Result<()> {
        let child = downcast_child::<C>(child)?;
        (self.get_mut)(downcast_parent_mut::<P>(parent)?).push(child);
        Ok(())
    }

    fn clear(&self, parent: &mut dyn Entity) -> Result<()> {
        (self.get_mut)(downcast_parent_mut::<P>(parent)?).clear();
        Ok(())
    }
}

struct OneAccess<P, C> {
    get: fn(&P) -> &Option<C>,
    get_mut: fn(&mut P) -> &mut Option<C>,
    _marker: PhantomData<fn() -> (P, C)>,
}

impl<P: Entity, C: Entity> RelationAccess for OneAccess<P, C> {
    fn children<'a>(&self, parent: &'a dyn Entity) -> Result<Vec<&'a dyn Entity>> {
        let parent = downcast_parent::<P>(parent)?;
        Ok((self.get)(parent)
            .iter()
            .map(|c| c as &dyn Entity)
            .collect())
    }

    fn child_mut<'a>(
        &self,
        parent: &'a mut dyn Entity,
        index: usize,
    ) -> Result<Option<&'a mut dyn Entity>> {
        let parent = downcast_parent_mut::<P>(parent)?;
        if index > 0 {
            return Ok(None);
        }
        Ok((self.get_mut)(parent).as_mut().map(|c| c as &mut dyn Entity))
    }

    fn attach(&self, parent: &mut dyn Entity, child: Box<dyn Entity>) -> Result<()> {
        let child = downcast_child::<C>(child)?;
        *(self.get_mut)(downcast_parent_mut::<P>(parent)?) = Some(child);
        Ok(())
    }

    fn clear(&self, parent: &mut dyn Entity) -> Result<()> {
        *(self.get_mut)(downcast_parent_mut::<P>(parent)?) = None;
        Ok(())
    }
}

struct VariantAccess<P> {
    get: fn(&P) -> &Option<AnyEntity>,
    get_mut: fn(&mut P) -> &mut Option<AnyEntity>,
}

impl<P: Entity> RelationAccess for VariantAccess<P> {
    fn children<'a>(&self, parent: &'a dyn Entity) -> Result<Vec<&'a dyn Entity>> {
        let parent = downcast_parent::<P>(parent)?;
        Ok((self.get)(parent).iter().map(AnyEntity::entity).collect())
    }

    fn child_mut<'a>(
        &self,
        parent: &'a mut dyn Entity,
        index: usize,
    ) -> Result<Option<&'a mut dyn Entity>> {
        let parent = downcast_parent_mut::<P>(parent)?;
        if index > 0 {
            return Ok(None);
        }
        Ok((self.get_mut)(parent).as_mut().map(AnyEntity::entity_mut))
    }

    fn attach(&self, parent: &mut dyn Entity, child: Box<dyn Entity>) -> Result<()> {
        *(self.get_mut)(downcast_parent_mut::<P>(parent)?) = Some(AnyEntity::from_box(child));
        Ok(())
    }

    fn clear(&self, parent: &mut dyn Entity) -> Result<()> {
        *(self.get_mut)(downcast_parent_mut::<P>(parent)?) = None;
        Ok(())
    }
}

/// A declared relationship from a parent type to its children.
#[derive(Clone)]
pub struct RelationMapping {
    name: &'static str,
    kind: RelationKind,
    parent_type: TypeId,
    parent_type_name: &'static str,
    targets: Vec<RelationTarget>,
    discriminator: Option<&'static str>,
    subset: Option<SubsetColumn>,
    order_by: Vec<RelationOrder>,
    access: Arc<dyn RelationAccess>,
}

impl RelationMapping {
    fn with_access<P: Entity>(
        name: &'static str,
        kind: RelationKind,
        access: Arc<dyn RelationAccess>,
    ) -> Self {
        Self {
            name,
            kind,
            parent_type: TypeId::of::<P>(),
            parent_type_name: std::any::type_name::<P>(),
            targets: Vec::new(),
            discriminator: None,
            subset: None,
            order_by: Vec::new(),
            access,
        }
    }

    fn single_target<C: Entity>(mut self) -> Self {
        self.targets.push(RelationTarget {
            type_id: TypeId::of::<C>(),
            type_name: std::any::type_name::<C>(),
            foreign_key: None,
            discriminator: None,
        });
        self
    }

    /// A collection of `C` held in a `Vec<C>` field of `P`.
    pub fn one_to_many<P: Entity, C: Entity>(
        name: &'static str,
        get: fn(&P) -> &Vec<C>,
        get_mut: fn(&mut P) -> &mut Vec<C>,
    ) -> Self {
        let access = ManyAccess {
            get,
            get_mut,
            _marker: PhantomData,
        };
        Self::with_access::<P>(name, RelationKind::OneToMany, Arc::new(access)).single_target::<C>()
    }

    /// A single optional `C` held in an `Option<C>` field of `P`.
    pub fn one_to_one<P: Entity, C: Entity>(
        name: &'static str,
        get: fn(&P) -> &Option<C>,
        get_mut: fn(&mut P) -> &mut Option<C>,
    ) -> Self {
        let access = OneAccess {
            get,
            get_mut,
            _marker: PhantomData,
        };
        Self::with_access::<P>(name, RelationKind::OneToOne, Arc::new(access)).single_target::<C>()
    }

    /// A single optional child whose concrete type is selected by the
    /// parent property `discriminator`. Declare the choices with [`Self::variant`].
    pub fn one_to_one_variant<P: Entity>(
        name: &'static str,
        get: fn(&P) -> &Option<AnyEntity>,
        get_mut: fn(&mut P) -> &mut Option<AnyEntity>,
        discriminator: &'static str,
    ) -> Self {
        let mut relation = Self::with_access::<P>(
            name,
            RelationKind::OneToOne,
            Arc::new(VariantAccess { get, get_mut }),
        );
        relation.discriminator = Some(discriminator);
        relation
    }

    /// Declare that discriminator `value` selects child type `C`.
    pub fn variant<C: Entity>(
        mut self,
        value: impl Into<Value>,
        foreign_key: Option<ForeignKeyDescriptor>,
    ) -> Self {
        self.targets.push(RelationTarget {
            type_id: TypeId::of::<C>(),
            type_name: std::any::type_name::<C>(),
            foreign_key,
            discriminator: Some(value.into()),
        });
        self
    }

    /// Use `foreign_key` for every declared target.
    pub fn foreign_key(mut self, foreign_key: ForeignKeyDescriptor) -> Self {
        for target in &mut self.targets {
            target.foreign_key = Some(foreign_key.clone());
        }
        self
    }

    /// Restrict the relation to rows where `column = value`.
    pub fn subset(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.subset = Some(SubsetColumn {
            column,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, column: &'static str) -> Self {
        self.order_by.push(RelationOrder {
            column,
            descending: false,
        });
        self
    }

    pub fn order_by_desc(mut self, column: &'static str) -> Self {
        self.order_by.push(RelationOrder {
            column,
            descending: true,
        });
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn parent_type(&self) -> TypeId {
        self.parent_type
    }

    pub fn parent_type_name(&self) -> &'static str {
        self.parent_type_name
    }

    pub fn targets(&self) -> &[RelationTarget] {
        &self.targets
    }

    /// The parent property selecting the child type, for variant relations.
    pub fn discriminator(&self) -> Option<&'static str> {
        self.discriminator
    }

    pub fn subset_column(&self) -> Option<&SubsetColumn> {
        self.subset.as_ref()
    }

    pub fn ordering(&self) -> &[RelationOrder] {
        &self.order_by
    }

    pub fn access(&self) -> &dyn RelationAccess {
        &*self.access
    }

    pub fn target(&self, child_type: TypeId) -> Option<&RelationTarget> {
        self.targets.iter().find(|t| t.type_id == child_type)
    }

    /// The foreign key child rows of `child_type` use, if one is declared.
    pub fn foreign_key_for(&self, child_type: TypeId) -> Option<&ForeignKeyDescriptor> {
        self.target(child_type).and_then(|t| t.foreign_key.as_ref())
    }

    /// The target selected by a parent's discriminator value.
    pub fn target_for_discriminator(&self, value: &Value) -> Option<&RelationTarget> {
        let wanted = value.key_form();
        self.targets.iter().find(|t| {
            t.discriminator
                .as_ref()
                .is_some_and(|d| d.key_form() == wanted)
        })
    }

    /// Children of `parent` through this relation, checking each child's
    /// type against the declared targets.
    pub fn children<'a>(&self, parent: &'a dyn Entity) -> Result<Vec<&'a dyn Entity>> {
        let children = self.access.children(parent)?;
        for &child in &children {
            if self.target(entity_type_id(child)).is_none() {
                return Err(MappingError::new(
                    MappingErrorKind::InvalidRelation,
                    format!(
                        "relation '{}' holds a {} which is not a declared target",
                        self.name,
                        child.entity_type_name()
                    ),
                )
                .with_type(self.parent_type_name)
                .with_related(child.entity_type_name())
                .into());
            }
        }
        Ok(children)
    }
}

impl fmt::Debug for RelationMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationMapping")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("parent", &self.parent_type_name)
            .field("targets", &self.targets)
            .field("discriminator", &self.discriminator)
            .field("subset", &self.subset)
            .finish_non_exhaustive()
    }
}
