//! The object model the engine works on.
//!
//! Application structs never implement anything by hand: any
//! `Clone + Debug + Send + Sync + 'static` type is an [`Entity`]. What the
//! engine knows about a type (table, keys, relations) lives in its
//! [`ClassMapping`](crate::ClassMapping), not in the type itself.

use std::any::{Any, TypeId};
use std::fmt;

/// A type-erased aggregate member (root or child).
pub trait Entity: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;

    /// Deep copy behind a fresh box.
    fn clone_entity(&self) -> Box<dyn Entity>;

    /// The Rust type name, used in diagnostics.
    fn entity_type_name(&self) -> &'static str;
}

impl<T> Entity for T
where
    T: Any + Clone + fmt::Debug + Send + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn clone_entity(&self) -> Box<dyn Entity> {
        Box::new(self.clone())
    }

    fn entity_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// The concrete type behind an entity reference.
pub fn entity_type_id(entity: &dyn Entity) -> TypeId {
    entity.as_any().type_id()
}

/// Live-object identity: the concrete type plus the address.
///
/// The type is part of the identity because an inline child can share its
/// address with the parent that contains it.
pub fn live_identity(entity: &dyn Entity) -> (TypeId, usize) {
    let address = std::ptr::from_ref(entity).cast::<()>() as usize;
    (entity_type_id(entity), address)
}

/// An owned entity whose concrete type is chosen at load time.
///
/// Used for discriminated one-to-one slots (`Option<AnyEntity>`), where the
/// parent's discriminator property decides which child type is stored.
pub struct AnyEntity(Box<dyn Entity>);

impl AnyEntity {
    pub fn new<T: Entity>(entity: T) -> Self {
        Self(Box::new(entity))
    }

    pub fn from_box(entity: Box<dyn Entity>) -> Self {
        Self(entity)
    }

    pub fn entity(&self) -> &dyn Entity {
        &*self.0
    }

    pub fn entity_mut(&mut self) -> &mut dyn Entity {
        &mut *self.0
    }

    pub fn type_id(&self) -> TypeId {
        entity_type_id(&*self.0)
    }

    pub fn downcast_ref<T: Entity>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Entity>(&mut self) -> Option<&mut T> {
        self.0.as_any_mut().downcast_mut::<T>()
    }

    pub fn into_inner(self) -> Box<dyn Entity> {
        self.0
    }
}

impl Clone for AnyEntity {
    fn clone(&self) -> Self {
        Self(self.0.clone_entity())
    }
}

impl fmt::Debug for AnyEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}
