//! Scalar property metadata and typed accessors.

use crate::entity::Entity;
use crate::error::{Error, MappingError, MappingErrorKind, Result};
use crate::row::FromValue;
use crate::value::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Reads and writes one scalar property of an erased entity.
pub trait PropertyAccess: Send + Sync {
    fn get(&self, entity: &dyn Entity) -> Result<Value>;

    fn set(&self, entity: &mut dyn Entity, value: &Value) -> Result<()>;
}

/// [`PropertyAccess`] over a struct field, via a pair of field projections.
pub struct FieldAccess<E, T> {
    name: &'static str,
    get: fn(&E) -> &T,
    get_mut: fn(&mut E) -> &mut T,
    _marker: PhantomData<fn() -> (E, T)>,
}

impl<E, T> FieldAccess<E, T> {
    pub fn new(name: &'static str, get: fn(&E) -> &T, get_mut: fn(&mut E) -> &mut T) -> Self {
        Self {
            name,
            get,
            get_mut,
            _marker: PhantomData,
        }
    }
}

pub(crate) fn type_mismatch(expected: &'static str, actual: &'static str) -> Error {
    MappingError::new(
        MappingErrorKind::TypeMismatch,
        format!("accessor for {expected} received {actual}"),
    )
    .with_type(expected)
    .with_related(actual)
    .into()
}

impl<E, T> PropertyAccess for FieldAccess<E, T>
where
    E: Entity,
    T: Clone + Into<Value> + FromValue + 'static,
{
    fn get(&self, entity: &dyn Entity) -> Result<Value> {
        let typed = entity
            .as_any()
            .downcast_ref::<E>()
            .ok_or_else(|| type_mismatch(std::any::type_name::<E>(), entity.entity_type_name()))?;
        Ok((self.get)(typed).clone().into())
    }

    fn set(&self, entity: &mut dyn Entity, value: &Value) -> Result<()> {
        let converted = T::from_value(value).map_err(|e| match e {
            Error::Type(mut te) => {
                te.column = Some(self.name.to_string());
                Error::Type(te)
            }
            other => other,
        })?;
        let actual = entity.entity_type_name();
        let typed = entity
            .as_any_mut()
            .downcast_mut::<E>()
            .ok_or_else(|| type_mismatch(std::any::type_name::<E>(), actual))?;
        *(self.get_mut)(typed) = converted;
        Ok(())
    }
}

/// Metadata for one scalar property of a mapped type.
#[derive(Clone)]
pub struct PropertyMapping {
    name: &'static str,
    column: &'static str,
    writable: bool,
    generated: bool,
    access: Arc<dyn PropertyAccess>,
}

impl PropertyMapping {
    pub fn new(name: &'static str, column: &'static str, access: Arc<dyn PropertyAccess>) -> Self {
        Self {
            name,
            column,
            writable: true,
            generated: false,
            access,
        }
    }

    /// Store the property in `column` instead of a column named after it.
    pub fn with_column(mut self, column: &'static str) -> Self {
        self.column = column;
        self
    }

    /// Mark the property as loaded but never written nor compared.
    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    /// Mark the property as assigned by the database on insert.
    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn column(&self) -> &'static str {
        self.column
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_generated(&self) -> bool {
        self.generated
    }

    pub fn get(&self, entity: &dyn Entity) -> Result<Value> {
        self.access.get(entity)
    }

    pub fn set(&self, entity: &mut dyn Entity, value: &Value) -> Result<()> {
        self.access.set(entity, value)
    }
}

impl fmt::Debug for PropertyMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyMapping")
            .field("name", &self.name)
            .field("column", &self.column)
            .field("writable", &self.writable)
            .field("generated", &self.generated)
            .finish_non_exhaustive()
    }
}
