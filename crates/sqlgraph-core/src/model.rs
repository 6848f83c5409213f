//! Per-type mapping metadata.
//!
//! A [`ClassMapping`] is the statically declared description of one entity
//! type: its table, ordered key fields, scalar properties and relations, plus
//! a factory used to instantiate it from fetched rows. Mappings are built
//! once at startup and shared read-only through a
//! [`MappingRegistry`](crate::MappingRegistry).
//!
//! ```ignore
//! let orders = ClassMapping::builder::<Order>("orders", Order::default)
//!     .generated_key("id", |o| &o.id, |o| &mut o.id)
//!     .property("customer", |o| &o.customer, |o| &mut o.customer)
//!     .relation(
//!         RelationMapping::one_to_many::<Order, Line>("lines", |o| &o.lines, |o| &mut o.lines)
//!             .foreign_key(ForeignKeyDescriptor::new("order_id", "id").property("order_id")),
//!     )
//!     .build()?;
//! ```

use crate::entity::{Entity, entity_type_id};
use crate::error::{MappingError, MappingErrorKind, Result};
use crate::field::{FieldAccess, PropertyMapping};
use crate::identity::IdentityKey;
use crate::relationship::RelationMapping;
use crate::row::{FromValue, Row};
use crate::value::Value;
use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

type Factory = Arc<dyn Fn() -> Box<dyn Entity> + Send + Sync>;

/// Immutable mapping metadata for one entity type.
#[derive(Clone)]
pub struct ClassMapping {
    type_id: TypeId,
    type_name: &'static str,
    table: &'static str,
    keys: Vec<PropertyMapping>,
    properties: Vec<PropertyMapping>,
    relations: Vec<RelationMapping>,
    factory: Factory,
}

impl ClassMapping {
    /// Start declaring the mapping of `E`, stored in `table`.
    pub fn builder<E: Entity>(table: &'static str, factory: fn() -> E) -> ClassMappingBuilder<E> {
        ClassMappingBuilder {
            table,
            factory,
            keys: Vec::new(),
            properties: Vec::new(),
            relations: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn keys(&self) -> &[PropertyMapping] {
        &self.keys
    }

    /// Non-key scalar properties, in declaration order.
    pub fn properties(&self) -> &[PropertyMapping] {
        &self.properties
    }

    pub fn relations(&self) -> &[RelationMapping] {
        &self.relations
    }

    pub fn relation(&self, index: usize) -> Option<&RelationMapping> {
        self.relations.get(index)
    }

    /// A relation by index, as a configuration error when out of range.
    pub fn relation_at(&self, index: usize) -> Result<&RelationMapping> {
        self.relations.get(index).ok_or_else(|| {
            MappingError::new(
                MappingErrorKind::InvalidRelation,
                format!("no relation at index {index}"),
            )
            .with_type(self.type_name)
            .into()
        })
    }

    /// Every mapped column: keys first, then properties.
    pub fn columns(&self) -> impl Iterator<Item = &PropertyMapping> {
        self.keys.iter().chain(self.properties.iter())
    }

    /// Non-key properties that are written and compared.
    pub fn writable_properties(&self) -> impl Iterator<Item = &PropertyMapping> {
        self.properties.iter().filter(|p| p.is_writable())
    }

    /// A key or property by property name.
    pub fn property(&self, name: &str) -> Option<&PropertyMapping> {
        self.columns().find(|p| p.name() == name)
    }

    /// A key or property by property name, as a configuration error when absent.
    pub fn require_property(&self, name: &str) -> Result<&PropertyMapping> {
        self.property(name).ok_or_else(|| {
            MappingError::new(
                MappingErrorKind::InvalidRelation,
                format!("no property named '{name}'"),
            )
            .with_type(self.type_name)
            .into()
        })
    }

    pub fn property_by_column(&self, column: &str) -> Option<&PropertyMapping> {
        self.columns().find(|p| p.column() == column)
    }

    /// The database-assigned key, if the type has one.
    pub fn generated_key(&self) -> Option<&PropertyMapping> {
        self.keys.iter().find(|k| k.is_generated())
    }

    /// A fresh instance from the registered factory.
    pub fn instantiate(&self) -> Box<dyn Entity> {
        (self.factory)()
    }

    /// Instantiate an entity and populate every mapped column present in `row`.
    ///
    /// Columns the row lacks keep the factory's value; extra row columns
    /// (out-of-band foreign keys, routing aliases) are ignored.
    #[allow(clippy::result_large_err)]
    pub fn hydrate(&self, row: &Row) -> Result<Box<dyn Entity>> {
        let mut entity = self.instantiate();
        for property in self.columns() {
            if let Some(value) = row.get_by_name(property.column()) {
                property.set(&mut *entity, value)?;
            }
        }
        Ok(entity)
    }

    /// Key values of `entity`, in key declaration order.
    pub fn key_values(&self, entity: &dyn Entity) -> Result<Vec<Value>> {
        self.check_type(entity)?;
        self.keys.iter().map(|k| k.get(entity)).collect()
    }

    /// Generate the identity key of `entity`.
    ///
    /// Returns `None` when the entity has not been saved yet: some key value
    /// is null, or the generated key still holds its zero default.
    pub fn identity_key(&self, entity: &dyn Entity) -> Result<Option<IdentityKey>> {
        let values = self.key_values(entity)?;
        if values.iter().any(Value::is_null) {
            return Ok(None);
        }
        if let Some(generated) = self.generated_key() {
            let value = generated.get(entity)?;
            if is_unsaved_sentinel(&value) {
                return Ok(None);
            }
        }
        Ok(Some(IdentityKey::new(self.type_id, self.type_name, &values)))
    }

    /// `Debug` rendering of an entity, for error context.
    pub fn describe(&self, entity: &dyn Entity) -> String {
        format!("{entity:?}")
    }

    fn check_type(&self, entity: &dyn Entity) -> Result<()> {
        if entity_type_id(entity) == self.type_id {
            Ok(())
        } else {
            Err(MappingError::new(
                MappingErrorKind::TypeMismatch,
                format!(
                    "mapping for {} applied to {}",
                    self.type_name,
                    entity.entity_type_name()
                ),
            )
            .with_type(self.type_name)
            .with_related(entity.entity_type_name())
            .into())
        }
    }
}

/// Generated keys default to integer zero until the database assigns one.
pub fn is_unsaved_sentinel(value: &Value) -> bool {
    value.is_null() || (value.is_integer() && value.as_i64() == Some(0))
}

impl fmt::Debug for ClassMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassMapping")
            .field("type", &self.type_name)
            .field("table", &self.table)
            .field("keys", &self.keys)
            .field("properties", &self.properties)
            .field("relations", &self.relations)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ClassMapping`]; see [`ClassMapping::builder`].
pub struct ClassMappingBuilder<E> {
    table: &'static str,
    factory: fn() -> E,
    keys: Vec<PropertyMapping>,
    properties: Vec<PropertyMapping>,
    relations: Vec<RelationMapping>,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Entity> ClassMappingBuilder<E> {
    fn field<T>(name: &'static str, get: fn(&E) -> &T, get_mut: fn(&mut E) -> &mut T) -> PropertyMapping
    where
        T: Clone + Into<Value> + FromValue + 'static,
    {
        PropertyMapping::new(name, name, Arc::new(FieldAccess::new(name, get, get_mut)))
    }

    /// Declare a key field supplied by the application.
    pub fn key<T>(mut self, name: &'static str, get: fn(&E) -> &T, get_mut: fn(&mut E) -> &mut T) -> Self
    where
        T: Clone + Into<Value> + FromValue + 'static,
    {
        self.keys.push(Self::field(name, get, get_mut));
        self
    }

    /// Declare an auto-increment key assigned by the database on insert.
    pub fn generated_key<T>(
        mut self,
        name: &'static str,
        get: fn(&E) -> &T,
        get_mut: fn(&mut E) -> &mut T,
    ) -> Self
    where
        T: Clone + Into<Value> + FromValue + 'static,
    {
        self.keys.push(Self::field(name, get, get_mut).generated());
        self
    }

    /// Declare a writable scalar property.
    pub fn property<T>(
        mut self,
        name: &'static str,
        get: fn(&E) -> &T,
        get_mut: fn(&mut E) -> &mut T,
    ) -> Self
    where
        T: Clone + Into<Value> + FromValue + 'static,
    {
        self.properties.push(Self::field(name, get, get_mut));
        self
    }

    /// Declare a property that is loaded but never written nor compared.
    pub fn read_only<T>(
        mut self,
        name: &'static str,
        get: fn(&E) -> &T,
        get_mut: fn(&mut E) -> &mut T,
    ) -> Self
    where
        T: Clone + Into<Value> + FromValue + 'static,
    {
        self.properties.push(Self::field(name, get, get_mut).read_only());
        self
    }

    /// Store the property `name` in a column with a different name.
    pub fn column(mut self, name: &'static str, column: &'static str) -> Self {
        for property in self.keys.iter_mut().chain(self.properties.iter_mut()) {
            if property.name() == name {
                *property = property.clone().with_column(column);
            }
        }
        self
    }

    pub fn relation(mut self, relation: RelationMapping) -> Self {
        self.relations.push(relation);
        self
    }

    /// Validate and finish the mapping.
    pub fn build(self) -> Result<ClassMapping> {
        let type_name = std::any::type_name::<E>();
        if self.keys.is_empty() {
            return Err(MappingError::new(
                MappingErrorKind::MissingKey,
                format!("{type_name} declares no key fields"),
            )
            .with_type(type_name)
            .into());
        }
        if self.keys.iter().filter(|k| k.is_generated()).count() > 1 {
            return Err(MappingError::new(
                MappingErrorKind::MissingKey,
                "at most one key may be database generated",
            )
            .with_type(type_name)
            .into());
        }
        for relation in &self.relations {
            if relation.parent_type() != TypeId::of::<E>() {
                return Err(MappingError::new(
                    MappingErrorKind::InvalidRelation,
                    format!(
                        "relation '{}' is declared on {}",
                        relation.name(),
                        relation.parent_type_name()
                    ),
                )
                .with_type(type_name)
                .into());
            }
            if relation.targets().is_empty() {
                return Err(MappingError::new(
                    MappingErrorKind::InvalidRelation,
                    format!("relation '{}' declares no child type", relation.name()),
                )
                .with_type(type_name)
                .into());
            }
        }

        let factory = self.factory;
        Ok(ClassMapping {
            type_id: TypeId::of::<E>(),
            type_name,
            table: self.table,
            keys: self.keys,
            properties: self.properties,
            relations: self.relations,
            factory: Arc::new(move || Box::new(factory()) as Box<dyn Entity>),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationship::ForeignKeyDescriptor;

    #[derive(Debug, Clone, Default)]
    struct Order {
        id: i64,
        customer: String,
        created_at: Option<i64>,
        lines: Vec<Line>,
    }

    #[derive(Debug, Clone, Default)]
    struct Line {
        order_id: i64,
        sku: String,
    }

    fn order_mapping() -> ClassMapping {
        ClassMapping::builder::<Order>("orders", Order::default)
            .generated_key("id", |o| &o.id, |o| &mut o.id)
            .property("customer", |o| &o.customer, |o| &mut o.customer)
            .read_only("created_at", |o| &o.created_at, |o| &mut o.created_at)
            .column("customer", "customer_name")
            .relation(
                RelationMapping::one_to_many::<Order, Line>("lines", |o| &o.lines, |o| &mut o.lines)
                    .foreign_key(ForeignKeyDescriptor::new("order_id", "id").property("order_id")),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_columns_and_lookup() {
        let mapping = order_mapping();
        assert_eq!(mapping.table(), "orders");
        let columns: Vec<_> = mapping.columns().map(PropertyMapping::column).collect();
        assert_eq!(columns, vec!["id", "customer_name", "created_at"]);
        let writable: Vec<_> = mapping.writable_properties().map(PropertyMapping::name).collect();
        assert_eq!(writable, vec!["customer"]);
        assert!(mapping.property_by_column("customer_name").is_some());
        assert_eq!(mapping.generated_key().map(PropertyMapping::name), Some("id"));
    }

    #[test]
    fn test_hydrate_from_row() {
        let mapping = order_mapping();
        let row = Row::new(
            vec!["id".into(), "customer_name".into(), "created_at".into(), "extra".into()],
            vec![
                Value::Int(5),
                Value::Text("ada".into()),
                Value::Null,
                Value::Bool(true),
            ],
        );
        let entity = mapping.hydrate(&row).unwrap();
        let order = entity.as_any().downcast_ref::<Order>().unwrap();
        assert_eq!(order.id, 5);
        assert_eq!(order.customer, "ada");
        assert_eq!(order.created_at, None);
    }

    #[test]
    fn test_identity_key_of_unsaved_entity_is_none() {
        let mapping = order_mapping();
        let unsaved = Order::default();
        assert!(mapping.identity_key(&unsaved).unwrap().is_none());

        let saved = Order {
            id: 5,
            ..Order::default()
        };
        let key = mapping.identity_key(&saved).unwrap().unwrap();
        assert_eq!(key.values(), &[Value::BigInt(5)]);
    }

    #[test]
    fn test_identity_key_with_wrong_type_fails() {
        let mapping = order_mapping();
        let err = mapping.identity_key(&Line::default()).unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::TypeMismatch));
    }

    #[test]
    fn test_build_requires_key() {
        let err = ClassMapping::builder::<Line>("lines", Line::default)
            .property("sku", |l| &l.sku, |l| &mut l.sku)
            .build()
            .unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::MissingKey));
    }

    #[test]
    fn test_build_rejects_foreign_relation() {
        let err = ClassMapping::builder::<Line>("lines", Line::default)
            .key("sku", |l| &l.sku, |l| &mut l.sku)
            .relation(RelationMapping::one_to_many::<Order, Line>(
                "lines",
                |o| &o.lines,
                |o| &mut o.lines,
            ))
            .build()
            .unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::InvalidRelation));
    }

    #[test]
    fn test_unsaved_sentinel() {
        assert!(is_unsaved_sentinel(&Value::BigInt(0)));
        assert!(is_unsaved_sentinel(&Value::Null));
        assert!(!is_unsaved_sentinel(&Value::Bool(false)));
        assert!(!is_unsaved_sentinel(&Value::BigInt(3)));
    }
}
