//! The set of class mappings known to the engine.

use crate::entity::{Entity, entity_type_id};
use crate::error::{MappingError, MappingErrorKind, Result};
use crate::identity::IdentityKey;
use crate::model::ClassMapping;
use std::any::TypeId;
use std::collections::HashMap;

/// Every [`ClassMapping`] participating in graph operations, keyed by type.
///
/// Built once at startup, then shared (usually behind an `Arc`) and only
/// read. Construction checks that every relation target is itself mapped and
/// that every foreign key, discriminator and referenced property resolves.
#[derive(Debug, Default)]
pub struct MappingRegistry {
    mappings: HashMap<TypeId, ClassMapping>,
}

impl MappingRegistry {
    pub fn builder() -> MappingRegistryBuilder {
        MappingRegistryBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn contains(&self, type_id: TypeId) -> bool {
        self.mappings.contains_key(&type_id)
    }

    /// The mapping registered for `type_id`.
    pub fn get_mapping(&self, type_id: TypeId) -> Result<&ClassMapping> {
        self.mappings.get(&type_id).ok_or_else(|| {
            MappingError::new(
                MappingErrorKind::MissingMapping,
                format!("no mapping registered for {type_id:?}"),
            )
            .into()
        })
    }

    /// The mapping registered for `T`.
    pub fn mapping_of<T: Entity>(&self) -> Result<&ClassMapping> {
        self.mappings.get(&TypeId::of::<T>()).ok_or_else(|| {
            let name = std::any::type_name::<T>();
            MappingError::new(
                MappingErrorKind::MissingMapping,
                format!("no mapping registered for {name}"),
            )
            .with_type(name)
            .into()
        })
    }

    /// The mapping of the concrete type behind `entity`.
    pub fn mapping_for(&self, entity: &dyn Entity) -> Result<&ClassMapping> {
        self.mappings.get(&entity_type_id(entity)).ok_or_else(|| {
            let name = entity.entity_type_name();
            MappingError::new(
                MappingErrorKind::MissingMapping,
                format!("no mapping registered for {name}"),
            )
            .with_type(name)
            .into()
        })
    }

    /// Generate the identity key of `entity`; `None` for unsaved entities.
    pub fn generate_identity_key(&self, entity: &dyn Entity) -> Result<Option<IdentityKey>> {
        self.mapping_for(entity)?.identity_key(entity)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassMapping> {
        self.mappings.values()
    }
}

/// Collects mappings and validates them as a whole.
#[derive(Debug, Default)]
pub struct MappingRegistryBuilder {
    mappings: Vec<ClassMapping>,
}

impl MappingRegistryBuilder {
    pub fn register(mut self, mapping: ClassMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    pub fn build(self) -> Result<MappingRegistry> {
        let mut mappings = HashMap::with_capacity(self.mappings.len());
        for mapping in self.mappings {
            let name = mapping.type_name();
            if mappings.insert(mapping.type_id(), mapping).is_some() {
                return Err(MappingError::new(
                    MappingErrorKind::InvalidArgument,
                    format!("{name} is registered twice"),
                )
                .with_type(name)
                .into());
            }
        }

        let registry = MappingRegistry { mappings };
        for mapping in registry.mappings.values() {
            validate_relations(&registry, mapping)?;
        }
        tracing::debug!(count = registry.len(), "Mapping registry built");
        Ok(registry)
    }
}

fn validate_relations(registry: &MappingRegistry, parent: &ClassMapping) -> Result<()> {
    for relation in parent.relations() {
        if let Some(discriminator) = relation.discriminator() {
            parent.require_property(discriminator)?;
        }
        for target in relation.targets() {
            let Some(child) = registry.mappings.get(&target.type_id) else {
                return Err(MappingError::new(
                    MappingErrorKind::MissingMapping,
                    format!(
                        "relation '{}' targets {}, which has no mapping",
                        relation.name(),
                        target.type_name
                    ),
                )
                .with_type(parent.type_name())
                .with_related(target.type_name)
                .into());
            };
            // A relation without a foreign key is legal until it is loaded or
            // persisted; both fail there with both type names.
            if let Some(fk) = &target.foreign_key {
                parent.require_property(fk.referenced)?;
                if let Some(property) = fk.property {
                    child.require_property(property)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationship::{ForeignKeyDescriptor, RelationMapping};
    use crate::value::Value;

    #[derive(Debug, Clone, Default)]
    struct Order {
        id: i64,
        lines: Vec<Line>,
    }

    #[derive(Debug, Clone, Default)]
    struct Line {
        id: i64,
        order_id: i64,
    }

    fn order(fk: ForeignKeyDescriptor) -> ClassMapping {
        ClassMapping::builder::<Order>("orders", Order::default)
            .generated_key("id", |o| &o.id, |o| &mut o.id)
            .relation(
                RelationMapping::one_to_many::<Order, Line>("lines", |o| &o.lines, |o| &mut o.lines)
                    .foreign_key(fk),
            )
            .build()
            .unwrap()
    }

    fn line() -> ClassMapping {
        ClassMapping::builder::<Line>("lines", Line::default)
            .generated_key("id", |l| &l.id, |l| &mut l.id)
            .property("order_id", |l| &l.order_id, |l| &mut l.order_id)
            .build()
            .unwrap()
    }

    #[test]
    fn test_registry_resolves_mappings() {
        let registry = MappingRegistry::builder()
            .register(order(ForeignKeyDescriptor::new("order_id", "id").property("order_id")))
            .register(line())
            .build()
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.mapping_of::<Line>().unwrap().table(), "lines");
        let order = Order {
            id: 3,
            ..Order::default()
        };
        assert_eq!(registry.mapping_for(&order).unwrap().table(), "orders");
        let key = registry.generate_identity_key(&order).unwrap().unwrap();
        assert_eq!(key.values(), &[Value::BigInt(3)]);
    }

    #[test]
    fn test_unmapped_relation_target_is_rejected() {
        let err = MappingRegistry::builder()
            .register(order(ForeignKeyDescriptor::new("order_id", "id")))
            .build()
            .unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::MissingMapping));
        assert!(err.to_string().contains("Line"));
    }

    #[test]
    fn test_unknown_foreign_key_property_is_rejected() {
        let err = MappingRegistry::builder()
            .register(order(ForeignKeyDescriptor::new("order_id", "id").property("orderId")))
            .register(line())
            .build()
            .unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::InvalidRelation));
    }

    #[test]
    fn test_missing_mapping_lookup() {
        let registry = MappingRegistry::builder().register(line()).build().unwrap();
        let err = registry.mapping_for(&Order::default()).unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::MissingMapping));
        assert!(registry.generate_identity_key(&Order::default()).is_err());
    }

    #[test]
    fn test_duplicate_registration() {
        let err = MappingRegistry::builder()
            .register(line())
            .register(line())
            .build()
            .unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::InvalidArgument));
    }
}
