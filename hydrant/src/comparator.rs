//! Storage-form snapshots of hydrated entities and change detection against them.

use crate::entity::{Embeddable, EntityRef, FieldMap, JsonMap};
use crate::error::OrmError;
use crate::metadata::{EmbeddedMode, PropertyMeta, ReferenceKind};
use crate::registry::MetadataRegistry;
use crate::types::to_storage;
use crate::value::FieldValue;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Flat storage representation of every loaded, non-collection property.
///
/// Relations are reduced to their primary keys and inline embeddables to their prefixed columns.
pub fn prepare_entity(registry: &MetadataRegistry, entity: &EntityRef) -> Result<JsonMap, OrmError> {
    let meta = entity.meta();
    let fields = entity.fields().clone();
    prepare_fields(registry, &meta.properties, &fields)
}

fn prepare_fields(registry: &MetadataRegistry, props: &[Arc<PropertyMeta>], fields: &FieldMap) -> Result<JsonMap, OrmError> {
    let mut out = JsonMap::new();
    for prop in props {
        if let Some(value) = fields.get(&prop.name) {
            prepare_property(registry, prop, value, &mut out)?;
        }
    }
    Ok(out)
}

fn prepare_property(registry: &MetadataRegistry, prop: &PropertyMeta, value: &FieldValue, out: &mut JsonMap) -> Result<(), OrmError> {
    let inline = prop.kind == ReferenceKind::Embedded && prop.embedded_mode == EmbeddedMode::Inline && !prop.array;
    match value {
        FieldValue::Null | FieldValue::Undefined if inline => {
            for column in registry.flattened_columns(prop)? {
                out.insert(column.key, JsonValue::Null);
            }
        }
        FieldValue::Null | FieldValue::Undefined => {
            out.insert(prop.name.clone(), JsonValue::Null);
        }
        FieldValue::Scalar(scalar) => {
            out.insert(prop.name.clone(), to_storage(prop, scalar));
        }
        FieldValue::ScalarRef(reference) => {
            if reference.is_initialized() {
                let stored = reference.get().map(|s| to_storage(prop, &s)).unwrap_or(JsonValue::Null);
                out.insert(prop.name.clone(), stored);
            }
        }
        FieldValue::Entity(target) => {
            out.insert(prop.name.clone(), target.primary_key_json().unwrap_or(JsonValue::Null));
        }
        FieldValue::Embedded(embeddable) if inline => {
            let prefix = prop.embedded_prefix();
            for (key, stored) in prepare_embeddable(registry, embeddable)? {
                out.insert(format!("{prefix}{key}"), stored);
            }
        }
        FieldValue::Embedded(embeddable) => {
            out.insert(prop.name.clone(), JsonValue::Object(prepare_embeddable(registry, embeddable)?));
        }
        FieldValue::EmbeddedList(items) => {
            let mut stored = Vec::with_capacity(items.len());
            for item in items {
                stored.push(JsonValue::Object(prepare_embeddable(registry, item)?));
            }
            out.insert(prop.name.clone(), JsonValue::Array(stored));
        }
        FieldValue::Collection(_) | FieldValue::Raw(_) => {}
    }
    Ok(())
}

pub fn prepare_embeddable(registry: &MetadataRegistry, embeddable: &Embeddable) -> Result<JsonMap, OrmError> {
    prepare_fields(registry, &embeddable.meta.properties, &embeddable.fields)
}

/// Names of the properties whose storage form differs from the snapshot taken at load time.
///
/// Entities without a snapshot report every loaded property.
pub fn changed_properties(registry: &MetadataRegistry, entity: &EntityRef) -> Result<Vec<String>, OrmError> {
    let meta = entity.meta();
    let current = prepare_entity(registry, entity)?;
    let Some(original) = entity.original_data() else {
        let mut loaded = Vec::new();
        for prop in &meta.properties {
            if current_keys(registry, prop)?.iter().any(|key| current.contains_key(key)) {
                loaded.push(prop.name.clone());
            }
        }
        return Ok(loaded);
    };
    let mut changed = Vec::new();
    for prop in &meta.properties {
        let keys = current_keys(registry, prop)?;
        if keys.iter().any(|key| current.get(key) != original.get(key)) {
            changed.push(prop.name.clone());
        }
    }
    Ok(changed)
}

fn current_keys(registry: &MetadataRegistry, prop: &PropertyMeta) -> Result<Vec<String>, OrmError> {
    if prop.kind == ReferenceKind::Embedded && prop.embedded_mode == EmbeddedMode::Inline && !prop.array {
        return Ok(registry.flattened_columns(prop)?.into_iter().map(|c| c.key).collect());
    }
    Ok(vec![prop.name.clone()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EntityMeta, ScalarType};
    use serde_json::json;

    fn registry() -> MetadataRegistry {
        let mut registry = MetadataRegistry::new();
        registry
            .register(EntityMeta::embeddable("Address").property(PropertyMeta::scalar("city", ScalarType::Text)).property(PropertyMeta::scalar("zip", ScalarType::Text)))
            .unwrap();
        registry
            .register(
                EntityMeta::entity("User")
                    .property(PropertyMeta::scalar("id", ScalarType::Integer).primary())
                    .property(PropertyMeta::scalar("name", ScalarType::Text))
                    .property(PropertyMeta::embedded("address", "Address")),
            )
            .unwrap();
        registry
    }

    #[test]
    fn inline_embeddables_are_flattened() {
        let registry = registry();
        let user = EntityRef::new(registry.get("User").unwrap());
        user.set("id", 1);
        let mut address = Embeddable::new(registry.get("Address").unwrap());
        address.set("city", "Brno");
        user.set("address", FieldValue::Embedded(address));
        let prepared = prepare_entity(&registry, &user).unwrap();
        assert_eq!(JsonValue::Object(prepared), json!({"id": 1, "address_city": "Brno"}));
    }

    #[test]
    fn changes_are_reported_per_property() {
        let registry = registry();
        let user = EntityRef::new(registry.get("User").unwrap());
        user.set("id", 1);
        user.set("name", "Ann");
        assert_eq!(changed_properties(&registry, &user).unwrap(), vec!["id", "name"]);

        user.set_original_data(prepare_entity(&registry, &user).unwrap());
        assert!(changed_properties(&registry, &user).unwrap().is_empty());

        user.set("name", "Bob");
        user.set("address", FieldValue::Null);
        assert_eq!(changed_properties(&registry, &user).unwrap(), vec!["name", "address"]);
    }
}
