use crate::comparator::prepare_entity;
use crate::entity::{Embeddable, EntityRef, JsonMap};
use crate::error::OrmError;
use crate::hydrator::{HydrateCall, HydrationMode};
use crate::metadata::{EntityMeta, PropertyMeta};
use crate::registry::MetadataRegistry;
use crate::settings::TimezoneRule;
use crate::types::to_entity_scalar;
use crate::value::KEY_SEPARATOR;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Whether `raw` is nothing but a primary key of `meta`: a scalar for single keys,
/// an array of scalars for composite keys, or an object with exactly the key names.
pub fn is_primary_key(meta: &EntityMeta, raw: &JsonValue) -> bool {
    let pks = &meta.primary_keys;
    match raw {
        JsonValue::Null => false,
        JsonValue::Object(object) => object.len() == pks.len() && pks.iter().all(|pk| object.contains_key(pk)),
        JsonValue::Array(items) => pks.len() > 1 && items.len() == pks.len() && items.iter().all(|i| !i.is_object() && !i.is_array()),
        _ => pks.len() == 1,
    }
}

/// Expands a primary key in any accepted shape into `{ pk_name: value }`.
pub fn primary_key_data(meta: &EntityMeta, pk: &JsonValue) -> Result<JsonMap, OrmError> {
    let pks = &meta.primary_keys;
    let mut data = JsonMap::new();
    match pk {
        JsonValue::Object(object) => {
            for name in pks {
                if let Some(value) = object.get(name) {
                    data.insert(name.clone(), value.clone());
                }
            }
        }
        JsonValue::Array(items) if items.len() == pks.len() => {
            for (name, value) in pks.iter().zip(items) {
                data.insert(name.clone(), value.clone());
            }
        }
        scalar if pks.len() == 1 && !scalar.is_array() => {
            data.insert(pks[0].clone(), scalar.clone());
        }
        other => {
            return Err(OrmError::mismatch(&meta.name, &pks.join(KEY_SEPARATOR), "primary key", other));
        }
    }
    Ok(data)
}

/// Identity map key of a record, when every primary key column is present.
///
/// Key values are converted to their entity form first, so the hash agrees with
/// [`EntityRef::primary_key_hash`] of the entity the record hydrates into.
pub fn primary_key_hash(registry: &MetadataRegistry, meta: &EntityMeta, data: &JsonMap, tz: &TimezoneRule) -> Option<String> {
    let mut parts = Vec::with_capacity(meta.primary_keys.len());
    for pk in &meta.primary_keys {
        let raw = data.get(pk).filter(|v| !v.is_null())?;
        let prop = meta.prop(pk)?;
        let part = if prop.kind.is_to_one() {
            // relation inside the key hashes by the target's own key columns only
            let target = registry.find(prop.target_name()?)?;
            let key = primary_key_data(&target, raw).ok()?;
            primary_key_hash(registry, &target, &key, tz)?
        } else {
            to_entity_scalar(&meta.name, prop, raw, tz).ok()?.key_part()
        };
        parts.push(part);
    }
    Some(parts.join(KEY_SEPARATOR))
}

impl HydrateCall<'_> {
    fn target_meta(&self, prop: &PropertyMeta) -> Result<Arc<EntityMeta>, OrmError> {
        self.hydrator.registry().get(prop.target_name().unwrap_or_default())
    }

    fn find_managed(&self, meta: &EntityMeta, data: &JsonMap) -> Option<EntityRef> {
        let tz = self.hydrator.settings().timezone_rule();
        let hash = primary_key_hash(self.hydrator.registry(), meta, data, &tz)?;
        self.identity_map.get(meta, &hash)
    }

    /// Bare key becomes a lazy reference, anything else a hydrated entity.
    pub fn resolve_to_one(&mut self, entity: &str, prop: &PropertyMeta, raw: &JsonValue) -> Result<EntityRef, OrmError> {
        let target = self.target_meta(prop)?;
        if is_primary_key(&target, raw) {
            return self.create_reference(&target, raw);
        }
        match raw {
            JsonValue::Object(data) => self.create(&target, data),
            other => Err(OrmError::mismatch(entity, &prop.name, "object or primary key", other)),
        }
    }

    pub fn resolve_to_many_item(&mut self, entity: &str, prop: &PropertyMeta, raw: &JsonValue) -> Result<EntityRef, OrmError> {
        self.resolve_to_one(entity, prop, raw)
    }

    pub fn create_reference(&mut self, meta: &Arc<EntityMeta>, pk: &JsonValue) -> Result<EntityRef, OrmError> {
        let data = primary_key_data(meta, pk)?;
        if let Some(existing) = self.find_managed(meta, &data) {
            return Ok(existing);
        }
        let entity = EntityRef::reference(meta.clone());
        let procedure = self.hydrator.compile(&meta.name, HydrationMode::Reference)?;
        procedure.run(self, &mut entity.clone(), &data)?;
        self.identity_map.store(&entity);
        Ok(entity)
    }

    /// Looks the record up in the identity map before allocating; a found reference
    /// is upgraded in place, a found loaded entity is merged into only when asked to.
    pub fn create(&mut self, declared: &Arc<EntityMeta>, data: &JsonMap) -> Result<EntityRef, OrmError> {
        let meta = self.hydrator.registry().resolve_subtype(declared, data);
        if self.mode == HydrationMode::Reference {
            return self.create_reference(&meta, &JsonValue::Object(data.clone()));
        }
        if !self.opts.new_entity {
            if let Some(existing) = self.find_managed(&meta, data) {
                if !existing.is_initialized() || self.opts.merge {
                    self.hydrate_managed(&existing, data)?;
                }
                return Ok(existing);
            }
        }
        if self.opts.new_entity {
            let entity = EntityRef::new(meta.clone());
            let procedure = self.hydrator.compile(&meta.name, HydrationMode::Full)?;
            procedure.run(self, &mut entity.clone(), data)?;
            return Ok(entity);
        }
        let entity = EntityRef::reference(meta.clone());
        // keyed first, so back-references inside `data` resolve to this very instance
        let reference = self.hydrator.compile(&meta.name, HydrationMode::Reference)?;
        reference.run(self, &mut entity.clone(), data)?;
        self.identity_map.store(&entity);
        self.hydrate_managed(&entity, data)?;
        Ok(entity)
    }

    fn hydrate_managed(&mut self, entity: &EntityRef, data: &JsonMap) -> Result<(), OrmError> {
        entity.set_initialized(true);
        let procedure = self.hydrator.compile(&entity.entity_name(), HydrationMode::Full)?;
        procedure.run(self, &mut entity.clone(), data)?;
        entity.set_managed(true);
        let original = prepare_entity(self.hydrator.registry(), entity)?;
        entity.set_original_data(original);
        Ok(())
    }

    /// Hydrates one embeddable value, picking the polymorphic subtype from its discriminator.
    pub fn hydrate_embeddable(&mut self, prop: &PropertyMeta, data: &JsonMap, existing: Option<Embeddable>) -> Result<Embeddable, OrmError> {
        let declared = self.target_meta(prop)?;
        let discriminated = declared.discriminator_column.as_deref().is_some_and(|column| data.contains_key(column));
        let meta = match &existing {
            // partial rows without a discriminator merge into the subtype already there
            Some(current) if !discriminated => current.meta.clone(),
            _ => self.hydrator.registry().resolve_subtype(&declared, data),
        };
        let mut embeddable = match existing {
            Some(current) if current.meta.name == meta.name => current,
            _ => Embeddable::new(meta.clone()),
        };
        let procedure = self.hydrator.compile(&meta.name, HydrationMode::Full)?;
        let mode = std::mem::replace(&mut self.mode, HydrationMode::Full);
        let result = procedure.run(self, &mut embeddable, data);
        self.mode = mode;
        result.map(|_| embeddable)
    }
}
