use crate::entity::JsonMap;
use crate::error::OrmError;
use crate::metadata::{EmbeddedMode, EntityMeta, PropertyMeta, ReferenceKind};
use crate::value::key_part;
use crate::{debug, warn};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// One flattened column of an inline embeddable, keyed as it appears in raw records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlatColumn {
    /// Raw record key, the embedded prefix followed by the sub-property name.
    pub key: String,
    /// Name of the sub-property inside the embeddable.
    pub property: String,
    /// Storage column name.
    pub column: String,
}

/// All entity and embeddable metadata of one schema version.
///
/// Subtypes must be registered after their base; registration rewrites the base's
/// discriminator map, so metadata handles should be fetched once registration is done.
#[derive(Default, Debug)]
pub struct MetadataRegistry {
    types: BTreeMap<String, Arc<EntityMeta>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        MetadataRegistry::default()
    }

    pub fn register(&mut self, mut meta: EntityMeta) -> Result<Arc<EntityMeta>, OrmError> {
        if self.types.contains_key(&meta.name) {
            return Err(OrmError::InvalidMetadata { entity: meta.name.clone(), message: "type registered twice".to_string() });
        }
        if let Some(base_name) = meta.extends.clone() {
            let base = self.get(&base_name)?;
            let own = std::mem::take(&mut meta.properties);
            let mut merged: Vec<Arc<PropertyMeta>> =
                base.properties.iter().filter(|p| !own.iter().any(|o| o.name == p.name)).cloned().collect();
            merged.extend(own);
            meta.properties = merged;
            let mut primary_keys = base.primary_keys.clone();
            primary_keys.extend(meta.primary_keys.iter().filter(|pk| !base.primary_keys.contains(pk)).cloned());
            meta.primary_keys = primary_keys;
            meta.root = base.root.clone();
            meta.embeddable = base.embeddable;
            if meta.discriminator_column.is_none() {
                meta.discriminator_column = base.discriminator_column.clone();
            }
            let mut getters = base.getters.clone();
            getters.retain(|g| !meta.getters.iter().any(|own| own.name == g.name));
            getters.extend(std::mem::take(&mut meta.getters));
            meta.getters = getters;
        }
        if let Some(value) = meta.discriminator_value.clone() {
            meta.discriminator_map.insert(value.clone(), meta.name.clone());
            self.add_to_ancestors(meta.extends.clone(), &value, &meta.name)?;
        }
        meta.validate()?;
        let meta = Arc::new(meta);
        debug!("Registered {} '{}'", if meta.embeddable { "embeddable" } else { "entity" }, meta.name);
        self.types.insert(meta.name.clone(), meta.clone());
        Ok(meta)
    }

    fn add_to_ancestors(&mut self, mut ancestor: Option<String>, value: &str, subtype: &str) -> Result<(), OrmError> {
        while let Some(name) = ancestor {
            let mut updated = (*self.get(&name)?).clone();
            updated.discriminator_map.insert(value.to_string(), subtype.to_string());
            ancestor = updated.extends.clone();
            self.types.insert(name, Arc::new(updated));
        }
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<Arc<EntityMeta>> {
        self.types.get(name).cloned()
    }

    pub fn get(&self, name: &str) -> Result<Arc<EntityMeta>, OrmError> {
        self.find(name).ok_or_else(|| OrmError::UnknownEntity(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.types.keys().cloned().collect()
    }

    /// Cross-type checks: relation targets exist, inverse sides exist, embeddables are embeddable.
    pub fn validate(&self) -> Result<(), OrmError> {
        for meta in self.types.values() {
            for prop in &meta.properties {
                let Some(target_name) = prop.target_name() else { continue };
                let invalid = |message: String| OrmError::InvalidMetadata { entity: meta.name.clone(), message };
                let target = self
                    .find(target_name)
                    .ok_or_else(|| invalid(format!("property '{}' targets unknown type '{}'", prop.name, target_name)))?;
                if prop.kind == ReferenceKind::Embedded && !target.embeddable {
                    return Err(invalid(format!("property '{}' embeds entity '{}'", prop.name, target_name)));
                }
                if prop.kind.is_relation() && target.embeddable {
                    return Err(invalid(format!("property '{}' relates to embeddable '{}'", prop.name, target_name)));
                }
                if let Some(inverse) = prop.inverse() {
                    if target.prop(inverse).is_none() {
                        return Err(invalid(format!("inverse property '{}.{}' does not exist", target_name, inverse)));
                    }
                }
            }
        }
        Ok(())
    }

    /// Picks the concrete type for a record from its discriminator column.
    pub fn resolve_subtype(&self, meta: &Arc<EntityMeta>, data: &JsonMap) -> Arc<EntityMeta> {
        let Some(column) = meta.discriminator_column.as_deref() else {
            return meta.clone();
        };
        let Some(value) = data.get(column).filter(|v| !v.is_null()) else {
            return meta.clone();
        };
        let key = key_part(value);
        match meta.discriminator_map.get(&key).and_then(|name| self.find(name)) {
            Some(subtype) => subtype,
            None => {
                warn!("Unknown discriminator '{}' for {}, falling back to declared type", key, meta.name);
                meta.clone()
            }
        }
    }

    /// The type itself followed by every registered subtype.
    pub fn with_subtypes(&self, meta: &Arc<EntityMeta>) -> Vec<Arc<EntityMeta>> {
        let mut seen = HashSet::new();
        let mut all = vec![meta.clone()];
        seen.insert(meta.name.clone());
        for name in meta.discriminator_map.values() {
            if seen.insert(name.clone()) {
                if let Some(sub) = self.find(name) {
                    all.push(sub);
                }
            }
        }
        all
    }

    /// Union of the properties of a type and its subtypes, first declaration wins.
    pub fn union_properties(&self, meta: &Arc<EntityMeta>) -> Vec<Arc<PropertyMeta>> {
        let mut seen = HashSet::new();
        let mut props = Vec::new();
        for sub in self.with_subtypes(meta) {
            for prop in &sub.properties {
                if seen.insert(prop.name.clone()) {
                    props.push(prop.clone());
                }
            }
        }
        props
    }

    /// Raw keys an inline embedded property occupies in its parent record, nested inline embeddables included.
    pub fn flattened_columns(&self, prop: &PropertyMeta) -> Result<Vec<FlatColumn>, OrmError> {
        let mut out = Vec::new();
        self.collect_flattened(prop, "", &mut out)?;
        Ok(out)
    }

    fn collect_flattened(&self, prop: &PropertyMeta, outer: &str, out: &mut Vec<FlatColumn>) -> Result<(), OrmError> {
        let target = self.get(prop.target_name().unwrap_or_default())?;
        let prefix = format!("{outer}{}", prop.embedded_prefix());
        for sub in self.union_properties(&target) {
            if sub.kind == ReferenceKind::Embedded && sub.embedded_mode == EmbeddedMode::Inline && !sub.array {
                let mut nested = Vec::new();
                self.collect_flattened(&sub, &prefix, &mut nested)?;
                out.extend(nested.into_iter().map(|col| FlatColumn {
                    property: col.key.strip_prefix(&prefix).unwrap_or(&col.key).to_string(),
                    ..col
                }));
            } else {
                out.push(FlatColumn {
                    key: format!("{prefix}{}", sub.name),
                    property: sub.name.clone(),
                    column: format!("{prefix}{}", sub.field_name()),
                });
            }
        }
        Ok(())
    }
}
