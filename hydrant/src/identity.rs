use crate::entity::EntityRef;
use crate::metadata::EntityMeta;
use std::collections::HashMap;

/// Lookup of already materialized entities, consulted before any allocation.
///
/// Keys are the root entity name of an inheritance tree plus the primary key hash,
/// so a subtype and its base share one identity per row.
pub trait IdentityMap {
    fn get(&self, meta: &EntityMeta, pk_hash: &str) -> Option<EntityRef>;
    fn store(&mut self, entity: &EntityRef);
    fn remove(&mut self, entity: &EntityRef) -> Option<EntityRef>;
}

#[derive(Default)]
pub struct SimpleIdentityMap {
    entries: HashMap<(String, String), EntityRef>,
}

impl SimpleIdentityMap {
    pub fn new() -> Self {
        SimpleIdentityMap::default()
    }

    fn key_of(entity: &EntityRef) -> Option<(String, String)> {
        let root = entity.meta().root.clone();
        entity.primary_key_hash().map(|hash| (root, hash))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &EntityRef> {
        self.entries.values()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Clears the fields of every known entity, releasing reference cycles between them.
    pub fn dispose(mut self) {
        for (_, entity) in self.entries.drain() {
            entity.clear_fields();
        }
    }
}

impl IdentityMap for SimpleIdentityMap {
    fn get(&self, meta: &EntityMeta, pk_hash: &str) -> Option<EntityRef> {
        self.entries.get(&(meta.root.clone(), pk_hash.to_string())).cloned()
    }

    /// Entities without a complete primary key are not stored.
    fn store(&mut self, entity: &EntityRef) {
        if let Some(key) = SimpleIdentityMap::key_of(entity) {
            self.entries.insert(key, entity.clone());
        }
    }

    fn remove(&mut self, entity: &EntityRef) -> Option<EntityRef> {
        SimpleIdentityMap::key_of(entity).and_then(|key| self.entries.remove(&key))
    }
}
