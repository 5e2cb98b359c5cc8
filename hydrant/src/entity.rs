use crate::metadata::EntityMeta;
use crate::serializer::context::SerializationContext;
use crate::value::{key_part, FieldValue};
use serde_json::Value as JsonValue;
use std::cell::{Ref, RefCell};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

pub type JsonMap = serde_json::Map<String, JsonValue>;
pub type FieldMap = BTreeMap<String, FieldValue>;

pub struct EntityData {
    meta: Arc<EntityMeta>,
    fields: FieldMap,
    initialized: bool,
    managed: bool,
    populated: HashSet<String>,
    original: Option<JsonMap>,
    serialization: Option<Rc<RefCell<SerializationContext>>>,
}

/// Shared handle to a hydrated entity; two handles are the same entity iff they point to the same cell.
#[derive(Clone)]
pub struct EntityRef(Rc<RefCell<EntityData>>);

#[derive(Clone)]
pub struct WeakEntityRef(Weak<RefCell<EntityData>>);

impl WeakEntityRef {
    pub fn upgrade(&self) -> Option<EntityRef> {
        self.0.upgrade().map(EntityRef)
    }
}

impl EntityRef {
    fn with_state(meta: Arc<EntityMeta>, initialized: bool, managed: bool) -> Self {
        EntityRef(Rc::new(RefCell::new(EntityData {
            meta,
            fields: FieldMap::new(),
            initialized,
            managed,
            populated: HashSet::new(),
            original: None,
            serialization: None,
        })))
    }

    /// A new, not yet persisted entity.
    pub fn new(meta: Arc<EntityMeta>) -> Self {
        EntityRef::with_state(meta, true, false)
    }

    /// A managed stand-in that only knows its primary key.
    pub fn reference(meta: Arc<EntityMeta>) -> Self {
        EntityRef::with_state(meta, false, true)
    }

    pub fn meta(&self) -> Arc<EntityMeta> {
        self.0.borrow().meta.clone()
    }

    pub fn entity_name(&self) -> String {
        self.0.borrow().meta.name.clone()
    }

    pub fn get(&self, property: &str) -> Option<FieldValue> {
        self.0.borrow().fields.get(property).cloned()
    }

    pub fn set(&self, property: &str, value: impl Into<FieldValue>) {
        self.0.borrow_mut().fields.insert(property.to_string(), value.into());
    }

    pub fn unset(&self, property: &str) -> Option<FieldValue> {
        self.0.borrow_mut().fields.remove(property)
    }

    pub fn has(&self, property: &str) -> bool {
        self.0.borrow().fields.contains_key(property)
    }

    /// True when the property holds a value other than null/undefined.
    pub fn is_set(&self, property: &str) -> bool {
        self.0.borrow().fields.get(property).map(|v| !v.is_empty()).unwrap_or(false)
    }

    pub fn fields(&self) -> Ref<'_, FieldMap> {
        Ref::map(self.0.borrow(), |data| &data.fields)
    }

    pub fn loaded_properties(&self) -> Vec<String> {
        self.0.borrow().fields.keys().cloned().collect()
    }

    pub fn is_initialized(&self) -> bool {
        self.0.borrow().initialized
    }

    pub fn set_initialized(&self, initialized: bool) {
        self.0.borrow_mut().initialized = initialized;
    }

    pub fn is_managed(&self) -> bool {
        self.0.borrow().managed
    }

    pub fn set_managed(&self, managed: bool) {
        self.0.borrow_mut().managed = managed;
    }

    /// Flags a relation as loaded on purpose, so it is expanded on serialization.
    pub fn mark_populated(&self, property: &str) {
        self.0.borrow_mut().populated.insert(property.to_string());
    }

    pub fn is_populated(&self, property: &str) -> bool {
        self.0.borrow().populated.contains(property)
    }

    pub fn populated_properties(&self) -> Vec<String> {
        let mut props: Vec<String> = self.0.borrow().populated.iter().cloned().collect();
        props.sort();
        props
    }

    pub fn primary_key_json(&self) -> Option<JsonValue> {
        let data = self.0.borrow();
        let mut parts = Vec::with_capacity(data.meta.primary_keys.len());
        for pk in &data.meta.primary_keys {
            parts.push(data.fields.get(pk).and_then(key_json)?);
        }
        if parts.len() == 1 {
            parts.pop()
        } else {
            Some(JsonValue::Array(parts))
        }
    }

    /// Primary key as `{ pk_name: value }`, even for single-column keys.
    pub fn primary_key_object(&self) -> Option<JsonMap> {
        let data = self.0.borrow();
        let mut object = JsonMap::new();
        for pk in &data.meta.primary_keys {
            let value = data.fields.get(pk).and_then(key_json)?;
            object.insert(pk.clone(), value);
        }
        Some(object)
    }

    pub fn primary_key_hash(&self) -> Option<String> {
        self.primary_key_json().map(|pk| key_part(&pk))
    }

    pub fn ptr_eq(&self, other: &EntityRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Address-based identity, stable for the lifetime of the entity.
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn downgrade(&self) -> WeakEntityRef {
        WeakEntityRef(Rc::downgrade(&self.0))
    }

    pub(crate) fn serialization_context(&self) -> Option<Rc<RefCell<SerializationContext>>> {
        self.0.borrow().serialization.clone()
    }

    pub(crate) fn attach_context(&self, ctx: Rc<RefCell<SerializationContext>>) {
        self.0.borrow_mut().serialization = Some(ctx);
    }

    pub(crate) fn detach_context(&self) {
        self.0.borrow_mut().serialization = None;
    }

    pub fn has_serialization_context(&self) -> bool {
        self.0.borrow().serialization.is_some()
    }

    pub fn original_data(&self) -> Option<JsonMap> {
        self.0.borrow().original.clone()
    }

    pub(crate) fn set_original_data(&self, original: JsonMap) {
        self.0.borrow_mut().original = Some(original);
    }

    /// Drops every field, which also breaks reference cycles through this entity.
    pub(crate) fn clear_fields(&self) {
        let fields = std::mem::take(&mut self.0.borrow_mut().fields);
        drop(fields);
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // relations are not followed, graphs are usually cyclic
        match self.0.try_borrow() {
            Ok(data) => f
                .debug_struct(&data.meta.name)
                .field("pk", &self.primary_key_json())
                .field("initialized", &data.initialized)
                .field("managed", &data.managed)
                .finish(),
            Err(_) => f.write_str("EntityRef(<borrowed>)"),
        }
    }
}

/// Key representation of a field used for primary keys and foreign key reduction.
pub(crate) fn key_json(value: &FieldValue) -> Option<JsonValue> {
    match value {
        FieldValue::Scalar(s) => Some(s.to_json()),
        FieldValue::ScalarRef(r) => r.get().map(|s| s.to_json()),
        FieldValue::Entity(e) => e.primary_key_json(),
        _ => None,
    }
}

/// Value object nested in an entity; owned by its parent, no identity of its own.
#[derive(Clone, Debug)]
pub struct Embeddable {
    pub meta: Arc<EntityMeta>,
    pub fields: FieldMap,
}

impl Embeddable {
    pub fn new(meta: Arc<EntityMeta>) -> Self {
        Embeddable { meta, fields: FieldMap::new() }
    }

    pub fn type_name(&self) -> &str {
        &self.meta.name
    }

    pub fn get(&self, property: &str) -> Option<&FieldValue> {
        self.fields.get(property)
    }

    pub fn set(&mut self, property: &str, value: impl Into<FieldValue>) {
        self.fields.insert(property.to_string(), value.into());
    }

    pub fn has(&self, property: &str) -> bool {
        self.fields.contains_key(property)
    }
}
