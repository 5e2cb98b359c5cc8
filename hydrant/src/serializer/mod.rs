//! Cycle-safe conversion of entity graphs into plain JSON.

pub mod context;

use crate::collection::Collection;
use crate::entity::{Embeddable, EntityRef, JsonMap};
use crate::error::OrmError;
use crate::metadata::{GetterMeta, PropertyMeta};
use crate::settings::Settings;
use crate::types::to_external;
use crate::value::FieldValue;
use context::SerializationContext;
use serde_json::Value as JsonValue;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SerializeOptions {
    /// Relations to expand, dotted for nested ones, `*` for all.
    pub populate: Vec<String>,
    pub exclude: Vec<String>,
    /// When set, properties declaring groups are visible only if they share one.
    pub groups: Option<Vec<String>>,
    pub skip_null: bool,
    pub force_object: bool,
    pub ignore_serializers: bool,
}

impl SerializeOptions {
    pub fn new() -> Self {
        SerializeOptions::default()
    }

    #[must_use]
    pub fn populate(mut self, paths: &[&str]) -> Self {
        self.populate = paths.iter().map(|p| p.to_string()).collect();
        self
    }

    #[must_use]
    pub fn exclude(mut self, paths: &[&str]) -> Self {
        self.exclude = paths.iter().map(|p| p.to_string()).collect();
        self
    }

    #[must_use]
    pub fn groups(mut self, groups: &[&str]) -> Self {
        self.groups = Some(groups.iter().map(|g| g.to_string()).collect());
        self
    }

    #[must_use]
    pub fn skip_null(mut self) -> Self {
        self.skip_null = true;
        self
    }

    #[must_use]
    pub fn force_object(mut self) -> Self {
        self.force_object = true;
        self
    }

    #[must_use]
    pub fn ignore_serializers(mut self) -> Self {
        self.ignore_serializers = true;
        self
    }

    /// Options for serializing the value of `prop`, hints narrowed to its sub-paths.
    fn child(&self, prop: &str) -> SerializeOptions {
        SerializeOptions {
            populate: extract_child_elements(&self.populate, prop, Some("*")),
            exclude: extract_child_elements(&self.exclude, prop, None),
            ..self.clone()
        }
    }

    fn is_populated(&self, prop: &str) -> bool {
        let prefix = format!("{prop}.");
        self.populate.iter().any(|p| p == prop || p == "*" || p.starts_with(&prefix))
    }
}

/// Entries of `items` below `prefix`, with the prefix stripped; `all` passes through unchanged.
pub fn extract_child_elements(items: &[String], prefix: &str, all: Option<&str>) -> Vec<String> {
    let dotted = format!("{prefix}.");
    items
        .iter()
        .filter_map(|item| {
            if Some(item.as_str()) == all {
                Some(item.clone())
            } else {
                item.strip_prefix(&dotted).map(str::to_string)
            }
        })
        .collect()
}

/// Visibility of a stored property: groups decide first, then populate, exclude, and the
/// hidden flag; `_`-prefixed names are private unless part of the primary key.
pub fn is_visible(prop: &PropertyMeta, options: &SerializeOptions) -> bool {
    if let Some(groups) = &options.groups {
        if !prop.groups.is_empty() {
            return prop.groups.iter().any(|g| groups.contains(g));
        }
    }
    if options.is_populated(&prop.name) {
        return true;
    }
    if options.exclude.iter().any(|e| e == &prop.name) {
        return false;
    }
    !prop.hidden && (prop.primary || !prop.name.starts_with('_'))
}

fn is_getter_visible(getter: &GetterMeta, options: &SerializeOptions) -> bool {
    if let Some(groups) = &options.groups {
        if !getter.groups.is_empty() {
            return getter.groups.iter().any(|g| groups.contains(g));
        }
    }
    !getter.hidden && !options.exclude.iter().any(|e| e == &getter.name) && !getter.name.starts_with('_')
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SerializationStats {
    /// Distinct entities entered.
    pub visited: usize,
    /// Deepest entity nesting reached, the root being 1.
    pub max_depth: usize,
}

type Context = Rc<RefCell<SerializationContext>>;

#[derive(Default)]
pub struct EntitySerializer {
    settings: Arc<Settings>,
}

impl EntitySerializer {
    pub fn new(settings: Arc<Settings>) -> Self {
        EntitySerializer { settings }
    }

    pub fn serialize(&self, entity: &EntityRef, options: &SerializeOptions) -> Result<JsonValue, OrmError> {
        self.serialize_with_stats(entity, options).map(|(value, _)| value)
    }

    pub fn serialize_with_stats(&self, entity: &EntityRef, options: &SerializeOptions) -> Result<(JsonValue, SerializationStats), OrmError> {
        let (ctx, created) = match entity.serialization_context() {
            Some(attached) => (attached, false),
            None => {
                let ctx = Rc::new(RefCell::new(SerializationContext::new(options.populate.clone())));
                SerializationContext::propagate(&ctx, entity);
                (ctx, true)
            }
        };
        let result = self.serialize_entity(entity, options, &ctx);
        let stats = {
            let ctx = ctx.borrow();
            SerializationStats { visited: ctx.visited_count(), max_depth: ctx.max_depth() }
        };
        if created {
            ctx.borrow_mut().close();
        }
        result.map(|object| (JsonValue::Object(object), stats))
    }

    fn serialize_entity(&self, entity: &EntityRef, options: &SerializeOptions, ctx: &Context) -> Result<JsonMap, OrmError> {
        let visited = ctx.borrow_mut().enter_entity(entity);
        let result = self.serialize_entity_props(entity, options, ctx, visited);
        ctx.borrow_mut().exit_entity();
        result
    }

    fn serialize_entity_props(&self, entity: &EntityRef, options: &SerializeOptions, ctx: &Context, visited: bool) -> Result<JsonMap, OrmError> {
        let meta = entity.meta();
        let mut out = JsonMap::new();
        for prop in meta.ordered_props() {
            let Some(value) = entity.get(&prop.name) else { continue };
            if !is_visible(&prop, options) {
                continue;
            }
            let cycle = ctx.borrow_mut().visit(&meta.name, &prop.name);
            if cycle && visited {
                continue;
            }
            let processed = self.process_property(&meta.name, &prop, value, options, ctx);
            if !cycle {
                ctx.borrow_mut().leave(&meta.name, &prop.name)?;
            }
            if let Some(value) = processed? {
                self.insert(&mut out, prop.output_name(), value, options);
            }
        }
        if !entity.is_initialized() {
            return Ok(out);
        }
        for getter in meta.getters.iter().filter(|g| is_getter_visible(g, options)) {
            let value = (getter.compute)(entity);
            self.insert(&mut out, &getter.name, value, options);
        }
        Ok(out)
    }

    fn insert(&self, out: &mut JsonMap, key: &str, mut value: JsonValue, options: &SerializeOptions) {
        if options.skip_null {
            if value.is_null() {
                return;
            }
            drop_nulls(&mut value);
        }
        out.insert(key.to_string(), value);
    }

    /// `None` means the property is left out of the output.
    fn process_property(&self, owner: &str, prop: &PropertyMeta, value: FieldValue, options: &SerializeOptions, ctx: &Context) -> Result<Option<JsonValue>, OrmError> {
        if let (Some(serializer), false) = (&prop.serializer, options.ignore_serializers) {
            return Ok(Some(serializer(&value)));
        }
        let processed = match value {
            FieldValue::Null => Some(JsonValue::Null),
            FieldValue::Undefined => None,
            FieldValue::Scalar(scalar) => Some(to_external(prop, &scalar)),
            FieldValue::ScalarRef(reference) => {
                if reference.is_initialized() {
                    Some(reference.get().map(|s| to_external(prop, &s)).unwrap_or(JsonValue::Null))
                } else {
                    None
                }
            }
            FieldValue::Entity(target) => Some(self.process_entity(owner, prop, &target, options, ctx)?),
            FieldValue::Collection(collection) => self.process_collection(owner, prop, &collection, options, ctx)?,
            FieldValue::Embedded(embeddable) => Some(JsonValue::Object(self.serialize_embeddable(&embeddable, &options.child(&prop.name), ctx)?)),
            FieldValue::EmbeddedList(items) => {
                let child = options.child(&prop.name);
                let mut list = Vec::with_capacity(items.len());
                for item in &items {
                    list.push(JsonValue::Object(self.serialize_embeddable(item, &child, ctx)?));
                }
                Some(JsonValue::Array(list))
            }
            FieldValue::Raw(raw) => return Err(OrmError::RawSqlSerialization(raw.sql)),
        };
        Ok(processed)
    }

    fn expands(&self, owner: &str, prop: &PropertyMeta, target: &EntityRef, options: &SerializeOptions, ctx: &Context) -> bool {
        let populated = options.is_populated(&prop.name) || ctx.borrow().is_marked(owner, &prop.name);
        (populated && target.is_initialized()) || !target.is_managed()
    }

    fn process_entity(&self, owner: &str, prop: &PropertyMeta, target: &EntityRef, options: &SerializeOptions, ctx: &Context) -> Result<JsonValue, OrmError> {
        let child = options.child(&prop.name);
        if self.expands(owner, prop, target, options, ctx) {
            return self.serialize_entity(target, &child, ctx).map(JsonValue::Object);
        }
        Ok(self.reduce_to_key(target, &child, options))
    }

    fn process_collection(&self, owner: &str, prop: &PropertyMeta, collection: &Collection, options: &SerializeOptions, ctx: &Context) -> Result<Option<JsonValue>, OrmError> {
        if !collection.is_initialized() {
            return Ok(None);
        }
        let child = options.child(&prop.name);
        let mut items = Vec::new();
        for item in collection.items()? {
            if self.expands(owner, prop, &item, options, ctx) {
                items.push(JsonValue::Object(self.serialize_entity(&item, &child, ctx)?));
            } else {
                items.push(self.reduce_to_key(&item, &child, options));
            }
        }
        Ok(Some(JsonValue::Array(items)))
    }

    /// Primary key of an unexpanded relation: an object when forced or composite, otherwise the bare value.
    fn reduce_to_key(&self, target: &EntityRef, child: &SerializeOptions, options: &SerializeOptions) -> JsonValue {
        let meta = target.meta();
        let Some(pk) = target.primary_key_object() else {
            return JsonValue::Null;
        };
        let visible: Vec<String> = meta.primary_props().iter().filter(|p| is_visible(p, child)).map(|p| p.name.clone()).collect();
        let pruned: JsonMap = pk.into_iter().filter(|(k, _)| visible.contains(k)).collect();
        if options.force_object || self.settings.serialization.force_object {
            return JsonValue::Object(pruned);
        }
        if !meta.is_composite_pk() {
            return target.primary_key_json().unwrap_or(JsonValue::Null);
        }
        if visible.len() == 1 {
            return pruned.get(&visible[0]).cloned().unwrap_or(JsonValue::Null);
        }
        JsonValue::Object(pruned)
    }

    fn serialize_embeddable(&self, embeddable: &Embeddable, options: &SerializeOptions, ctx: &Context) -> Result<JsonMap, OrmError> {
        let mut out = JsonMap::new();
        for prop in &embeddable.meta.properties {
            let Some(value) = embeddable.get(&prop.name) else { continue };
            if !is_visible(prop, options) {
                continue;
            }
            if let Some(value) = self.process_property(&embeddable.meta.name, prop, value.clone(), options, ctx)? {
                self.insert(&mut out, prop.output_name(), value, options);
            }
        }
        Ok(out)
    }
}

fn drop_nulls(value: &mut JsonValue) {
    match value {
        JsonValue::Object(object) => {
            object.retain(|_, v| !v.is_null());
            object.values_mut().for_each(drop_nulls);
        }
        JsonValue::Array(items) => items.iter_mut().for_each(drop_nulls),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ScalarType;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn child_elements_strip_the_prefix() {
        let items = strings(&["books", "books.author", "books.tags.name", "*", "profile"]);
        assert_eq!(extract_child_elements(&items, "books", Some("*")), strings(&["author", "tags.name", "*"]));
        assert_eq!(extract_child_elements(&items, "books", None), strings(&["author", "tags.name"]));
    }

    #[test]
    fn visibility_rules() {
        let name = PropertyMeta::scalar("name", ScalarType::Text);
        let secret = PropertyMeta::scalar("_secret", ScalarType::Text);
        let hidden = PropertyMeta::scalar("email", ScalarType::Text).hidden();
        let admin = PropertyMeta::scalar("revenue", ScalarType::Float).groups(&["admin"]);
        let private_key = PropertyMeta::scalar("_id", ScalarType::Integer).primary();

        let defaults = SerializeOptions::new();
        assert!(is_visible(&name, &defaults));
        assert!(!is_visible(&secret, &defaults));
        assert!(!is_visible(&hidden, &defaults));
        assert!(is_visible(&admin, &defaults));
        assert!(is_visible(&private_key, &defaults));

        assert!(!is_visible(&name, &SerializeOptions::new().exclude(&["name"])));
        assert!(is_visible(&hidden, &SerializeOptions::new().populate(&["email"])));
        assert!(!is_visible(&admin, &SerializeOptions::new().groups(&["public"])));
        assert!(is_visible(&admin, &SerializeOptions::new().groups(&["admin"])));
    }

    #[test]
    fn nulls_are_dropped_recursively() {
        let mut value = serde_json::json!({"a": null, "b": {"c": null, "d": 1}, "e": [{"f": null}]});
        drop_nulls(&mut value);
        assert_eq!(value, serde_json::json!({"b": {"d": 1}, "e": [{}]}));
    }
}
