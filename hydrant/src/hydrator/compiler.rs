use crate::collection::Collection;
use crate::entity::{Embeddable, EntityRef, JsonMap};
use crate::error::OrmError;
use crate::hydrator::{HydrateCall, HydrationMode};
use crate::info;
use crate::metadata::{EmbeddedMode, EntityMeta, PropertyMeta, ReferenceKind};
use crate::registry::{FlatColumn, MetadataRegistry};
use crate::settings::{null_sentinel, Settings, TimezoneRule};
use crate::types::to_entity_scalar;
use crate::value::{FieldValue, ScalarReference};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Target of a procedure run: an entity or an embeddable.
pub trait FieldSink {
    fn type_name(&self) -> String;
    fn field(&self, name: &str) -> Option<FieldValue>;
    fn assign(&mut self, name: &str, value: FieldValue);
    /// The entity that owns collections and inverse links created by the run.
    fn owner(&self) -> Option<EntityRef>;
}

impl FieldSink for EntityRef {
    fn type_name(&self) -> String {
        self.entity_name()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        self.get(name)
    }

    fn assign(&mut self, name: &str, value: FieldValue) {
        self.set(name, value);
    }

    fn owner(&self) -> Option<EntityRef> {
        Some(self.clone())
    }
}

impl FieldSink for Embeddable {
    fn type_name(&self) -> String {
        self.meta.name.clone()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        self.fields.get(name).cloned()
    }

    fn assign(&mut self, name: &str, value: FieldValue) {
        self.fields.insert(name.to_string(), value);
    }

    fn owner(&self) -> Option<EntityRef> {
        None
    }
}

type RuleFn = dyn Fn(&mut HydrateCall<'_>, &mut dyn FieldSink, &JsonMap) -> Result<(), OrmError> + Send + Sync;

/// Hydration step of a single property, decided once per type.
pub struct PropertyRule {
    pub property: Arc<PropertyMeta>,
    apply: Box<RuleFn>,
}

/// Per `(type, mode)` rule table.
pub struct Procedure {
    pub entity: String,
    pub mode: HydrationMode,
    rules: Vec<PropertyRule>,
}

impl Procedure {
    /// Applies every rule in declaration order, primary keys first.
    pub fn run(&self, call: &mut HydrateCall<'_>, target: &mut dyn FieldSink, data: &JsonMap) -> Result<(), OrmError> {
        for rule in &self.rules {
            (rule.apply)(call, target, data)?;
        }
        Ok(())
    }

    pub fn properties(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.property.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Append-only cache of compiled procedures.
#[derive(Default)]
pub struct Compiler {
    cache: RwLock<HashMap<(String, HydrationMode), Arc<Procedure>>>,
}

impl Compiler {
    pub fn new() -> Self {
        Compiler::default()
    }

    pub fn len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_or_compile(&self, registry: &MetadataRegistry, settings: &Settings, entity: &str, mode: HydrationMode) -> Result<Arc<Procedure>, OrmError> {
        let key = (entity.to_string(), mode);
        if let Some(procedure) = self.cache.read()?.get(&key) {
            return Ok(procedure.clone());
        }
        let meta = registry.get(entity)?;
        let compiled = Arc::new(compile(registry, settings, &meta, mode)?);
        // racing compilations are equivalent, the first one stored wins
        let mut cache = self.cache.write()?;
        let procedure = cache
            .entry(key)
            .or_insert_with(|| {
                info!("Compiled {:?} hydration of {} with {} rules", mode, entity, compiled.len());
                compiled
            })
            .clone();
        Ok(procedure)
    }
}

/// Shared inputs of every rule built for one type.
struct RuleEnv {
    entity: String,
    force_undefined: bool,
    timezone: TimezoneRule,
    mode: HydrationMode,
}

impl RuleEnv {
    fn null_value(&self) -> FieldValue {
        null_sentinel(self.force_undefined)
    }
}

fn rule<F>(apply: F) -> Box<RuleFn>
where
    F: Fn(&mut HydrateCall<'_>, &mut dyn FieldSink, &JsonMap) -> Result<(), OrmError> + Send + Sync + 'static,
{
    Box::new(apply)
}

fn current_embedded(sink: &dyn FieldSink, name: &str) -> Option<Embeddable> {
    sink.field(name).and_then(|v| v.as_embedded().cloned())
}

pub fn compile(registry: &MetadataRegistry, settings: &Settings, meta: &Arc<EntityMeta>, mode: HydrationMode) -> Result<Procedure, OrmError> {
    let env = Arc::new(RuleEnv {
        entity: meta.name.clone(),
        force_undefined: settings.force_undefined,
        timezone: settings.timezone_rule(),
        mode,
    });
    let props = match mode {
        HydrationMode::Full => meta.ordered_props(),
        HydrationMode::Reference => meta.primary_props(),
    };
    let mut rules = Vec::with_capacity(props.len());
    for prop in props {
        let apply: Box<RuleFn> = match prop.kind {
            ReferenceKind::Scalar => scalar_rule(env.clone(), prop.clone()),
            ReferenceKind::ManyToOne | ReferenceKind::OneToOne => to_one_rule(env.clone(), prop.clone()),
            ReferenceKind::OneToMany | ReferenceKind::ManyToMany => {
                if meta.embeddable {
                    return Err(OrmError::InvalidMetadata {
                        entity: meta.name.clone(),
                        message: format!("embeddables cannot hold to-many relation '{}'", prop.name),
                    });
                }
                to_many_rule(env.clone(), prop.clone())
            }
            ReferenceKind::Embedded if prop.array => embedded_array_rule(env.clone(), prop.clone()),
            ReferenceKind::Embedded => match prop.embedded_mode {
                EmbeddedMode::Object => embedded_object_rule(env.clone(), prop.clone()),
                EmbeddedMode::Inline => {
                    let columns = registry.flattened_columns(&prop)?;
                    embedded_inline_rule(env.clone(), prop.clone(), columns)
                }
            },
        };
        rules.push(PropertyRule { property: prop, apply });
    }
    Ok(Procedure { entity: meta.name.clone(), mode, rules })
}

fn scalar_rule(env: Arc<RuleEnv>, prop: Arc<PropertyMeta>) -> Box<RuleFn> {
    rule(move |_call, sink, data| {
        let Some(raw) = data.get(&prop.name) else {
            if prop.reference && env.mode == HydrationMode::Full && sink.field(&prop.name).is_none() {
                sink.assign(&prop.name, FieldValue::ScalarRef(ScalarReference::unloaded()));
            }
            return Ok(());
        };
        let value = match raw {
            JsonValue::Null => None,
            raw => Some(to_entity_scalar(&env.entity, &prop, raw, &env.timezone)?),
        };
        if !prop.reference {
            sink.assign(&prop.name, value.map(FieldValue::Scalar).unwrap_or_else(|| env.null_value()));
            return Ok(());
        }
        // a loaded null keeps the wrapper the caller may already hold
        match sink.field(&prop.name) {
            Some(FieldValue::ScalarRef(existing)) => existing.set(value),
            _ => sink.assign(&prop.name, FieldValue::ScalarRef(ScalarReference::loaded(value))),
        }
        Ok(())
    })
}

fn to_one_rule(env: Arc<RuleEnv>, prop: Arc<PropertyMeta>) -> Box<RuleFn> {
    rule(move |call, sink, data| {
        let Some(raw) = data.get(&prop.name) else { return Ok(()) };
        if raw.is_null() {
            sink.assign(&prop.name, env.null_value());
            return Ok(());
        }
        let target = call.resolve_to_one(&env.entity, &prop, raw)?;
        sink.assign(&prop.name, FieldValue::Entity(target.clone()));
        if prop.kind != ReferenceKind::OneToOne {
            return Ok(());
        }
        // an inverse link that is already set is kept, even if it points elsewhere
        if let (Some(inverse), Some(owner)) = (prop.inverse(), sink.owner()) {
            if target.get(inverse).map(|v| v.is_empty()).unwrap_or(true) {
                target.set(inverse, FieldValue::Entity(owner));
            }
        }
        Ok(())
    })
}

fn to_many_rule(env: Arc<RuleEnv>, prop: Arc<PropertyMeta>) -> Box<RuleFn> {
    rule(move |call, sink, data| {
        let Some(owner) = sink.owner() else { return Ok(()) };
        let raw = data.get(&prop.name).filter(|v| !v.is_null());
        let Some(raw) = raw else {
            if env.mode == HydrationMode::Full && sink.field(&prop.name).is_none() {
                let collection = if call.opts.new_entity {
                    Collection::empty(&owner, prop.clone())
                } else {
                    Collection::lazy(&owner, prop.clone())
                };
                sink.assign(&prop.name, FieldValue::Collection(collection));
            }
            return Ok(());
        };
        let raw_items: Vec<&JsonValue> = match raw {
            JsonValue::Array(items) => items.iter().collect(),
            single => vec![single],
        };
        let mut items = Vec::with_capacity(raw_items.len());
        for raw_item in raw_items {
            items.push(call.resolve_to_many_item(&env.entity, &prop, raw_item)?);
        }
        let collection = match sink.field(&prop.name) {
            Some(FieldValue::Collection(existing)) => existing,
            _ => {
                let created = Collection::lazy(&owner, prop.clone());
                sink.assign(&prop.name, FieldValue::Collection(created.clone()));
                created
            }
        };
        collection.hydrate(items, call.opts.new_entity);
        Ok(())
    })
}

fn embedded_object_rule(env: Arc<RuleEnv>, prop: Arc<PropertyMeta>) -> Box<RuleFn> {
    rule(move |call, sink, data| {
        let Some(raw) = data.get(&prop.name) else { return Ok(()) };
        match raw {
            JsonValue::Null => sink.assign(&prop.name, env.null_value()),
            JsonValue::Object(sub_record) => {
                let embeddable = call.hydrate_embeddable(&prop, sub_record, current_embedded(sink, &prop.name))?;
                sink.assign(&prop.name, FieldValue::Embedded(embeddable));
            }
            other => return Err(OrmError::mismatch(&env.entity, &prop.name, "object", other)),
        }
        Ok(())
    })
}

fn embedded_inline_rule(env: Arc<RuleEnv>, prop: Arc<PropertyMeta>, columns: Vec<FlatColumn>) -> Box<RuleFn> {
    rule(move |call, sink, data| {
        // records built by hand may carry the embeddable as one object
        if let Some(JsonValue::Object(sub_record)) = data.get(&prop.name) {
            let embeddable = call.hydrate_embeddable(&prop, sub_record, current_embedded(sink, &prop.name))?;
            sink.assign(&prop.name, FieldValue::Embedded(embeddable));
            return Ok(());
        }
        let mut sub_record = JsonMap::new();
        for column in &columns {
            if let Some(value) = data.get(&column.key) {
                sub_record.insert(column.property.clone(), value.clone());
            }
        }
        if sub_record.is_empty() {
            if let Some(JsonValue::Null) = data.get(&prop.name) {
                sink.assign(&prop.name, env.null_value());
            }
            return Ok(());
        }
        // only a row with every flattened column null clears the embeddable, partial nulls merge
        if sub_record.len() == columns.len() && sub_record.values().all(JsonValue::is_null) {
            sink.assign(&prop.name, env.null_value());
            return Ok(());
        }
        let embeddable = call.hydrate_embeddable(&prop, &sub_record, current_embedded(sink, &prop.name))?;
        sink.assign(&prop.name, FieldValue::Embedded(embeddable));
        Ok(())
    })
}

fn embedded_array_rule(env: Arc<RuleEnv>, prop: Arc<PropertyMeta>) -> Box<RuleFn> {
    rule(move |call, sink, data| {
        let Some(raw) = data.get(&prop.name) else { return Ok(()) };
        let items = match raw {
            JsonValue::Null => {
                sink.assign(&prop.name, env.null_value());
                return Ok(());
            }
            JsonValue::Array(items) => items,
            other => return Err(OrmError::mismatch(&env.entity, &prop.name, "array", other)),
        };
        let mut embeddables = Vec::with_capacity(items.len());
        for item in items {
            let sub_record = item.as_object().ok_or_else(|| OrmError::mismatch(&env.entity, &prop.name, "object", item))?;
            embeddables.push(call.hydrate_embeddable(&prop, sub_record, None)?);
        }
        sink.assign(&prop.name, FieldValue::EmbeddedList(embeddables));
        Ok(())
    })
}
