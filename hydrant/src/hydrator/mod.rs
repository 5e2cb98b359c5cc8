//! Turns raw records into live entity graphs.
//!
//! Every `(type, mode)` pair is compiled once into a [`Procedure`], a table of
//! per-property rules, and cached for the lifetime of the [`Hydrator`].

pub mod compiler;
pub mod materializer;

use crate::entity::{EntityRef, JsonMap};
use crate::error::OrmError;
use crate::identity::IdentityMap;
use crate::registry::MetadataRegistry;
use crate::settings::Settings;
use serde_json::Value as JsonValue;
use std::sync::Arc;

pub use compiler::{Compiler, FieldSink, Procedure, PropertyRule};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HydrationMode {
    /// Every property present in the record.
    Full,
    /// Primary key properties only.
    Reference,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HydrateOptions {
    /// The record describes an entity that is not persisted yet.
    pub new_entity: bool,
    /// Hydrate data into an already loaded instance found in the identity map.
    pub merge: bool,
}

impl Default for HydrateOptions {
    fn default() -> Self {
        HydrateOptions { new_entity: false, merge: true }
    }
}

impl HydrateOptions {
    pub fn new_entity() -> Self {
        HydrateOptions { new_entity: true, merge: false }
    }

    pub fn without_merge() -> Self {
        HydrateOptions { new_entity: false, merge: false }
    }
}

/// State threaded through one hydration call and all the nested calls it makes.
pub struct HydrateCall<'a> {
    pub(crate) hydrator: &'a Hydrator,
    pub(crate) identity_map: &'a mut dyn IdentityMap,
    pub(crate) opts: HydrateOptions,
    pub(crate) mode: HydrationMode,
}

pub struct Hydrator {
    registry: Arc<MetadataRegistry>,
    settings: Arc<Settings>,
    compiler: Compiler,
}

impl Hydrator {
    pub fn new(registry: Arc<MetadataRegistry>, settings: Arc<Settings>) -> Self {
        Hydrator { registry, settings, compiler: Compiler::new() }
    }

    pub fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Cached procedure for `(entity, mode)`, compiled on first use.
    pub fn compile(&self, entity: &str, mode: HydrationMode) -> Result<Arc<Procedure>, OrmError> {
        self.compiler.get_or_compile(&self.registry, &self.settings, entity, mode)
    }

    pub fn compiled_procedures(&self) -> usize {
        self.compiler.len()
    }

    fn call<'a>(&'a self, identity_map: &'a mut dyn IdentityMap, opts: HydrateOptions, mode: HydrationMode) -> HydrateCall<'a> {
        HydrateCall { hydrator: self, identity_map, opts, mode }
    }

    /// Assigns every property present in `data` onto `entity`; absent properties are left alone.
    pub fn hydrate(&self, entity: &EntityRef, data: &JsonMap, identity_map: &mut dyn IdentityMap, opts: HydrateOptions) -> Result<(), OrmError> {
        let procedure = self.compile(&entity.entity_name(), HydrationMode::Full)?;
        let mut call = self.call(identity_map, opts, HydrationMode::Full);
        procedure.run(&mut call, &mut entity.clone(), data)
    }

    /// Like [`Hydrator::hydrate`] but only touches primary key properties.
    pub fn hydrate_reference(&self, entity: &EntityRef, data: &JsonMap, identity_map: &mut dyn IdentityMap) -> Result<(), OrmError> {
        let procedure = self.compile(&entity.entity_name(), HydrationMode::Reference)?;
        let mut call = self.call(identity_map, HydrateOptions::default(), HydrationMode::Reference);
        procedure.run(&mut call, &mut entity.clone(), data)
    }

    /// Materializes an entity from a record, reusing the identity map entry for its key.
    pub fn create(&self, entity: &str, data: &JsonMap, identity_map: &mut dyn IdentityMap, opts: HydrateOptions) -> Result<EntityRef, OrmError> {
        let meta = self.registry.get(entity)?;
        let mut call = self.call(identity_map, opts, HydrationMode::Full);
        call.create(&meta, data)
    }

    /// Unloaded stand-in for the row with primary key `pk` (scalar, array or key object).
    pub fn create_reference(&self, entity: &str, pk: &JsonValue, identity_map: &mut dyn IdentityMap) -> Result<EntityRef, OrmError> {
        let meta = self.registry.get(entity)?;
        let mut call = self.call(identity_map, HydrateOptions::default(), HydrationMode::Reference);
        call.create_reference(&meta, pk)
    }
}
