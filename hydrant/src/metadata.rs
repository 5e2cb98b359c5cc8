//! Static, read-only description of entity and embeddable types.
//!
//! Metadata is produced by a discovery collaborator and handed to the
//! [`MetadataRegistry`](crate::registry::MetadataRegistry); the hydrator and
//! serializer only ever read it.

use crate::entity::EntityRef;
use crate::error::OrmError;
use crate::types::CustomType;
use crate::value::FieldValue;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Scalar,
    ManyToOne,
    OneToOne,
    OneToMany,
    ManyToMany,
    Embedded,
}

impl ReferenceKind {
    pub fn is_to_one(self) -> bool {
        matches!(self, ReferenceKind::ManyToOne | ReferenceKind::OneToOne)
    }

    pub fn is_to_many(self) -> bool {
        matches!(self, ReferenceKind::OneToMany | ReferenceKind::ManyToMany)
    }

    pub fn is_relation(self) -> bool {
        self.is_to_one() || self.is_to_many()
    }
}

/// Built-in coercion applied to scalar properties without a custom type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ScalarType {
    #[default]
    Any,
    Boolean,
    Integer,
    Float,
    Text,
    DateTime,
    Date,
    Json,
}

/// Storage layout of an embedded property.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EmbeddedMode {
    /// Sub-properties live in prefixed sibling columns.
    #[default]
    Inline,
    /// Sub-properties live in one nested structure.
    Object,
}

pub type PropertySerializer = Arc<dyn Fn(&FieldValue) -> JsonValue + Send + Sync>;
pub type GetterFn = Arc<dyn Fn(&EntityRef) -> JsonValue + Send + Sync>;

#[derive(Clone)]
pub struct PropertyMeta {
    pub name: String,
    pub field_names: Vec<String>,
    pub kind: ReferenceKind,
    pub scalar_type: ScalarType,
    pub primary: bool,
    pub nullable: bool,
    /// Scalar wrapped in a lazily loaded [`ScalarReference`](crate::value::ScalarReference).
    pub reference: bool,
    pub lazy: bool,
    pub eager: bool,
    pub hidden: bool,
    pub groups: Vec<String>,
    pub custom_type: Option<Arc<dyn CustomType>>,
    pub target: Option<String>,
    pub mapped_by: Option<String>,
    pub inversed_by: Option<String>,
    pub embedded_mode: EmbeddedMode,
    pub array: bool,
    pub prefix: Option<String>,
    pub serialized_name: Option<String>,
    pub serializer: Option<PropertySerializer>,
}

impl PropertyMeta {
    fn new(name: &str, kind: ReferenceKind) -> Self {
        PropertyMeta {
            name: name.to_string(),
            field_names: vec![name.to_string()],
            kind,
            scalar_type: ScalarType::Any,
            primary: false,
            nullable: false,
            reference: false,
            lazy: false,
            eager: false,
            hidden: false,
            groups: Vec::new(),
            custom_type: None,
            target: None,
            mapped_by: None,
            inversed_by: None,
            embedded_mode: EmbeddedMode::Inline,
            array: false,
            prefix: None,
            serialized_name: None,
            serializer: None,
        }
    }

    fn relation(name: &str, kind: ReferenceKind, target: &str) -> Self {
        let mut prop = PropertyMeta::new(name, kind);
        prop.target = Some(target.to_string());
        prop
    }

    pub fn scalar(name: &str, scalar_type: ScalarType) -> Self {
        let mut prop = PropertyMeta::new(name, ReferenceKind::Scalar);
        prop.scalar_type = scalar_type;
        prop
    }

    pub fn many_to_one(name: &str, target: &str) -> Self {
        PropertyMeta::relation(name, ReferenceKind::ManyToOne, target)
    }

    pub fn one_to_one(name: &str, target: &str) -> Self {
        PropertyMeta::relation(name, ReferenceKind::OneToOne, target)
    }

    pub fn one_to_many(name: &str, target: &str, mapped_by: &str) -> Self {
        PropertyMeta::relation(name, ReferenceKind::OneToMany, target).mapped_by(mapped_by)
    }

    pub fn many_to_many(name: &str, target: &str) -> Self {
        PropertyMeta::relation(name, ReferenceKind::ManyToMany, target)
    }

    pub fn embedded(name: &str, target: &str) -> Self {
        PropertyMeta::relation(name, ReferenceKind::Embedded, target)
    }

    #[must_use]
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    #[must_use]
    pub fn reference(mut self) -> Self {
        self.reference = true;
        self.lazy = true;
        self
    }

    #[must_use]
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    #[must_use]
    pub fn eager(mut self) -> Self {
        self.eager = true;
        self
    }

    #[must_use]
    pub fn groups(mut self, groups: &[&str]) -> Self {
        self.groups = groups.iter().map(|g| g.to_string()).collect();
        self
    }

    #[must_use]
    pub fn field_names(mut self, field_names: &[&str]) -> Self {
        self.field_names = field_names.iter().map(|f| f.to_string()).collect();
        self
    }

    #[must_use]
    pub fn custom_type(mut self, custom_type: Arc<dyn CustomType>) -> Self {
        self.custom_type = Some(custom_type);
        self
    }

    #[must_use]
    pub fn mapped_by(mut self, inverse: &str) -> Self {
        self.mapped_by = Some(inverse.to_string());
        self
    }

    #[must_use]
    pub fn inversed_by(mut self, inverse: &str) -> Self {
        self.inversed_by = Some(inverse.to_string());
        self
    }

    #[must_use]
    pub fn object(mut self) -> Self {
        self.embedded_mode = EmbeddedMode::Object;
        self
    }

    /// Array embeddables are always stored as one nested structure.
    #[must_use]
    pub fn array(mut self) -> Self {
        self.array = true;
        self.embedded_mode = EmbeddedMode::Object;
        self
    }

    #[must_use]
    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = Some(prefix.to_string());
        self
    }

    #[must_use]
    pub fn serialized_name(mut self, name: &str) -> Self {
        self.serialized_name = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn serializer(mut self, serializer: PropertySerializer) -> Self {
        self.serializer = Some(serializer);
        self
    }

    pub fn field_name(&self) -> &str {
        self.field_names.first().map(String::as_str).unwrap_or(&self.name)
    }

    pub fn target_name(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Prefix of flattened embedded columns, `<name>_` unless configured.
    pub fn embedded_prefix(&self) -> String {
        self.prefix.clone().unwrap_or_else(|| format!("{}_", self.name))
    }

    pub fn inverse(&self) -> Option<&str> {
        self.mapped_by.as_deref().or(self.inversed_by.as_deref())
    }

    pub fn is_owning_side(&self) -> bool {
        match self.kind {
            ReferenceKind::ManyToOne => true,
            ReferenceKind::OneToOne | ReferenceKind::ManyToMany => self.mapped_by.is_none(),
            _ => false,
        }
    }

    pub fn output_name(&self) -> &str {
        self.serialized_name.as_deref().unwrap_or(&self.name)
    }
}

impl fmt::Debug for PropertyMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyMeta")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("scalar_type", &self.scalar_type)
            .field("primary", &self.primary)
            .field("target", &self.target)
            .field("custom_type", &self.custom_type.as_ref().map(|t| t.name().to_string()))
            .finish()
    }
}

/// Computed property appended after stored ones during serialization.
#[derive(Clone)]
pub struct GetterMeta {
    pub name: String,
    pub compute: GetterFn,
    pub hidden: bool,
    pub groups: Vec<String>,
}

impl GetterMeta {
    pub fn new(name: &str, compute: GetterFn) -> Self {
        GetterMeta { name: name.to_string(), compute, hidden: false, groups: Vec::new() }
    }

    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    #[must_use]
    pub fn groups(mut self, groups: &[&str]) -> Self {
        self.groups = groups.iter().map(|g| g.to_string()).collect();
        self
    }
}

impl fmt::Debug for GetterMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetterMeta").field("name", &self.name).field("hidden", &self.hidden).finish()
    }
}

#[derive(Clone, Debug)]
pub struct EntityMeta {
    pub name: String,
    pub embeddable: bool,
    pub properties: Vec<Arc<PropertyMeta>>,
    pub primary_keys: Vec<String>,
    pub discriminator_column: Option<String>,
    pub discriminator_value: Option<String>,
    /// discriminator value -> type name, filled in by the registry as subtypes register
    pub discriminator_map: BTreeMap<String, String>,
    pub extends: Option<String>,
    pub root: String,
    pub getters: Vec<GetterMeta>,
}

impl EntityMeta {
    fn new(name: &str, embeddable: bool) -> Self {
        EntityMeta {
            name: name.to_string(),
            embeddable,
            properties: Vec::new(),
            primary_keys: Vec::new(),
            discriminator_column: None,
            discriminator_value: None,
            discriminator_map: BTreeMap::new(),
            extends: None,
            root: name.to_string(),
            getters: Vec::new(),
        }
    }

    pub fn entity(name: &str) -> Self {
        EntityMeta::new(name, false)
    }

    pub fn embeddable(name: &str) -> Self {
        EntityMeta::new(name, true)
    }

    /// Adds a property; a property with the same name inherited from a base type is replaced.
    #[must_use]
    pub fn property(mut self, prop: PropertyMeta) -> Self {
        if prop.primary && !self.primary_keys.contains(&prop.name) {
            self.primary_keys.push(prop.name.clone());
        }
        self.properties.push(Arc::new(prop));
        self
    }

    #[must_use]
    pub fn discriminator(mut self, column: &str) -> Self {
        self.discriminator_column = Some(column.to_string());
        self
    }

    #[must_use]
    pub fn discriminator_value(mut self, value: &str) -> Self {
        self.discriminator_value = Some(value.to_string());
        self
    }

    #[must_use]
    pub fn extends(mut self, base: &str) -> Self {
        self.extends = Some(base.to_string());
        self
    }

    #[must_use]
    pub fn getter(mut self, getter: GetterMeta) -> Self {
        self.getters.push(getter);
        self
    }

    pub fn prop(&self, name: &str) -> Option<&Arc<PropertyMeta>> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn primary_props(&self) -> Vec<Arc<PropertyMeta>> {
        self.primary_keys.iter().filter_map(|pk| self.prop(pk).cloned()).collect()
    }

    pub fn is_composite_pk(&self) -> bool {
        self.primary_keys.len() > 1
    }

    /// Primary keys first, then the remaining properties in declaration order.
    pub fn ordered_props(&self) -> Vec<Arc<PropertyMeta>> {
        let mut ordered = self.primary_props();
        ordered.extend(self.properties.iter().filter(|p| !p.primary).cloned());
        ordered
    }

    pub fn is_polymorphic(&self) -> bool {
        self.discriminator_column.is_some()
    }

    fn invalid(&self, message: String) -> OrmError {
        OrmError::InvalidMetadata { entity: self.name.clone(), message }
    }

    /// Checks the invariants that hold within a single type.
    pub fn validate(&self) -> Result<(), OrmError> {
        let mut seen = HashSet::new();
        for prop in &self.properties {
            if !seen.insert(prop.name.as_str()) {
                return Err(self.invalid(format!("duplicate property '{}'", prop.name)));
            }
            if prop.kind != ReferenceKind::Scalar && prop.target.is_none() {
                return Err(self.invalid(format!("property '{}' has no target type", prop.name)));
            }
            if prop.primary && !(prop.kind == ReferenceKind::Scalar || prop.kind.is_to_one()) {
                return Err(self.invalid(format!("primary key '{}' must be a scalar or to-one property", prop.name)));
            }
        }
        if !self.embeddable && self.primary_keys.is_empty() {
            return Err(self.invalid("entity has no primary key".to_string()));
        }
        if self.embeddable && !self.primary_keys.is_empty() {
            return Err(self.invalid("embeddables cannot declare primary keys".to_string()));
        }
        for pk in &self.primary_keys {
            if self.prop(pk).is_none() {
                return Err(self.invalid(format!("primary key '{pk}' is not a property")));
            }
        }
        Ok(())
    }
}
