//! hydrant turns raw rows and documents into live, interconnected entity graphs ("hydration")
//! and turns those graphs back into plain, cycle-safe JSON ("serialization").
//!
//! Entity types are described by [`EntityMeta`] and registered in a [`MetadataRegistry`].
//! The [`Hydrator`] compiles one rule table per `(type, mode)` and caches it, the
//! [`EntitySerializer`] walks graphs with a per-call [`SerializationContext`] that cuts cycles.
//! Persistence, SQL generation and connection handling live elsewhere; this crate only
//! consumes metadata and already fetched records.

pub mod logger;
pub mod error;
pub mod settings;
pub mod value;
pub mod metadata;
pub mod registry;
pub mod types;
pub mod entity;
pub mod collection;
pub mod identity;
pub mod hydrator;
pub mod serializer;
pub mod comparator;
pub mod row;
pub mod fixtures;

pub use chrono;
pub use once_cell;
pub use serde;
pub use serde_json;

pub use collection::{Collection, CollectionState};
pub use comparator::{changed_properties, prepare_entity};
pub use entity::{Embeddable, EntityRef, FieldMap, JsonMap, WeakEntityRef};
pub use error::OrmError;
pub use hydrator::{HydrateOptions, HydrationMode, Hydrator, Procedure};
pub use identity::{IdentityMap, SimpleIdentityMap};
pub use metadata::{EmbeddedMode, EntityMeta, GetterMeta, PropertyMeta, ReferenceKind, ScalarType};
pub use registry::{FlatColumn, MetadataRegistry};
pub use row::map_result;
pub use serializer::context::SerializationContext;
pub use serializer::{EntitySerializer, SerializationStats, SerializeOptions};
pub use settings::{load_config, SerializationSettings, Settings, TimezoneRule, DEFAULT_SETTINGS_PATH, ENV_PREFIX};
pub use types::{BigIntType, CustomType, JsonType, TypeRegistry};
pub use value::{FieldValue, RawSql, Scalar, ScalarReference};
