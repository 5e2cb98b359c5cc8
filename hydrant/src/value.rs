use crate::collection::Collection;
use crate::entity::{Embeddable, EntityRef};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::Value as JsonValue;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A converted, entity-side scalar.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Json(JsonValue),
}

impl Scalar {
    /// Plain external representation, dates as ISO-8601 with millisecond precision.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Scalar::Bool(b) => JsonValue::Bool(*b),
            Scalar::Int(i) => JsonValue::from(*i),
            Scalar::Float(f) => serde_json::Number::from_f64(*f).map(JsonValue::Number).unwrap_or(JsonValue::Null),
            Scalar::Text(s) => JsonValue::String(s.clone()),
            Scalar::DateTime(dt) => JsonValue::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Scalar::Date(d) => JsonValue::String(d.format("%Y-%m-%d").to_string()),
            Scalar::Json(v) => v.clone(),
        }
    }

    /// Canonical text used when building primary key hashes.
    pub fn key_part(&self) -> String {
        match self {
            Scalar::Text(s) => s.clone(),
            other => key_part(&other.to_json()),
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self { Scalar::Bool(v) }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self { Scalar::Int(v) }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self { Scalar::Int(v as i64) }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self { Scalar::Float(v) }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self { Scalar::Text(v.to_string()) }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self { Scalar::Text(v) }
}

impl From<DateTime<Utc>> for Scalar {
    fn from(v: DateTime<Utc>) -> Self { Scalar::DateTime(v) }
}

/// Text form of a raw key value; strings are taken verbatim so `"1"` and `1` hash alike.
pub fn key_part(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(items) => items.iter().map(key_part).collect::<Vec<_>>().join(KEY_SEPARATOR),
        other => other.to_string(),
    }
}

pub const KEY_SEPARATOR: &str = "~~~";

/// Deferred SQL expression assigned to a property but never executed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawSql {
    pub sql: String,
}

impl RawSql {
    pub fn new(sql: impl Into<String>) -> Self {
        RawSql { sql: sql.into() }
    }
}

#[derive(Debug)]
struct ScalarSlot {
    value: Option<Scalar>,
    initialized: bool,
}

/// Stable handle around a lazily loaded scalar; re-hydration replaces the payload, never the handle.
#[derive(Clone)]
pub struct ScalarReference(Rc<RefCell<ScalarSlot>>);

impl ScalarReference {
    pub fn unloaded() -> Self {
        ScalarReference(Rc::new(RefCell::new(ScalarSlot { value: None, initialized: false })))
    }

    pub fn loaded(value: Option<Scalar>) -> Self {
        ScalarReference(Rc::new(RefCell::new(ScalarSlot { value, initialized: true })))
    }

    /// Upgrades the wrapper in place.
    pub fn set(&self, value: Option<Scalar>) {
        let mut slot = self.0.borrow_mut();
        slot.value = value;
        slot.initialized = true;
    }

    pub fn get(&self) -> Option<Scalar> {
        self.0.borrow().value.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.0.borrow().initialized
    }

    pub fn ptr_eq(&self, other: &ScalarReference) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ScalarReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.0.borrow();
        f.debug_struct("ScalarReference")
            .field("initialized", &slot.initialized)
            .field("value", &slot.value)
            .finish()
    }
}

/// Value of a single property on a hydrated entity or embeddable.
#[derive(Clone, Debug)]
pub enum FieldValue {
    Null,
    /// Explicitly unset; emitted when null values hydrate as "undefined".
    Undefined,
    Scalar(Scalar),
    ScalarRef(ScalarReference),
    Entity(EntityRef),
    Collection(Collection),
    Embedded(Embeddable),
    EmbeddedList(Vec<Embeddable>),
    Raw(RawSql),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, FieldValue::Undefined)
    }

    /// True when the property holds nothing an inverse link should respect.
    pub fn is_empty(&self) -> bool {
        matches!(self, FieldValue::Null | FieldValue::Undefined)
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            FieldValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            FieldValue::Entity(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            FieldValue::Collection(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_embedded(&self) -> Option<&Embeddable> {
        match self {
            FieldValue::Embedded(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_scalar_ref(&self) -> Option<&ScalarReference> {
        match self {
            FieldValue::ScalarRef(r) => Some(r),
            _ => None,
        }
    }
}

macro_rules! impl_field_value_from_scalar {
    ($($t:ty),*) => {
        $(
            impl From<$t> for FieldValue {
                fn from(v: $t) -> Self {
                    FieldValue::Scalar(Scalar::from(v))
                }
            }
        )*
    };
}

impl_field_value_from_scalar!(bool, i64, i32, f64, &str, String, DateTime<Utc>);

impl From<Scalar> for FieldValue {
    fn from(v: Scalar) -> Self {
        FieldValue::Scalar(v)
    }
}

impl From<EntityRef> for FieldValue {
    fn from(v: EntityRef) -> Self {
        FieldValue::Entity(v)
    }
}

impl From<RawSql> for FieldValue {
    fn from(v: RawSql) -> Self {
        FieldValue::Raw(v)
    }
}
