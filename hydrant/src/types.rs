//! Conversion between raw record values, entity-side scalars and their
//! storage/external representations.

use crate::error::{json_kind, OrmError};
use crate::metadata::{PropertyMeta, ScalarType};
use crate::settings::TimezoneRule;
use crate::value::Scalar;
use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// User-defined scalar mapping, consulted before the built-in coercion.
pub trait CustomType: Send + Sync {
    fn name(&self) -> &str;

    /// Raw record value to entity-side value.
    fn to_entity_value(&self, raw: &JsonValue) -> Result<Scalar, OrmError>;

    /// Entity-side value to the form the database stores.
    fn to_storage_value(&self, value: &Scalar) -> JsonValue;

    /// Entity-side value to its external, serialized form.
    fn to_json(&self, value: &Scalar) -> JsonValue {
        value.to_json()
    }
}

/// Stored as JSON text, exposed as a structured value.
pub struct JsonType;

impl CustomType for JsonType {
    fn name(&self) -> &str {
        "json"
    }

    fn to_entity_value(&self, raw: &JsonValue) -> Result<Scalar, OrmError> {
        match raw {
            JsonValue::String(text) => match serde_json::from_str::<JsonValue>(text) {
                Ok(parsed) => Ok(Scalar::Json(parsed)),
                Err(_) => Ok(Scalar::Json(raw.clone())),
            },
            other => Ok(Scalar::Json(other.clone())),
        }
    }

    fn to_storage_value(&self, value: &Scalar) -> JsonValue {
        JsonValue::String(value.to_json().to_string())
    }
}

/// 64-bit+ integers kept as decimal text so no precision is lost on the way out.
pub struct BigIntType;

impl CustomType for BigIntType {
    fn name(&self) -> &str {
        "bigint"
    }

    fn to_entity_value(&self, raw: &JsonValue) -> Result<Scalar, OrmError> {
        match raw {
            JsonValue::Number(n) => Ok(Scalar::Text(n.to_string())),
            JsonValue::String(s) if !s.is_empty() && s.trim_start_matches('-').chars().all(|c| c.is_ascii_digit()) => {
                Ok(Scalar::Text(s.clone()))
            }
            other => Err(OrmError::Custom(format!("bigint cannot represent {}", json_kind(other)))),
        }
    }

    fn to_storage_value(&self, value: &Scalar) -> JsonValue {
        JsonValue::String(value.key_part())
    }

    fn to_json(&self, value: &Scalar) -> JsonValue {
        JsonValue::String(value.key_part())
    }
}

/// Named custom types, so metadata can refer to them by name.
pub struct TypeRegistry {
    types: RwLock<HashMap<String, Arc<dyn CustomType>>>,
}

static DEFAULT_TYPES: Lazy<TypeRegistry> = Lazy::new(TypeRegistry::with_defaults);

impl TypeRegistry {
    pub fn empty() -> Self {
        TypeRegistry { types: RwLock::new(HashMap::new()) }
    }

    pub fn with_defaults() -> Self {
        let registry = TypeRegistry::empty();
        let defaults: [Arc<dyn CustomType>; 2] = [Arc::new(JsonType), Arc::new(BigIntType)];
        if let Ok(mut types) = registry.types.write() {
            for custom in defaults {
                types.insert(custom.name().to_string(), custom);
            }
        }
        registry
    }

    /// Process-wide registry holding the built-in types.
    pub fn global() -> &'static TypeRegistry {
        &DEFAULT_TYPES
    }

    pub fn register(&self, custom: Arc<dyn CustomType>) -> Result<(), OrmError> {
        self.types.write()?.insert(custom.name().to_string(), custom);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn CustomType>, OrmError> {
        self.types
            .read()?
            .get(name)
            .cloned()
            .ok_or_else(|| OrmError::Custom(format!("Unknown custom type '{name}'")))
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.types.read().map(|t| t.keys().cloned().collect()).unwrap_or_default();
        f.debug_struct("TypeRegistry").field("types", &names).finish()
    }
}

/// Converts a defined (non-null) raw value of a scalar property.
pub fn to_entity_scalar(entity: &str, prop: &PropertyMeta, raw: &JsonValue, tz: &TimezoneRule) -> Result<Scalar, OrmError> {
    if let Some(custom) = &prop.custom_type {
        return custom.to_entity_value(raw);
    }
    let mismatch = |expected: &'static str| OrmError::mismatch(entity, &prop.name, expected, raw);
    match prop.scalar_type {
        ScalarType::Any => Ok(match raw {
            JsonValue::Bool(b) => Scalar::Bool(*b),
            JsonValue::Number(n) => n.as_i64().map(Scalar::Int).or_else(|| n.as_f64().map(Scalar::Float)).unwrap_or(Scalar::Json(raw.clone())),
            JsonValue::String(s) => Scalar::Text(s.clone()),
            other => Scalar::Json(other.clone()),
        }),
        ScalarType::Boolean => match raw {
            JsonValue::Bool(b) => Ok(Scalar::Bool(*b)),
            JsonValue::Number(n) => Ok(Scalar::Bool(n.as_f64().map(|f| f != 0.0).unwrap_or(false))),
            JsonValue::String(s) => match s.as_str() {
                "true" | "1" => Ok(Scalar::Bool(true)),
                "false" | "0" => Ok(Scalar::Bool(false)),
                _ => Err(mismatch("boolean")),
            },
            _ => Err(mismatch("boolean")),
        },
        ScalarType::Integer => match raw {
            JsonValue::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(Scalar::Int)
                .ok_or_else(|| mismatch("integer")),
            JsonValue::String(s) => s.trim().parse::<i64>().map(Scalar::Int).map_err(|_| mismatch("integer")),
            JsonValue::Bool(b) => Ok(Scalar::Int(i64::from(*b))),
            _ => Err(mismatch("integer")),
        },
        ScalarType::Float => match raw {
            JsonValue::Number(n) => n.as_f64().map(Scalar::Float).ok_or_else(|| mismatch("float")),
            JsonValue::String(s) => s.trim().parse::<f64>().map(Scalar::Float).map_err(|_| mismatch("float")),
            _ => Err(mismatch("float")),
        },
        ScalarType::Text => match raw {
            JsonValue::String(s) => Ok(Scalar::Text(s.clone())),
            JsonValue::Number(n) => Ok(Scalar::Text(n.to_string())),
            JsonValue::Bool(b) => Ok(Scalar::Text(b.to_string())),
            _ => Err(mismatch("string")),
        },
        ScalarType::DateTime => match raw {
            JsonValue::Number(n) => n
                .as_i64()
                .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
                .map(Scalar::DateTime)
                .ok_or_else(|| invalid_date(entity, prop, raw)),
            JsonValue::String(s) => parse_datetime(s, tz).map(Scalar::DateTime).ok_or_else(|| invalid_date(entity, prop, raw)),
            _ => Err(mismatch("date")),
        },
        ScalarType::Date => match raw {
            JsonValue::String(s) => s
                .get(..10)
                .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
                .map(Scalar::Date)
                .ok_or_else(|| invalid_date(entity, prop, raw)),
            _ => Err(mismatch("date")),
        },
        ScalarType::Json => Ok(Scalar::Json(raw.clone())),
    }
}

fn invalid_date(entity: &str, prop: &PropertyMeta, raw: &JsonValue) -> OrmError {
    OrmError::InvalidDate {
        entity: entity.to_string(),
        property: prop.name.clone(),
        value: match raw {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}

/// Form compared against the original snapshot and handed to the persistence layer.
pub fn to_storage(prop: &PropertyMeta, value: &Scalar) -> JsonValue {
    match &prop.custom_type {
        Some(custom) => custom.to_storage_value(value),
        None => value.to_json(),
    }
}

/// External representation used by the serializer.
pub fn to_external(prop: &PropertyMeta, value: &Scalar) -> JsonValue {
    match &prop.custom_type {
        Some(custom) => custom.to_json(value),
        None => value.to_json(),
    }
}

const ABSOLUTE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%z", "%Y-%m-%dT%H:%M:%S%.f%z"];
const NAIVE_FORMATS: [&str; 4] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"];

/// A string carries its own offset when it ends with `Z`, or has `+` or a `-` past the date part.
pub fn has_explicit_offset(raw: &str) -> bool {
    raw.ends_with('Z') || raw.ends_with('z') || raw.contains('+') || raw.get(10..).map(|t| t.contains('-')).unwrap_or(false)
}

pub fn parse_datetime(raw: &str, tz: &TimezoneRule) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if has_explicit_offset(raw) {
        return parse_absolute(raw);
    }
    let naive = parse_naive(raw)?;
    match tz {
        TimezoneRule::Offset(offset) => parse_offset(offset)?
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc)),
        TimezoneRule::Local => Local.from_local_datetime(&naive).earliest().map(|dt| dt.with_timezone(&Utc)),
    }
}

fn parse_absolute(raw: &str) -> Option<DateTime<Utc>> {
    let normalized = match raw.strip_suffix('Z').or_else(|| raw.strip_suffix('z')) {
        Some(stripped) => format!("{stripped}+00:00"),
        None => raw.to_string(),
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt.with_timezone(&Utc));
    }
    ABSOLUTE_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(&normalized, fmt).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_naive(raw: &str) -> Option<NaiveDateTime> {
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().and_then(|d| d.and_hms_opt(0, 0, 0)))
}

/// Accepts `Z`, `+hh`, `+hhmm` and `+hh:mm`.
pub fn parse_offset(offset: &str) -> Option<FixedOffset> {
    let offset = offset.trim();
    if offset.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match offset.as_bytes().first()? {
        b'+' => (1, &offset[1..]),
        b'-' => (-1, &offset[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
