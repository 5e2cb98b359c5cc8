use std::sync::PoisonError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrmError {

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Invalid metadata of {entity}: {message}")]
    InvalidMetadata { entity: String, message: String },

    #[error("Type mismatch at {entity}.{property}: expected {expected}, found {found}")]
    TypeMismatch {
        entity: String,
        property: String,
        expected: &'static str,
        found: String,
    },

    #[error("Invalid date '{value}' at {entity}.{property}")]
    InvalidDate { entity: String, property: String, value: String },

    #[error("Invalid query for entity '{entity}', property '{property}' does not exist in embeddable '{embeddable}'")]
    InvalidEmbeddedQuery { entity: String, embeddable: String, property: String },

    #[error("You cannot modify inverse side of M:N collection {entity}.{property} when the owning side is not initialized. Consider working with the owning side instead ({owner}).")]
    CannotModifyInverseCollection { entity: String, property: String, owner: String },

    #[error("Collection<{target}> of entity {entity} not initialized")]
    CollectionNotInitialized { entity: String, target: String },

    #[error("Trying to serialize raw SQL fragment: '{0}'")]
    RawSqlSerialization(String),

    #[error("Trying to leave wrong property: {entity}.{property} instead of {expected}")]
    SerializationPath { entity: String, property: String, expected: String },

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl OrmError {
    pub fn mismatch(entity: &str, property: &str, expected: &'static str, found: &serde_json::Value) -> Self {
        OrmError::TypeMismatch {
            entity: entity.to_string(),
            property: property.to_string(),
            expected,
            found: json_kind(found).to_string(),
        }
    }
}

impl<T> From<PoisonError<T>> for OrmError {
    fn from(e: PoisonError<T>) -> Self {
        OrmError::Custom(format!("Poison error: {:?}", e.to_string()))
    }
}

pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
