use crate::entity::JsonMap;
use crate::error::OrmError;
use crate::metadata::{EmbeddedMode, EntityMeta, ReferenceKind};
use crate::registry::MetadataRegistry;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Renames a database row keyed by column names into a record keyed by property names.
///
/// Composite foreign keys are gathered into arrays, flattened embeddable columns keep
/// their prefixed keys, and `prop.sub` keys address a sub-property of an embeddable.
pub fn map_result(registry: &MetadataRegistry, meta: &Arc<EntityMeta>, row: &JsonMap) -> Result<JsonMap, OrmError> {
    let mut out = JsonMap::new();
    for prop in registry.union_properties(meta) {
        match prop.kind {
            ReferenceKind::OneToMany | ReferenceKind::ManyToMany => {}
            ReferenceKind::Embedded if prop.embedded_mode == EmbeddedMode::Inline && !prop.array => {
                for column in registry.flattened_columns(&prop)? {
                    if let Some(value) = row.get(&column.column) {
                        out.insert(column.key, value.clone());
                    }
                }
            }
            ReferenceKind::Embedded => {
                if let Some(value) = row.get(prop.field_name()) {
                    out.insert(prop.name.clone(), parse_json_text(value));
                }
            }
            _ if prop.field_names.len() > 1 => {
                let parts: Option<Vec<JsonValue>> = prop.field_names.iter().map(|f| row.get(f).cloned()).collect();
                if let Some(parts) = parts {
                    let value = if parts.iter().all(JsonValue::is_null) { JsonValue::Null } else { JsonValue::Array(parts) };
                    out.insert(prop.name.clone(), value);
                }
            }
            _ => {
                if let Some(value) = row.get(prop.field_name()) {
                    out.insert(prop.name.clone(), value.clone());
                }
            }
        }
    }
    for (key, value) in row {
        if let Some((head, sub)) = key.split_once('.') {
            map_embedded_key(registry, meta, head, sub, value, &mut out)?;
        }
    }
    Ok(out)
}

fn map_embedded_key(registry: &MetadataRegistry, meta: &Arc<EntityMeta>, head: &str, sub: &str, value: &JsonValue, out: &mut JsonMap) -> Result<(), OrmError> {
    let Some(prop) = meta.prop(head).filter(|p| p.kind == ReferenceKind::Embedded) else {
        return Ok(());
    };
    let target = registry.get(prop.target_name().unwrap_or_default())?;
    let invalid = || OrmError::InvalidEmbeddedQuery { entity: meta.name.clone(), embeddable: target.name.clone(), property: sub.to_string() };
    let sub_name = sub.split('.').next().unwrap_or(sub);
    if !registry.union_properties(&target).iter().any(|p| p.name == sub_name) {
        return Err(invalid());
    }
    if prop.embedded_mode == EmbeddedMode::Inline && !prop.array {
        out.insert(format!("{}{}", prop.embedded_prefix(), sub.replace('.', "_")), value.clone());
        return Ok(());
    }
    let entry = out.entry(prop.name.clone()).or_insert_with(|| JsonValue::Object(JsonMap::new()));
    match entry {
        JsonValue::Object(nested) => {
            nested.insert(sub.to_string(), value.clone());
            Ok(())
        }
        _ => Err(invalid()),
    }
}

/// Object and array embeddables may arrive as JSON text from drivers without a JSON column type.
fn parse_json_text(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(text) if text.starts_with('{') || text.starts_with('[') => {
            serde_json::from_str(text).unwrap_or_else(|_| value.clone())
        }
        other => other.clone(),
    }
}
