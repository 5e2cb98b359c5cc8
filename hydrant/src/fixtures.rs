//! Sample library schema and records shared by tests, benches and demos.

use crate::entity::{EntityRef, JsonMap};
use crate::error::OrmError;
use crate::hydrator::Hydrator;
use crate::metadata::{EntityMeta, GetterMeta, PropertyMeta, ScalarType};
use crate::registry::MetadataRegistry;
use crate::settings::Settings;
use crate::types::TypeRegistry;
use crate::value::{FieldValue, Scalar};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

fn display_name(author: &EntityRef) -> JsonValue {
    let name = author.get("name").and_then(|v| v.as_scalar().map(Scalar::key_part)).unwrap_or_default();
    let id = author.primary_key_hash().unwrap_or_default();
    JsonValue::String(format!("{name} (#{id})"))
}

fn shouted(value: &FieldValue) -> JsonValue {
    match value.as_scalar() {
        Some(Scalar::Text(text)) => JsonValue::String(text.to_uppercase()),
        _ => JsonValue::Null,
    }
}

pub fn schema() -> Result<MetadataRegistry, OrmError> {
    let types = TypeRegistry::global();
    let mut registry = MetadataRegistry::new();

    registry.register(
        EntityMeta::embeddable("Address")
            .property(PropertyMeta::scalar("street", ScalarType::Text))
            .property(PropertyMeta::scalar("city", ScalarType::Text))
            .property(PropertyMeta::scalar("country", ScalarType::Text).field_names(&["country_code"])),
    )?;
    registry.register(
        EntityMeta::embeddable("Animal")
            .discriminator("kind")
            .property(PropertyMeta::scalar("kind", ScalarType::Text))
            .property(PropertyMeta::scalar("name", ScalarType::Text)),
    )?;
    registry.register(
        EntityMeta::embeddable("Dog").extends("Animal").discriminator_value("dog").property(PropertyMeta::scalar("breed", ScalarType::Text)),
    )?;
    registry.register(
        EntityMeta::embeddable("Cat").extends("Animal").discriminator_value("cat").property(PropertyMeta::scalar("indoor", ScalarType::Boolean)),
    )?;

    registry.register(
        EntityMeta::entity("Author")
            .property(PropertyMeta::scalar("id", ScalarType::Integer).primary())
            .property(PropertyMeta::scalar("name", ScalarType::Text))
            .property(PropertyMeta::scalar("email", ScalarType::Text).hidden())
            .property(PropertyMeta::scalar("born", ScalarType::DateTime).nullable())
            .property(PropertyMeta::scalar("terms_accepted", ScalarType::Boolean))
            .property(PropertyMeta::scalar("bio", ScalarType::Text).reference().nullable())
            .property(PropertyMeta::scalar("meta", ScalarType::Json).custom_type(types.get("json")?).nullable())
            .property(PropertyMeta::scalar("_secret", ScalarType::Text))
            .property(PropertyMeta::embedded("address", "Address").nullable())
            .property(PropertyMeta::embedded("favourite", "Animal").nullable())
            .property(PropertyMeta::embedded("pets", "Animal").array())
            .property(PropertyMeta::one_to_many("books", "Book", "author"))
            .property(PropertyMeta::one_to_one("profile", "Profile").mapped_by("author"))
            .property(PropertyMeta::many_to_one("best_friend", "Author").nullable())
            .getter(GetterMeta::new("display_name", Arc::new(display_name))),
    )?;
    registry.register(
        EntityMeta::entity("Profile")
            .property(PropertyMeta::scalar("id", ScalarType::Integer).primary())
            .property(PropertyMeta::scalar("headline", ScalarType::Text))
            .property(PropertyMeta::one_to_one("author", "Author").inversed_by("profile")),
    )?;
    registry.register(
        EntityMeta::entity("Publisher")
            .property(PropertyMeta::scalar("id", ScalarType::Integer).primary())
            .property(PropertyMeta::scalar("name", ScalarType::Text).serialized_name("publisher_name"))
            .property(PropertyMeta::scalar("revenue", ScalarType::Float).groups(&["admin"])),
    )?;
    registry.register(
        EntityMeta::entity("Location")
            .property(PropertyMeta::scalar("code", ScalarType::Text).primary())
            .property(PropertyMeta::scalar("revision", ScalarType::Integer).primary())
            .property(PropertyMeta::scalar("label", ScalarType::Text)),
    )?;
    registry.register(
        EntityMeta::entity("Book")
            .property(PropertyMeta::scalar("uuid", ScalarType::Text).primary())
            .property(PropertyMeta::scalar("title", ScalarType::Text))
            .property(PropertyMeta::scalar("published_at", ScalarType::DateTime).nullable())
            .property(PropertyMeta::many_to_one("author", "Author"))
            .property(PropertyMeta::many_to_one("publisher", "Publisher").nullable())
            .property(PropertyMeta::many_to_one("location", "Location").field_names(&["location_code", "location_revision"]).nullable())
            .property(PropertyMeta::many_to_many("tags", "Tag").inversed_by("books")),
    )?;
    registry.register(
        EntityMeta::entity("Tag")
            .property(PropertyMeta::scalar("id", ScalarType::Integer).primary())
            .property(PropertyMeta::scalar("name", ScalarType::Text).serializer(Arc::new(shouted)))
            .property(PropertyMeta::many_to_many("books", "Book").mapped_by("tags")),
    )?;
    registry.validate()?;
    Ok(registry)
}

pub fn hydrator(settings: Settings) -> Result<Hydrator, OrmError> {
    Ok(Hydrator::new(Arc::new(schema()?), Arc::new(settings)))
}

fn object(value: JsonValue) -> JsonMap {
    match value {
        JsonValue::Object(map) => map,
        _ => JsonMap::new(),
    }
}

/// Author row with flattened address and favourite animal columns.
pub fn author_record(id: i64, name: &str) -> JsonMap {
    object(json!({
        "id": id,
        "name": name,
        "email": format!("{}@example.com", name.to_lowercase()),
        "born": "1970-05-17 09:30:00",
        "terms_accepted": 1,
        "bio": "Writes things.",
        "meta": "{\"rank\":3}",
        "_secret": "s3cr3t",
        "address_street": "Main 1",
        "address_city": "Prague",
        "address_country": "CZ",
        "favourite_kind": "dog",
        "favourite_name": "Rex",
        "favourite_breed": "beagle",
        "pets": [
            {"kind": "dog", "name": "Rex", "breed": "beagle"},
            {"kind": "cat", "name": "Tom", "indoor": true}
        ]
    }))
}

pub fn book_record(uuid: &str, title: &str, author: JsonValue) -> JsonMap {
    object(json!({
        "uuid": uuid,
        "title": title,
        "published_at": "2020-02-02T10:00:00Z",
        "author": author,
        "publisher": {"id": 1, "name": "Orbit", "revenue": 1200.5},
        "location": ["PRG", 4],
        "tags": [1, {"id": 2, "name": "classic"}]
    }))
}

/// Author with two books nested, each pointing back to the author by key.
pub fn author_graph_record(id: i64, name: &str) -> JsonMap {
    let mut record = author_record(id, name);
    record.insert(
        "books".to_string(),
        json!([
            book_record(&format!("b-{id}-1"), "First", json!(id)),
            book_record(&format!("b-{id}-2"), "Second", json!(id))
        ]),
    );
    record
}
