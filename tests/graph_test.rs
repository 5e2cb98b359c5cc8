use hydrant::fixtures::{author_record, book_record, hydrator};
use hydrant::*;
use serde_json::json;

fn rows_to_graph(hydrator: &Hydrator, identity_map: &mut SimpleIdentityMap) -> Result<EntityRef, OrmError> {
    let author_meta = hydrator.registry().get("Author")?;
    let book_meta = hydrator.registry().get("Book")?;
    let mut author_row = author_record(1, "Ann");
    author_row.remove("address_country");
    author_row.insert("address_country_code".to_string(), json!("CZ"));
    let author = hydrator.create("Author", &map_result(hydrator.registry(), &author_meta, &author_row)?, identity_map, HydrateOptions::default())?;

    let mut book_row = book_record("b-1", "Dune", json!(1));
    book_row.remove("location");
    book_row.insert("location_code".to_string(), json!("PRG"));
    book_row.insert("location_revision".to_string(), json!(4));
    let book = hydrator.create("Book", &map_result(hydrator.registry(), &book_meta, &book_row)?, identity_map, HydrateOptions::default())?;
    assert!(book.get("author").and_then(|v| v.as_entity().cloned()).is_some_and(|a| a.ptr_eq(&author)));
    Ok(author)
}

#[test]
fn it_should_round_trip_rows_through_a_graph() {
    let hydrator = hydrator(Settings::default().with_timezone("+02:00")).unwrap();
    let mut identity_map = SimpleIdentityMap::new();
    let author = rows_to_graph(&hydrator, &mut identity_map).unwrap();
    let book = identity_map.values().find(|e| e.entity_name() == "Book").cloned().unwrap();

    let out = EntitySerializer::default().serialize(&book, &SerializeOptions::new().populate(&["author"])).unwrap();
    assert_eq!(out["location"], json!({"code": "PRG", "revision": 4}));
    assert_eq!(out["author"]["address"]["country"], json!("CZ"));
    assert_eq!(out["author"]["born"], json!("1970-05-17T07:30:00.000Z"));
    assert!(!author.has_serialization_context());
    identity_map.dispose();
}

#[test]
fn it_should_track_collection_edits_on_a_hydrated_graph() {
    let hydrator = hydrator(Settings::default().with_timezone("+02:00")).unwrap();
    let mut identity_map = SimpleIdentityMap::new();
    let book = hydrator.create("Book", &book_record("b-1", "Dune", json!(1)), &mut identity_map, HydrateOptions::default()).unwrap();
    let tags = book.get("tags").and_then(|v| v.as_collection().cloned()).unwrap();
    assert_eq!(tags.state(), CollectionState::Clean);

    let fresh = hydrator.create("Tag", json!({"id": 3, "name": "new"}).as_object().unwrap(), &mut identity_map, HydrateOptions::default()).unwrap();
    tags.add(&[fresh.clone()]).unwrap();
    assert!(tags.is_dirty());
    assert_eq!(tags.len().unwrap(), 3);

    let other = hydrator.create("Tag", json!({"id": 4, "name": "other", "books": ["b-2"]}).as_object().unwrap(), &mut identity_map, HydrateOptions::default()).unwrap();
    let inverse = other.get("books").and_then(|v| v.as_collection().cloned()).unwrap();
    let unloaded = hydrator.create_reference("Book", &json!("b-3"), &mut identity_map).unwrap();
    assert!(matches!(inverse.add(&[unloaded]), Err(OrmError::CannotModifyInverseCollection { .. })));
    inverse.add(&[book.clone()]).unwrap();
    assert!(tags.contains(&other));

    let out = EntitySerializer::default().serialize(&book, &SerializeOptions::new()).unwrap();
    assert_eq!(out["tags"], json!([1, 2, 3, 4]));
}
