#[cfg(test)]
mod hydration_tests {
    use hydrant::chrono::{TimeZone, Utc};
    use hydrant::fixtures::{author_graph_record, author_record, book_record, hydrator};
    use hydrant::serde_json::{json, Value as JsonValue};
    use hydrant::*;
    use std::sync::Arc;

    fn offset_hydrator() -> Hydrator {
        hydrator(Settings::default().with_timezone("+02:00")).unwrap()
    }

    fn record(value: JsonValue) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    fn entity(value: Option<FieldValue>) -> EntityRef {
        value.and_then(|v| v.as_entity().cloned()).expect("entity value")
    }

    fn collection(value: Option<FieldValue>) -> Collection {
        value.and_then(|v| v.as_collection().cloned()).expect("collection value")
    }

    fn embedded(value: Option<FieldValue>) -> Embeddable {
        value.and_then(|v| v.as_embedded().cloned()).expect("embedded value")
    }

    fn text(value: Option<&FieldValue>) -> Option<String> {
        match value {
            Some(FieldValue::Scalar(Scalar::Text(t))) => Some(t.clone()),
            _ => None,
        }
    }

    #[test]
    fn it_should_compile_each_type_and_mode_once() {
        let hydrator = offset_hydrator();
        let first = hydrator.compile("Author", HydrationMode::Full).unwrap();
        let second = hydrator.compile("Author", HydrationMode::Full).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        hydrator.compile("Author", HydrationMode::Reference).unwrap();
        assert_eq!(hydrator.compiled_procedures(), 2);
    }

    #[test]
    fn it_should_hydrate_the_same_record_into_the_same_state() {
        let hydrator = offset_hydrator();
        let mut first_map = SimpleIdentityMap::new();
        let mut second_map = SimpleIdentityMap::new();
        let first = hydrator.create("Author", &author_record(1, "Ann"), &mut first_map, HydrateOptions::default()).unwrap();
        let second = hydrator.create("Author", &author_record(1, "Ann"), &mut second_map, HydrateOptions::default()).unwrap();
        assert!(!first.ptr_eq(&second));
        assert_eq!(
            prepare_entity(hydrator.registry(), &first).unwrap(),
            prepare_entity(hydrator.registry(), &second).unwrap()
        );
        assert_eq!(first.loaded_properties(), second.loaded_properties());
    }

    #[test]
    fn it_should_leave_properties_missing_from_a_partial_record_untouched() {
        let hydrator = offset_hydrator();
        let mut identity_map = SimpleIdentityMap::new();
        let author = hydrator.create("Author", &author_record(1, "Ann"), &mut identity_map, HydrateOptions::default()).unwrap();

        let partial = record(json!({"id": 1, "name": "Anna"}));
        hydrator.hydrate(&author, &partial, &mut identity_map, HydrateOptions::default()).unwrap();

        assert_eq!(text(author.get("name").as_ref()), Some("Anna".to_string()));
        assert_eq!(text(author.get("email").as_ref()), Some("ann@example.com".to_string()));
        assert!(author.get("born").unwrap().as_scalar().is_some());
    }

    #[test]
    fn it_should_hydrate_dates_with_the_configured_offset() {
        let hydrator = offset_hydrator();
        let mut identity_map = SimpleIdentityMap::new();
        let naive = record(json!({"uuid": "a", "title": "A", "published_at": "2024-01-01 10:00:00"}));
        let zulu = record(json!({"uuid": "b", "title": "B", "published_at": "2024-01-01T10:00:00Z"}));
        let naive = hydrator.create("Book", &naive, &mut identity_map, HydrateOptions::default()).unwrap();
        let zulu = hydrator.create("Book", &zulu, &mut identity_map, HydrateOptions::default()).unwrap();

        let expected_naive = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let expected_zulu = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(naive.get("published_at").unwrap().as_scalar(), Some(&Scalar::DateTime(expected_naive)));
        assert_eq!(zulu.get("published_at").unwrap().as_scalar(), Some(&Scalar::DateTime(expected_zulu)));
    }

    #[test]
    fn it_should_force_utc_when_configured() {
        let mut settings = Settings::default().with_timezone("+02:00");
        settings.force_utc_timezone = true;
        let hydrator = hydrator(settings).unwrap();
        let mut identity_map = SimpleIdentityMap::new();
        let book = record(json!({"uuid": "a", "title": "A", "published_at": "2024-01-01 10:00:00"}));
        let book = hydrator.create("Book", &book, &mut identity_map, HydrateOptions::default()).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(book.get("published_at").unwrap().as_scalar(), Some(&Scalar::DateTime(expected)));
    }

    #[test]
    fn it_should_hydrate_nulls_as_the_configured_sentinel() {
        let mut data = author_record(1, "Ann");
        data.insert("born".to_string(), JsonValue::Null);

        let offset = offset_hydrator();
        let author = offset.create("Author", &data, &mut SimpleIdentityMap::new(), HydrateOptions::default()).unwrap();
        assert!(author.get("born").unwrap().is_null());

        let undefined = hydrator(Settings::default().with_force_undefined(true)).unwrap();
        let author = undefined.create("Author", &data, &mut SimpleIdentityMap::new(), HydrateOptions::default()).unwrap();
        assert!(author.get("born").unwrap().is_undefined());
    }

    #[test]
    fn it_should_keep_scalar_reference_wrappers_across_rehydration() {
        let hydrator = offset_hydrator();
        let mut identity_map = SimpleIdentityMap::new();
        let author = hydrator.create("Author", &author_record(1, "Ann"), &mut identity_map, HydrateOptions::default()).unwrap();
        let wrapper = author.get("bio").and_then(|v| v.as_scalar_ref().cloned()).unwrap();
        assert_eq!(wrapper.get(), Some(Scalar::Text("Writes things.".into())));

        hydrator.hydrate(&author, &record(json!({"bio": "Rewritten."})), &mut identity_map, HydrateOptions::default()).unwrap();
        let after = author.get("bio").and_then(|v| v.as_scalar_ref().cloned()).unwrap();
        assert!(after.ptr_eq(&wrapper));
        assert_eq!(wrapper.get(), Some(Scalar::Text("Rewritten.".into())));
    }

    #[test]
    fn it_should_load_nulls_into_existing_scalar_reference_wrappers() {
        let hydrator = offset_hydrator();
        let mut identity_map = SimpleIdentityMap::new();
        let author = hydrator.create("Author", &author_record(1, "Ann"), &mut identity_map, HydrateOptions::default()).unwrap();
        let wrapper = author.get("bio").and_then(|v| v.as_scalar_ref().cloned()).unwrap();

        hydrator.hydrate(&author, &record(json!({"bio": null})), &mut identity_map, HydrateOptions::default()).unwrap();
        let after = author.get("bio").and_then(|v| v.as_scalar_ref().cloned()).unwrap();
        assert!(after.ptr_eq(&wrapper));
        assert!(wrapper.is_initialized());
        assert_eq!(wrapper.get(), None);

        let mut data = author_record(2, "Bob");
        data.insert("bio".to_string(), JsonValue::Null);
        let fresh = hydrator.create("Author", &data, &mut identity_map, HydrateOptions::default()).unwrap();
        let wrapper = fresh.get("bio").and_then(|v| v.as_scalar_ref().cloned()).unwrap();
        assert!(wrapper.is_initialized());
        assert_eq!(wrapper.get(), None);
    }

    #[test]
    fn it_should_leave_absent_scalar_references_unloaded() {
        let hydrator = offset_hydrator();
        let mut data = author_record(1, "Ann");
        data.remove("bio");
        let author = hydrator.create("Author", &data, &mut SimpleIdentityMap::new(), HydrateOptions::default()).unwrap();
        let wrapper = author.get("bio").and_then(|v| v.as_scalar_ref().cloned()).unwrap();
        assert!(!wrapper.is_initialized());
    }

    #[test]
    fn it_should_create_references_for_bare_keys_and_upgrade_them_in_place() {
        let hydrator = offset_hydrator();
        let mut identity_map = SimpleIdentityMap::new();
        let book = hydrator.create("Book", &book_record("b-1", "Dune", json!(7)), &mut identity_map, HydrateOptions::default()).unwrap();
        let reference = entity(book.get("author"));
        assert!(!reference.is_initialized());
        assert!(reference.is_managed());
        assert_eq!(reference.primary_key_json(), Some(json!(7)));
        assert_eq!(reference.loaded_properties(), vec!["id".to_string()]);

        let author = hydrator.create("Author", &author_record(7, "Frank"), &mut identity_map, HydrateOptions::default()).unwrap();
        assert!(author.ptr_eq(&reference));
        assert!(reference.is_initialized());
        assert_eq!(text(reference.get("name").as_ref()), Some("Frank".to_string()));
    }

    #[test]
    fn it_should_never_allocate_two_identities_for_one_key() {
        let hydrator = offset_hydrator();
        let mut identity_map = SimpleIdentityMap::new();
        let first = hydrator.create("Author", &author_record(1, "Ann"), &mut identity_map, HydrateOptions::default()).unwrap();
        let merged = hydrator.create("Author", &record(json!({"id": 1, "name": "Merged"})), &mut identity_map, HydrateOptions::default()).unwrap();
        assert!(first.ptr_eq(&merged));
        assert_eq!(text(first.get("name").as_ref()), Some("Merged".to_string()));

        let kept = hydrator.create("Author", &record(json!({"id": "1", "name": "Ignored"})), &mut identity_map, HydrateOptions::without_merge()).unwrap();
        assert!(first.ptr_eq(&kept));
        assert_eq!(text(first.get("name").as_ref()), Some("Merged".to_string()));
        assert_eq!(identity_map.len(), 1);
    }

    #[test]
    fn it_should_find_managed_entities_by_converted_key_values() {
        let mut registry = MetadataRegistry::new();
        registry
            .register(
                EntityMeta::entity("Event")
                    .property(PropertyMeta::scalar("at", ScalarType::DateTime).primary())
                    .property(PropertyMeta::scalar("title", ScalarType::Text)),
            )
            .unwrap();
        let events = Hydrator::new(Arc::new(registry), Arc::new(Settings::default().with_timezone("+02:00")));
        let mut identity_map = SimpleIdentityMap::new();
        let first = events.create("Event", &record(json!({"at": "2024-01-01T10:00:00Z", "title": "Launch"})), &mut identity_map, HydrateOptions::default()).unwrap();
        let again = events.create("Event", &record(json!({"at": "2024-01-01T10:00:00Z", "title": "Relaunch"})), &mut identity_map, HydrateOptions::default()).unwrap();
        let shifted = events.create("Event", &record(json!({"at": "2024-01-01 12:00:00"})), &mut identity_map, HydrateOptions::default()).unwrap();
        assert!(first.ptr_eq(&again));
        assert!(first.ptr_eq(&shifted));
        assert_eq!(text(first.get("title").as_ref()), Some("Relaunch".to_string()));
        assert_eq!(identity_map.len(), 1);

        let hydrator = offset_hydrator();
        let mut identity_map = SimpleIdentityMap::new();
        let tag = hydrator.create("Tag", &record(json!({"id": 1, "name": "scifi"})), &mut identity_map, HydrateOptions::default()).unwrap();
        let float_key = hydrator.create("Tag", &record(json!({"id": 1.0, "name": "sf"})), &mut identity_map, HydrateOptions::default()).unwrap();
        let reference = hydrator.create_reference("Tag", &json!(1.0), &mut identity_map).unwrap();
        assert!(tag.ptr_eq(&float_key));
        assert!(tag.ptr_eq(&reference));
        assert_eq!(identity_map.len(), 1);
    }

    #[test]
    fn it_should_hydrate_to_many_collections_as_clean_snapshots() {
        let hydrator = offset_hydrator();
        let mut identity_map = SimpleIdentityMap::new();
        let author = hydrator.create("Author", &author_graph_record(1, "Ann"), &mut identity_map, HydrateOptions::default()).unwrap();
        let books = collection(author.get("books"));
        assert_eq!(books.state(), CollectionState::Clean);
        let items = books.items().unwrap();
        assert_eq!(items.len(), 2);
        for book in &items {
            assert!(entity(book.get("author")).ptr_eq(&author));
            assert!(book.is_initialized());
        }

        let first_tags = collection(items[0].get("tags")).items().unwrap();
        let second_tags = collection(items[1].get("tags")).items().unwrap();
        assert!(!first_tags[0].is_initialized());
        assert!(first_tags[1].is_initialized());
        assert!(first_tags[0].ptr_eq(&second_tags[0]));
        assert!(first_tags[1].ptr_eq(&second_tags[1]));
        assert_eq!(collection(first_tags[1].get("books")).state(), CollectionState::Unloaded);

        let location = entity(items[0].get("location"));
        assert_eq!(location.primary_key_json(), Some(json!(["PRG", 4])));
        assert!(!location.is_initialized());
    }

    #[test]
    fn it_should_wrap_a_single_object_into_a_collection() {
        let hydrator = offset_hydrator();
        let mut data = author_record(1, "Ann");
        data.insert("books".to_string(), json!({"uuid": "solo", "title": "Solo"}));
        let author = hydrator.create("Author", &data, &mut SimpleIdentityMap::new(), HydrateOptions::default()).unwrap();
        let books = collection(author.get("books")).items().unwrap();
        assert_eq!(books.len(), 1);
        assert!(entity(books[0].get("author")).ptr_eq(&author));
    }

    #[test]
    fn it_should_create_lazy_collections_for_missing_relations() {
        let hydrator = offset_hydrator();
        let author = hydrator.create("Author", &author_record(1, "Ann"), &mut SimpleIdentityMap::new(), HydrateOptions::default()).unwrap();
        let books = collection(author.get("books"));
        assert_eq!(books.state(), CollectionState::Unloaded);
        assert!(matches!(books.items(), Err(OrmError::CollectionNotInitialized { .. })));
        assert!(!author.has("profile"));
    }

    #[test]
    fn it_should_mark_collections_of_new_entities_dirty() {
        let hydrator = offset_hydrator();
        let mut identity_map = SimpleIdentityMap::new();
        let author = hydrator.create("Author", &author_graph_record(1, "Ann"), &mut identity_map, HydrateOptions::new_entity()).unwrap();
        assert!(!author.is_managed());
        assert!(author.original_data().is_none());
        let books = collection(author.get("books"));
        assert_eq!(books.state(), CollectionState::Dirty);
        assert!(books.items().unwrap().iter().all(|b| !b.is_managed()));

        let empty = hydrator.create("Author", &author_record(2, "Bob"), &mut identity_map, HydrateOptions::new_entity()).unwrap();
        let books = collection(empty.get("books"));
        assert!(books.is_dirty());
        assert_eq!(books.len().unwrap(), 0);
    }

    #[test]
    fn it_should_hydrate_inline_embeddables_from_prefixed_keys() {
        let hydrator = offset_hydrator();
        let mut identity_map = SimpleIdentityMap::new();
        let author = hydrator.create("Author", &author_record(1, "Ann"), &mut identity_map, HydrateOptions::default()).unwrap();
        let address = embedded(author.get("address"));
        assert_eq!(text(address.get("city")), Some("Prague".to_string()));
        assert_eq!(text(address.get("country")), Some("CZ".to_string()));

        hydrator.hydrate(&author, &record(json!({"address_city": "Brno"})), &mut identity_map, HydrateOptions::default()).unwrap();
        let address = embedded(author.get("address"));
        assert_eq!(text(address.get("city")), Some("Brno".to_string()));
        assert_eq!(text(address.get("street")), Some("Main 1".to_string()));

        let cleared = record(json!({"address_street": null, "address_city": null, "address_country": null}));
        hydrator.hydrate(&author, &cleared, &mut identity_map, HydrateOptions::default()).unwrap();
        assert!(author.get("address").unwrap().is_null());
    }

    #[test]
    fn it_should_merge_partially_null_inline_embeddables() {
        let hydrator = offset_hydrator();
        let mut identity_map = SimpleIdentityMap::new();
        let author = hydrator.create("Author", &author_record(1, "Ann"), &mut identity_map, HydrateOptions::default()).unwrap();

        hydrator.hydrate(&author, &record(json!({"address_city": null})), &mut identity_map, HydrateOptions::default()).unwrap();
        let address = embedded(author.get("address"));
        assert!(address.get("city").is_some_and(FieldValue::is_null));
        assert_eq!(text(address.get("street")), Some("Main 1".to_string()));
        assert_eq!(text(address.get("country")), Some("CZ".to_string()));

        hydrator.hydrate(&author, &record(json!({"favourite_breed": "collie"})), &mut identity_map, HydrateOptions::default()).unwrap();
        let favourite = embedded(author.get("favourite"));
        assert_eq!(favourite.type_name(), "Dog");
        assert_eq!(text(favourite.get("name")), Some("Rex".to_string()));
        assert_eq!(text(favourite.get("breed")), Some("collie".to_string()));
    }

    #[test]
    fn it_should_pick_the_embedded_subtype_from_the_discriminator() {
        let hydrator = offset_hydrator();
        let author = hydrator.create("Author", &author_record(1, "Ann"), &mut SimpleIdentityMap::new(), HydrateOptions::default()).unwrap();
        let favourite = embedded(author.get("favourite"));
        assert_eq!(favourite.type_name(), "Dog");
        assert_eq!(text(favourite.get("breed")), Some("beagle".to_string()));

        let pets = match author.get("pets") {
            Some(FieldValue::EmbeddedList(pets)) => pets,
            other => panic!("unexpected pets {other:?}"),
        };
        assert_eq!(pets[0].type_name(), "Dog");
        assert!(pets[0].has("breed"));
        assert_eq!(pets[1].type_name(), "Cat");
        assert!(!pets[1].has("breed"));
        assert!(pets[1].meta.prop("breed").is_none());

        let mut cat_lover = author_record(2, "Bob");
        cat_lover.remove("favourite_breed");
        cat_lover.insert("favourite_kind".to_string(), json!("cat"));
        cat_lover.insert("favourite_indoor".to_string(), json!(false));
        let author = hydrator.create("Author", &cat_lover, &mut SimpleIdentityMap::new(), HydrateOptions::default()).unwrap();
        let favourite = embedded(author.get("favourite"));
        assert_eq!(favourite.type_name(), "Cat");
        assert!(!favourite.has("breed"));
        assert_eq!(favourite.get("indoor").and_then(|v| v.as_scalar()), Some(&Scalar::Bool(false)));
    }

    #[test]
    fn it_should_link_one_to_one_inverse_only_when_unset() {
        let hydrator = offset_hydrator();
        let mut identity_map = SimpleIdentityMap::new();
        let first = record(json!({"id": 1, "headline": "First", "author": {"id": 1, "name": "Ann"}}));
        let first = hydrator.create("Profile", &first, &mut identity_map, HydrateOptions::default()).unwrap();
        let author = entity(first.get("author"));
        assert!(entity(author.get("profile")).ptr_eq(&first));

        let second = record(json!({"id": 2, "headline": "Second", "author": 1}));
        let second = hydrator.create("Profile", &second, &mut identity_map, HydrateOptions::default()).unwrap();
        assert!(entity(second.get("author")).ptr_eq(&author));
        // the inverse side keeps pointing at the first profile
        assert!(entity(author.get("profile")).ptr_eq(&first));
    }

    #[test]
    fn it_should_convert_custom_and_builtin_scalars() {
        let hydrator = offset_hydrator();
        let author = hydrator.create("Author", &author_record(1, "Ann"), &mut SimpleIdentityMap::new(), HydrateOptions::default()).unwrap();
        assert_eq!(author.get("meta").unwrap().as_scalar(), Some(&Scalar::Json(json!({"rank": 3}))));
        assert_eq!(author.get("terms_accepted").unwrap().as_scalar(), Some(&Scalar::Bool(true)));
        let born = Utc.with_ymd_and_hms(1970, 5, 17, 7, 30, 0).unwrap();
        assert_eq!(author.get("born").unwrap().as_scalar(), Some(&Scalar::DateTime(born)));
    }

    #[test]
    fn it_should_hydrate_only_keys_in_reference_mode() {
        let hydrator = offset_hydrator();
        let mut identity_map = SimpleIdentityMap::new();
        let reference = hydrator.create_reference("Location", &json!({"code": "PRG", "revision": 2}), &mut identity_map).unwrap();
        assert_eq!(reference.primary_key_hash().as_deref(), Some("PRG~~~2"));
        assert!(!reference.is_initialized());

        let same = hydrator.create_reference("Location", &json!(["PRG", 2]), &mut identity_map).unwrap();
        assert!(same.ptr_eq(&reference));

        let author = EntityRef::new(hydrator.registry().get("Author").unwrap());
        hydrator.hydrate_reference(&author, &author_record(3, "Cid"), &mut identity_map).unwrap();
        assert_eq!(author.loaded_properties(), vec!["id".to_string()]);
    }

    #[test]
    fn it_should_track_changes_against_the_loaded_snapshot() {
        let hydrator = offset_hydrator();
        let mut identity_map = SimpleIdentityMap::new();
        let book = hydrator.create("Book", &book_record("b-1", "Dune", json!(1)), &mut identity_map, HydrateOptions::default()).unwrap();
        let original = book.original_data().unwrap();
        assert_eq!(original.get("author"), Some(&json!(1)));
        assert_eq!(original.get("location"), Some(&json!(["PRG", 4])));
        assert!(changed_properties(hydrator.registry(), &book).unwrap().is_empty());

        book.set("title", "Dune Messiah");
        book.set("publisher", FieldValue::Null);
        assert_eq!(changed_properties(hydrator.registry(), &book).unwrap(), vec!["title", "publisher"]);
    }

    #[test]
    fn it_should_map_rows_before_hydration() {
        let hydrator = offset_hydrator();
        let meta = hydrator.registry().get("Author").unwrap();
        let row = record(json!({"id": 3, "name": "Row", "address_country_code": "SK", "address.city": "Bratislava"}));
        let data = map_result(hydrator.registry(), &meta, &row).unwrap();
        let author = hydrator.create("Author", &data, &mut SimpleIdentityMap::new(), HydrateOptions::default()).unwrap();
        let address = embedded(author.get("address"));
        assert_eq!(text(address.get("country")), Some("SK".to_string()));
        assert_eq!(text(address.get("city")), Some("Bratislava".to_string()));

        let bad = record(json!({"id": 3, "address.zip": "60200"}));
        assert!(matches!(map_result(hydrator.registry(), &meta, &bad), Err(OrmError::InvalidEmbeddedQuery { .. })));
    }

    #[test]
    fn it_should_report_shape_mismatches() {
        let hydrator = offset_hydrator();
        let mut identity_map = SimpleIdentityMap::new();
        let mut data = author_record(1, "Ann");
        data.insert("terms_accepted".to_string(), json!("maybe"));
        let err = hydrator.create("Author", &data, &mut identity_map, HydrateOptions::default()).unwrap_err();
        assert!(matches!(err, OrmError::TypeMismatch { ref property, .. } if property == "terms_accepted"));

        let book = book_record("b-1", "Dune", json!([1, 2]));
        let err = hydrator.create("Book", &book, &mut identity_map, HydrateOptions::default()).unwrap_err();
        assert!(matches!(err, OrmError::TypeMismatch { ref property, .. } if property == "author"));

        assert!(matches!(
            hydrator.create("Nope", &JsonMap::new(), &mut identity_map, HydrateOptions::default()),
            Err(OrmError::UnknownEntity(_))
        ));
    }
}
