#[cfg(test)]
mod serialization_tests {
    use hydrant::fixtures::{author_graph_record, author_record, book_record, hydrator};
    use hydrant::serde_json::{json, Value as JsonValue};
    use hydrant::*;
    use std::sync::Arc;

    struct Graph {
        hydrator: Hydrator,
        identity_map: SimpleIdentityMap,
    }

    impl Graph {
        fn new() -> Self {
            Graph { hydrator: hydrator(Settings::default().with_timezone("+02:00")).unwrap(), identity_map: SimpleIdentityMap::new() }
        }

        fn create(&mut self, entity: &str, data: &JsonMap) -> EntityRef {
            self.hydrator.create(entity, data, &mut self.identity_map, HydrateOptions::default()).unwrap()
        }

        fn create_new(&mut self, entity: &str, data: &JsonMap) -> EntityRef {
            self.hydrator.create(entity, data, &mut self.identity_map, HydrateOptions::new_entity()).unwrap()
        }
    }

    fn serialize(entity: &EntityRef, options: SerializeOptions) -> JsonValue {
        EntitySerializer::default().serialize(entity, &options).unwrap()
    }

    #[test]
    fn it_should_serialize_a_loaded_entity() {
        let mut graph = Graph::new();
        let author = graph.create("Author", &author_record(1, "Ann"));
        let expected = json!({
            "id": 1,
            "name": "Ann",
            "born": "1970-05-17T07:30:00.000Z",
            "terms_accepted": true,
            "bio": "Writes things.",
            "meta": {"rank": 3},
            "address": {"street": "Main 1", "city": "Prague", "country": "CZ"},
            "favourite": {"kind": "dog", "name": "Rex", "breed": "beagle"},
            "pets": [
                {"kind": "dog", "name": "Rex", "breed": "beagle"},
                {"kind": "cat", "name": "Tom", "indoor": true}
            ],
            "display_name": "Ann (#1)"
        });
        assert_eq!(serialize(&author, SerializeOptions::new()), expected);
    }

    #[test]
    fn it_should_reduce_unpopulated_relations_to_keys() {
        let mut graph = Graph::new();
        let book = graph.create("Book", &book_record("b-1", "Dune", json!(1)));
        let out = serialize(&book, SerializeOptions::new());
        assert_eq!(out["uuid"], json!("b-1"));
        assert_eq!(out["published_at"], json!("2020-02-02T10:00:00.000Z"));
        assert_eq!(out["author"], json!(1));
        assert_eq!(out["publisher"], json!(1));
        assert_eq!(out["location"], json!({"code": "PRG", "revision": 4}));
        assert_eq!(out["tags"], json!([1, 2]));

        let pruned = serialize(&book, SerializeOptions::new().exclude(&["location.revision"]));
        assert_eq!(pruned["location"], json!("PRG"));

        let forced = serialize(&book, SerializeOptions::new().force_object());
        assert_eq!(forced["author"], json!({"id": 1}));
        assert_eq!(forced["tags"], json!([{"id": 1}, {"id": 2}]));

        let configured = EntitySerializer::new(Arc::new(Settings::default().with_force_object(true)));
        let out = configured.serialize(&book, &SerializeOptions::new()).unwrap();
        assert_eq!(out["publisher"], json!({"id": 1}));
    }

    #[test]
    fn it_should_expand_populated_relations() {
        let mut graph = Graph::new();
        graph.create("Author", &author_record(1, "Ann"));
        let book = graph.create("Book", &book_record("b-1", "Dune", json!(1)));
        let out = serialize(&book, SerializeOptions::new().populate(&["author", "publisher"]));
        assert_eq!(out["author"]["name"], json!("Ann"));
        assert_eq!(out["author"]["display_name"], json!("Ann (#1)"));
        assert!(out["author"].get("books").is_none());
        assert_eq!(out["publisher"], json!({"id": 1, "publisher_name": "Orbit", "revenue": 1200.5}));
    }

    #[test]
    fn it_should_keep_references_unexpanded_even_when_populated() {
        let mut graph = Graph::new();
        let book = graph.create("Book", &book_record("b-1", "Dune", json!(9)));
        let out = serialize(&book, SerializeOptions::new().populate(&["author"]));
        assert_eq!(out["author"], json!(9));
    }

    #[test]
    fn it_should_cut_cycles_in_populated_graphs() {
        let mut graph = Graph::new();
        let author = graph.create("Author", &author_graph_record(1, "Ann"));
        let options = SerializeOptions::new().populate(&["books", "books.author"]);
        let (out, stats) = EntitySerializer::default().serialize_with_stats(&author, &options).unwrap();

        let books = out["books"].as_array().unwrap();
        assert_eq!(books.len(), 2);
        for book in books {
            assert_eq!(book["author"]["id"], json!(1));
            assert!(book["author"].get("books").is_none());
            assert_eq!(book["tags"], json!([1, 2]));
        }
        assert_eq!(stats, SerializationStats { visited: 3, max_depth: 3 });

        let everything = serialize(&author, SerializeOptions::new().populate(&["*"]));
        let first = &everything["books"][0];
        assert!(first["author"].get("books").is_none());
        assert_eq!(first["publisher"]["publisher_name"], json!("Orbit"));
        assert_eq!(first["location"], json!({"code": "PRG", "revision": 4}));
    }

    #[test]
    fn it_should_detach_the_context_after_each_call() {
        let mut graph = Graph::new();
        let author = graph.create("Author", &author_graph_record(1, "Ann"));
        let options = SerializeOptions::new().populate(&["books"]);
        let first = serialize(&author, options.clone());
        assert!(!author.has_serialization_context());
        let books = author.get("books").and_then(|v| v.as_collection().cloned()).unwrap();
        assert!(books.items().unwrap().iter().all(|b| !b.has_serialization_context()));
        assert_eq!(serialize(&author, options), first);
    }

    #[test]
    fn it_should_close_the_context_when_serialization_fails() {
        let mut graph = Graph::new();
        let author = graph.create("Author", &author_record(1, "Ann"));
        author.set("name", RawSql::new("upper(name)"));
        let err = EntitySerializer::default().serialize(&author, &SerializeOptions::new()).unwrap_err();
        assert!(matches!(err, OrmError::RawSqlSerialization(ref sql) if sql == "upper(name)"));
        assert!(!author.has_serialization_context());
    }

    #[test]
    fn it_should_apply_visibility_rules() {
        let mut graph = Graph::new();
        let author = graph.create("Author", &author_record(1, "Ann"));
        let out = serialize(&author, SerializeOptions::new().populate(&["email"]).exclude(&["bio", "display_name"]));
        assert_eq!(out["email"], json!("ann@example.com"));
        assert!(out.get("bio").is_none());
        assert!(out.get("display_name").is_none());
        assert!(out.get("_secret").is_none());

        let book = graph.create("Book", &book_record("b-1", "Dune", json!(1)));
        let public = serialize(&book, SerializeOptions::new().populate(&["publisher"]).groups(&["public"]));
        assert_eq!(public["publisher"], json!({"id": 1, "publisher_name": "Orbit"}));
        let admin = serialize(&book, SerializeOptions::new().populate(&["publisher"]).groups(&["admin"]));
        assert_eq!(admin["publisher"]["revenue"], json!(1200.5));
    }

    #[test]
    fn it_should_skip_nulls_when_asked() {
        let mut graph = Graph::new();
        let mut data = author_record(1, "Ann");
        data.insert("born".to_string(), JsonValue::Null);
        data.insert("address_city".to_string(), JsonValue::Null);
        let author = graph.create("Author", &data);

        let out = serialize(&author, SerializeOptions::new());
        assert_eq!(out["born"], JsonValue::Null);
        assert_eq!(out["address"]["city"], JsonValue::Null);

        let out = serialize(&author, SerializeOptions::new().skip_null());
        assert!(out.get("born").is_none());
        assert_eq!(out["address"], json!({"street": "Main 1", "country": "CZ"}));
    }

    #[test]
    fn it_should_expand_unmanaged_entities() {
        let mut graph = Graph::new();
        let mut data = book_record("b-new", "Draft", json!({"id": 5, "name": "New"}));
        data.remove("tags");
        let book = graph.create_new("Book", &data);
        let out = serialize(&book, SerializeOptions::new());
        assert_eq!(out["author"]["name"], json!("New"));
        assert_eq!(out["author"]["books"], json!([]));
        assert_eq!(out["tags"], json!([]));
    }

    #[test]
    fn it_should_run_property_serializers_unless_ignored() {
        let mut graph = Graph::new();
        let book = graph.create("Book", &book_record("b-1", "Dune", json!(1)));
        let out = serialize(&book, SerializeOptions::new().populate(&["tags"]));
        assert_eq!(out["tags"], json!([1, {"id": 2, "name": "CLASSIC"}]));
        let raw = serialize(&book, SerializeOptions::new().populate(&["tags"]).ignore_serializers());
        assert_eq!(raw["tags"][1]["name"], json!("classic"));
    }

    #[test]
    fn it_should_expand_relations_marked_as_populated() {
        let mut graph = Graph::new();
        let author = graph.create("Author", &author_graph_record(1, "Ann"));
        assert_eq!(serialize(&author, SerializeOptions::new()).get("books"), Some(&json!(["b-1-1", "b-1-2"])));

        author.mark_populated("books");
        let out = serialize(&author, SerializeOptions::new());
        let books = out["books"].as_array().unwrap();
        assert_eq!(books[0]["title"], json!("First"));
        assert_eq!(books[1]["author"], json!(1));
    }

    #[test]
    fn it_should_omit_unloaded_values() {
        let mut graph = Graph::new();
        let mut data = author_record(1, "Ann");
        data.remove("bio");
        let author = graph.create("Author", &data);
        let out = serialize(&author, SerializeOptions::new().populate(&["books"]));
        assert!(out.get("bio").is_none());
        assert!(out.get("books").is_none());
        assert!(out.get("profile").is_none());
    }
}
