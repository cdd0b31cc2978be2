//! Integration tests for document parsing and serialization.

use std::sync::Arc;

use jsonapi_resource::{
    load_document_str, validate_document_shape, Document, DocumentError, DocumentOptions,
    ErrorObject, InMemoryDatasource, Link, PrimaryData, ResourceError, ResourceFactory,
    ResourceSchema,
};
use serde_json::{json, Value};

fn factory() -> ResourceFactory {
    let mut factory = ResourceFactory::new(Arc::new(InMemoryDatasource::new()))
        .with_options(DocumentOptions::new("https://api.example.com"));
    factory.register(
        ResourceSchema::builder("widgets")
            .attribute("name", json!(null))
            .attribute("size", json!(1))
            .to_one("owner")
            .to_many("parts")
            .build()
            .unwrap(),
    );
    factory.register(
        ResourceSchema::builder("people")
            .attribute("email", json!(null))
            .build()
            .unwrap(),
    );
    factory
}

fn round_trip(input: &Value) -> Value {
    let factory = factory();
    let mut document = Document::from_value(input, &factory).unwrap();
    document.json_serialize().unwrap()
}

mod round_trips {
    use super::*;

    #[test]
    fn single_resource_with_relationships() {
        let input = json!({
            "data": {
                "type": "widgets",
                "id": "1",
                "attributes": {"name": "Sprocket", "size": 2},
                "relationships": {
                    "owner": {"data": {"type": "people", "id": "9"}},
                    "parts": {"data": [{"type": "parts", "id": "a"}, {"type": "parts", "id": "b"}]}
                }
            },
            "links": {"self": "https://api.example.com/widgets/1"},
            "jsonapi": {"version": "1.0"}
        });
        assert_eq!(round_trip(&input), input);
    }

    #[test]
    fn collection_with_included_links_and_meta() {
        let input = json!({
            "data": [
                {"type": "people", "id": "9", "attributes": {"email": "nine@example.com"}},
                {"type": "people", "id": "10", "attributes": {"email": null}}
            ],
            "included": [
                {
                    "type": "widgets",
                    "id": "1",
                    "attributes": {"name": "Sprocket", "size": 1},
                    "relationships": {"owner": {"data": null}}
                }
            ],
            "links": {"self": "/people", "next": {"href": "/people?page=2", "meta": {"page": 2}}},
            "meta": {"total": 12},
            "jsonapi": {"version": "1.0"}
        });
        assert_eq!(round_trip(&input), input);
    }

    #[test]
    fn error_document() {
        let input = json!({
            "errors": [
                {
                    "status": 422,
                    "title": "Invalid attribute",
                    "detail": "name must not be empty",
                    "source": {"pointer": "/data/attributes/name"}
                }
            ],
            "meta": {"request": "abc"},
            "jsonapi": {"version": "1.0"}
        });
        assert_eq!(round_trip(&input), input);
    }

    #[test]
    fn serialized_output_is_structurally_valid() {
        let output = round_trip(&json!({
            "data": {"type": "widgets", "id": "3", "attributes": {"name": "x"}}
        }));
        assert!(validate_document_shape(&output).is_ok());
    }
}

mod serialization {
    use super::*;

    #[test]
    fn member_order_is_data_links_jsonapi() {
        let f = factory();
        let mut document = Document::from_value(
            &json!({"data": {"type": "people", "id": "9", "attributes": {"email": "e"}}}),
            &f,
        )
        .unwrap();
        let rendered = document.to_json_string(false).unwrap();
        assert_eq!(
            rendered,
            r#"{"data":{"type":"people","id":"9","attributes":{"email":"e"}},"links":{"self":"https://api.example.com/people/9"},"jsonapi":{"version":"1.0"}}"#
        );
    }

    #[test]
    fn attributes_follow_declaration_order() {
        let output = round_trip(&json!({
            "data": {"type": "widgets", "id": "1", "attributes": {"size": 5, "name": "n"}}
        }));
        let keys: Vec<&str> = output["data"]["attributes"]
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys, ["name", "size"]);
    }

    #[test]
    fn errors_and_data_are_mutually_exclusive() {
        let output = round_trip(&json!({
            "data": {"type": "people", "id": "9"},
            "included": [{"type": "people", "id": "10"}],
            "errors": [{"status": "500", "title": "Server Error"}]
        }));
        assert!(output.get("data").is_none());
        assert!(output.get("included").is_none());
        assert_eq!(output["errors"][0]["status"], 500);
    }

    #[test]
    fn empty_included_is_omitted() {
        let output = round_trip(&json!({"data": null, "included": []}));
        assert_eq!(output, json!({"data": null, "jsonapi": {"version": "1.0"}}));
    }

    #[test]
    fn added_errors_switch_document_to_error_mode() {
        let f = factory();
        let mut document = f.new_document();
        let resource = f.new_resource("people", Some(&json!({"id": "1"}))).unwrap();
        document.set_data(Some(PrimaryData::Single(resource)));
        document.add_error(ErrorObject::new(403, "Forbidden").unwrap());

        let output = document.json_serialize().unwrap();
        assert!(output.get("data").is_none());
        assert_eq!(output["errors"][0]["title"], "Forbidden");
    }

    #[test]
    fn resource_errors_surface_as_error_objects() {
        let f = factory();
        let mut resource = f.new_resource("widgets", None).unwrap();
        resource.add_error(
            "name",
            ErrorObject::new(422, "Required")
                .unwrap()
                .with_pointer("/data/attributes/name"),
        );

        let mut document = f.new_document().with_errors(resource.errors(None));
        let output = document.json_serialize().unwrap();
        assert_eq!(
            output["errors"][0]["source"]["pointer"],
            "/data/attributes/name"
        );
    }
}

mod parsing {
    use super::*;

    #[test]
    fn unknown_resource_type_fails() {
        let err = Document::from_value(&json!({"data": {"type": "gadgets"}}), &factory())
            .unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Resource(ResourceError::UnknownResourceType { .. })
        ));
    }

    #[test]
    fn invalid_error_object_reports_every_problem() {
        let err = Document::from_value(
            &json!({"errors": [{"status": 42, "title": "", "colour": "red"}]}),
            &factory(),
        )
        .unwrap_err();
        match err {
            DocumentError::Resource(ResourceError::InvalidErrorObject { problems }) => {
                assert!(problems.len() >= 3, "{problems:?}");
            }
            other => panic!("expected InvalidErrorObject, got {other:?}"),
        }
    }

    #[test]
    fn data_of_wrong_type_fails() {
        let err = Document::from_value(&json!({"data": "widgets"}), &factory()).unwrap_err();
        assert!(matches!(err, DocumentError::InvalidSection { section: "data", .. }));
    }

    #[test]
    fn duplicate_link_names_are_rejected() {
        let mut document = Document::new(DocumentOptions::default());
        document.add_link(Link::new("self", "/a")).unwrap();
        let err = document.add_link(Link::new("self", "/b")).unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Resource(ResourceError::DuplicateMember { .. })
        ));
    }

    #[test]
    fn loaded_string_builds_document() {
        let raw = load_document_str(r#"{"data": [{"type": "people", "id": "1"}]}"#).unwrap();
        let document = Document::from_value(&raw, &factory()).unwrap();
        match document.data() {
            Some(PrimaryData::Many(resources)) => assert_eq!(resources.len(), 1),
            other => panic!("expected a collection, got {other:?}"),
        }
    }
}

#[cfg(feature = "remote")]
mod remote {
    use super::*;
    use jsonapi_resource::load_document_url;

    #[test]
    fn fetches_document_over_http() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/people/1")
            .with_status(200)
            .with_header("content-type", "application/vnd.api+json")
            .with_body(r#"{"data": {"type": "people", "id": "1", "attributes": {"email": "a@b.c"}}}"#)
            .create();

        let raw = load_document_url(&format!("{}/people/1", server.url())).unwrap();
        let document = Document::from_value(&raw, &factory()).unwrap();
        match document.data() {
            Some(PrimaryData::Single(resource)) => {
                assert_eq!(resource.attribute("email"), Some(&json!("a@b.c")))
            }
            other => panic!("expected a single resource, got {other:?}"),
        }
        mock.assert();
    }

    #[test]
    fn http_errors_are_network_errors() {
        let mut server = mockito::Server::new();
        let mock = server.mock("GET", "/people/404").with_status(404).create();

        let err = load_document_url(&format!("{}/people/404", server.url())).unwrap_err();
        assert!(matches!(err, DocumentError::NetworkError { .. }));
        assert_eq!(err.exit_code(), 3);
        mock.assert();
    }
}
