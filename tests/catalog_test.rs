use flowstreams::flowstream::fql::catalog::Catalog;
use flowstreams::flowstream::fql::error::{EngineError, NotFoundKind};
use flowstreams::flowstream::fql::plan::{FieldType, FieldUsage};

const CATALOG_JSON: &str = r#"{
    "id": 1,
    "name": "prod",
    "description": "production system",
    "databases": [
        {
            "id": 10,
            "name": "telemetry",
            "description": "",
            "schemas": [
                {
                    "id": 100,
                    "name": "public",
                    "description": "",
                    "tables": [
                        {
                            "id": 1000,
                            "name": "events",
                            "description": "event stream",
                            "fields": [
                                {"id": 1, "name": "ts", "description": "", "type": "timestamp", "usage": "time"},
                                {"id": 2, "name": "host", "description": "", "type": "text", "usage": "group"},
                                {"id": 3, "name": "value", "description": "", "type": "float64", "usage": "data"},
                                {"id": 4, "name": "seq", "description": "", "type": "integer64", "usage": "sequence"}
                            ]
                        }
                    ]
                }
            ]
        }
    ]
}"#;

fn load() -> Catalog {
    Catalog::from_json_reader(CATALOG_JSON.as_bytes()).unwrap()
}

#[test]
fn test_find_table_resolves_four_segment_names() {
    let catalog = load();
    let table = catalog.find_table("prod.telemetry.public.events").unwrap();
    assert_eq!(table.name, "events");
    assert_eq!(table.fields.len(), 4);
}

#[test]
fn test_find_field_resolves_by_name() {
    let catalog = load();
    let field = catalog
        .find_field("prod.telemetry.public.events", "value")
        .unwrap();
    assert_eq!(field.field_type, "float64");
    assert_eq!(field.usage, "data");
}

#[test]
fn test_short_names_are_malformed() {
    let catalog = load();
    assert!(matches!(
        catalog.find_table("telemetry.public.events"),
        Err(EngineError::MalformedName { .. })
    ));
    assert!(matches!(
        catalog.find_table("prod.telemetry.public.events.extra"),
        Err(EngineError::MalformedName { .. })
    ));
}

#[test]
fn test_not_found_names_the_missing_level() {
    let catalog = load();

    let err = catalog.find_table("other.telemetry.public.events").unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotFound {
            kind: NotFoundKind::System,
            ..
        }
    ));

    let err = catalog.find_table("prod.missing.public.events").unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotFound {
            kind: NotFoundKind::Database,
            ..
        }
    ));

    let err = catalog.find_table("prod.telemetry.missing.events").unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotFound {
            kind: NotFoundKind::Schema,
            ..
        }
    ));

    let err = catalog.find_table("prod.telemetry.public.missing").unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotFound {
            kind: NotFoundKind::Table,
            ..
        }
    ));

    let err = catalog
        .find_field("prod.telemetry.public.events", "missing")
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotFound {
            kind: NotFoundKind::Field,
            ..
        }
    ));
}

#[test]
fn test_lookup_is_case_sensitive() {
    let catalog = load();
    assert!(catalog.find_table("prod.telemetry.public.Events").is_err());
}

#[test]
fn test_catalog_round_trips_through_json() {
    let catalog = load();
    let mut out = Vec::new();
    catalog.to_json_writer(&mut out).unwrap();
    let reloaded = Catalog::from_json_reader(out.as_slice()).unwrap();
    assert_eq!(reloaded, catalog);
}

#[test]
fn test_field_resolves_to_plan_field() {
    let catalog = load();
    let ts = catalog
        .find_field("prod.telemetry.public.events", "ts")
        .unwrap()
        .to_plan_field()
        .unwrap();
    // Timestamps travel as text tagged with time usage.
    assert_eq!(ts.field_type, FieldType::Text);
    assert_eq!(ts.usage, FieldUsage::Time);

    let seq = catalog
        .find_field("prod.telemetry.public.events", "seq")
        .unwrap()
        .to_plan_field()
        .unwrap();
    assert_eq!(seq.field_type, FieldType::Integer64);
    assert_eq!(seq.usage, FieldUsage::Sequence);
}

#[test]
fn test_csv_template_renders_names_and_types() {
    let catalog = load();
    let table = catalog.find_table("prod.telemetry.public.events").unwrap();
    let template = table.csv_template('|');
    assert_eq!(
        template,
        "#|ts|host|value|seq\n#|timestamp|text|float64|integer64\n"
    );
}
