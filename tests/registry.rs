mod common;

use sightings_ingest::registry::{
    DuplicateTablePolicy, HeaderCandidate, Registry, RegistryError, SemanticType, TableCollision,
};

use common::{TAXONOMY_REGISTRY_YAML, TestWorkspace};

#[test]
fn builtin_registry_loads_and_reports_duplicate_tables() {
    let registry = Registry::builtin().expect("built-in registry parses");
    assert!(registry.tables.len() > 20);

    let collisions = registry.collisions();
    let names = collisions.iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["site", "taxonomy"]);
    assert!(collisions.iter().all(|c| c.positions.len() == 2));

    let err = registry
        .check_duplicates(DuplicateTablePolicy::Reject)
        .expect_err("duplicates rejected by default");
    let message = err.to_string();
    assert!(message.contains("'site' at #"), "{message}");
    assert!(message.contains("--duplicate-tables separate"), "{message}");

    let accepted = registry
        .check_duplicates(DuplicateTablePolicy::Separate)
        .expect("separate passes accepted");
    assert_eq!(accepted, collisions);
}

#[test]
fn builtin_registry_has_unique_column_names_per_table() {
    let registry = Registry::builtin().expect("built-in registry parses");
    registry.validate().expect("valid");
    let positive_ectos = registry.table("positive_ectos").expect("positive_ectos");
    let capture = positive_ectos
        .columns
        .iter()
        .filter(|c| c.name == "capture_id")
        .collect::<Vec<_>>();
    assert_eq!(capture.len(), 1);
    assert_eq!(
        capture[0].accepted_headers,
        vec![
            HeaderCandidate::Header("capture_id".to_string()),
            HeaderCandidate::Header("id".to_string())
        ]
    );
}

#[test]
fn registry_file_round_trips_through_yaml() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("registry.yaml", TAXONOMY_REGISTRY_YAML);
    let registry = Registry::load(&path).expect("load registry file");

    assert_eq!(registry.tables.len(), 2);
    let measurements = registry.table("measurements").expect("measurements");
    assert_eq!(measurements.columns[1].semantic_type, SemanticType::Numeric);
    assert!(measurements.columns[1].is_optional());
    assert_eq!(
        measurements.columns[2].accepted_headers[1],
        HeaderCandidate::Absent
    );

    let reparsed = Registry::from_yaml_str(&registry.to_yaml_string().expect("serialize"))
        .expect("reparse");
    assert_eq!(reparsed, registry);
}

#[test]
fn headers_are_lowercased_and_type_aliases_accepted() {
    let registry = Registry::from_yaml_str(
        "tables:\n  - name: t\n    columns:\n      - { name: n, type: numerical, headers: [Net_Number, null] }\n",
    )
    .expect("parse");
    let column = &registry.tables[0].columns[0];
    assert_eq!(column.semantic_type, SemanticType::Numeric);
    assert_eq!(
        column.accepted_headers[0],
        HeaderCandidate::Header("net_number".to_string())
    );
}

#[test]
fn malformed_registries_are_rejected() {
    let cases = [
        ("tables: []\n", "does not define any tables"),
        (
            "tables:\n  - name: t\n    columns: []\n",
            "Table 't' does not define any columns",
        ),
        (
            "tables:\n  - name: t\n    columns:\n      - { name: a, type: text, headers: [a] }\n      - { name: a, type: text, headers: [b] }\n",
            "defines column 'a' more than once",
        ),
        (
            "tables:\n  - name: t\n    columns:\n      - { name: a, type: text, headers: [] }\n",
            "does not list any accepted headers",
        ),
        (
            "tables:\n  - name: t\n    columns:\n      - { name: a, type: text, headers: [''] }\n",
            "lists an empty header",
        ),
        (
            "tables:\n  - name: t\n    columns:\n      - { name: a, type: decimal, headers: [a] }\n",
            "Unknown column type 'decimal'",
        ),
    ];
    for (yaml, expected) in cases {
        let err = Registry::from_yaml_str(yaml).expect_err(yaml);
        let message = err.to_string();
        assert!(message.contains(expected), "{yaml}: {message}");
    }
}

#[test]
fn missing_registry_file_is_an_io_error() {
    let workspace = TestWorkspace::new();
    let err = Registry::load(&workspace.path().join("nope.yaml")).expect_err("missing file");
    assert!(matches!(err, RegistryError::Io { .. }));
}

#[test]
fn duplicate_table_error_lists_every_position() {
    let registry = Registry::from_yaml_str(
        "tables:\n  - name: a\n    columns: [{ name: x, type: text, headers: [x] }]\n  - name: b\n    columns: [{ name: x, type: text, headers: [x] }]\n  - name: a\n    columns: [{ name: y, type: text, headers: [y] }]\n",
    )
    .expect("duplicates are allowed at parse time");
    assert_eq!(
        registry.collisions(),
        vec![TableCollision {
            name: "a".to_string(),
            positions: vec![1, 3],
        }]
    );
    let err = registry
        .check_duplicates(DuplicateTablePolicy::Reject)
        .expect_err("rejected");
    assert!(err.to_string().contains("'a' at #1, #3"));
}
