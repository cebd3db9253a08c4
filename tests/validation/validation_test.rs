//! Validation of loaded join declarations against a registry.

use joindecl::loader::load_from_str;
use joindecl::model::{EventSource, Join, JoinPart, KeyMapping, Query, Source, TableRef};
use joindecl::registry::{GroupByDef, Registry, StagingQueryDef};
use joindecl::validation::{
    validate, ReferenceKind, Severity, ValidationError, ValidationOptions, ValidationReport,
};

const UNIT_NAME: &str = "joins/sample_team/sample_join.lua";

fn sample_unit(right_parts: &str) -> String {
    format!(
        r#"
return {{
    v1 = Join {{
        left = Source {{
            events = EventSource {{
                table = "sample_namespace.sample_table_skipped",
                query = Query {{
                    startPartition = "2021-03-01",
                    selects = {{ subject = "subject_expr", event = "event_expr" }},
                    timeColumn = "UNIX_TIMESTAMP(ts) * 1000",
                }},
            }},
        }},
        rightParts = {{ {} }},
        online = true,
    }},
}}
"#,
        right_parts
    )
}

const SAMPLE_PART: &str = r#"
    JoinPart {
        group_by = group_by("sample_team.sample_non_prod_group_by.v1"),
        keyMapping = { subject = "group_by_subject" },
    },
"#;

fn registry() -> Registry {
    Registry::new()
        .with_group_by(
            GroupByDef::new(
                "sample_team.sample_non_prod_group_by.v1",
                ["group_by_subject"],
            )
            .online(true),
        )
        .with_group_by(GroupByDef::new("sample_team.offline_group_by.v1", ["group_by_subject"]))
        .with_staging_query(StagingQueryDef::new(
            "sample_team.sample_staging_query.v1",
            "sample_namespace",
        ))
}

fn validate_unit(source: &str) -> ValidationReport {
    let declarations = load_from_str(source, UNIT_NAME).unwrap();
    let join = declarations.get("v1").unwrap();
    let name = join.meta.name.clone().unwrap();
    validate(&name, join, &registry(), &ValidationOptions::default())
}

fn events_join(query: Query) -> Join {
    Join::new(Source::Events(EventSource::new(
        TableRef::literal("sample_namespace.sample_table"),
        query,
    )))
}

fn sample_query() -> Query {
    Query::new()
        .start_partition("2021-03-01")
        .select("subject", "subject_expr")
        .time_column("ts")
}

fn errors(report: &ValidationReport) -> Vec<&ValidationError> {
    report.errors().map(|i| &i.error).collect()
}

// ============================================================================
// Sample scenario
// ============================================================================

#[test]
fn test_sample_join_is_valid() {
    let report = validate_unit(&sample_unit(SAMPLE_PART));
    assert!(report.is_ok(), "{:?}", report.issues);
    assert!(report.issues.is_empty(), "{:?}", report.issues);
    assert_eq!(report.declaration, "sample_team.sample_join.v1");
}

#[test]
fn test_sample_join_without_right_parts() {
    let report = validate_unit(&sample_unit(""));

    assert_eq!(errors(&report), vec![&ValidationError::EmptyRightParts]);
    assert_eq!(report.issues.len(), 1);
    insta::assert_snapshot!(
        report.issues[0].to_string(),
        @"error: sample_team.sample_join.v1 at rightParts: rightParts is empty; a join needs at least one JoinPart"
    );
}

// ============================================================================
// Key mappings
// ============================================================================

#[test]
fn test_duplicate_target_key() {
    let mapping = KeyMapping::new()
        .map("subject", "group_by_subject")
        .map("event", "group_by_subject");
    let join = events_join(sample_query().select("event", "event_expr")).part(
        JoinPart::new("sample_team.sample_non_prod_group_by.v1").key_mapping(mapping),
    );

    let report = validate("v1", &join, &registry(), &ValidationOptions::default());
    assert_eq!(
        errors(&report),
        vec![&ValidationError::DuplicateTargetKey {
            key: "group_by_subject".to_string()
        }]
    );
    assert_eq!(report.errors().next().unwrap().path, "rightParts[0].keyMapping.event");
}

#[test]
fn test_duplicate_target_key_from_lua() {
    let part = r#"
    JoinPart {
        group_by = group_by("sample_team.sample_non_prod_group_by.v1"),
        keyMapping = { subject = "group_by_subject", event = "group_by_subject" },
    },
"#;
    let report = validate_unit(&sample_unit(part));
    assert!(errors(&report)
        .iter()
        .any(|e| matches!(e, ValidationError::DuplicateTargetKey { key } if key == "group_by_subject")));
}

#[test]
fn test_identity_mapping() {
    let registry = Registry::new()
        .with_group_by(GroupByDef::new("team.subjects.v1", ["subject"]).online(true));
    let join = events_join(sample_query())
        .part(JoinPart::new("team.subjects.v1").key_mapping(KeyMapping::new().map("subject", "subject")));

    let report = validate("v1", &join, &registry, &ValidationOptions::default());
    assert_eq!(
        errors(&report),
        vec![&ValidationError::IdentityMapping {
            key: "subject".to_string()
        }]
    );

    let lenient = ValidationOptions {
        allow_identity_mappings: true,
        ..ValidationOptions::default()
    };
    assert!(validate("v1", &join, &registry, &lenient).issues.is_empty());
}

#[test]
fn test_unknown_keys_are_errors_for_online_joins() {
    let mapping = KeyMapping::new().map("missing_column", "not_a_key");
    let join = events_join(sample_query())
        .part(JoinPart::new("sample_team.sample_non_prod_group_by.v1").key_mapping(mapping))
        .online(true);

    let report = validate("v1", &join, &registry(), &ValidationOptions::default());
    let found = errors(&report);
    assert!(found.contains(&&ValidationError::UnknownLeftKey {
        key: "missing_column".to_string()
    }));
    assert!(found.contains(&&ValidationError::UnknownRightKey {
        group_by: "sample_team.sample_non_prod_group_by.v1".to_string(),
        key: "not_a_key".to_string()
    }));
    assert!(found.contains(&&ValidationError::UncoveredGroupByKey {
        group_by: "sample_team.sample_non_prod_group_by.v1".to_string(),
        key: "group_by_subject".to_string()
    }));

    // The same problems only warn when the join is offline
    let offline = join.clone().online(false);
    let report = validate("v1", &offline, &registry(), &ValidationOptions::default());
    assert!(report.is_ok());
    assert_eq!(report.warnings().count(), 3);
}

#[test]
fn test_non_strict_online_downgrades_coverage() {
    let mapping = KeyMapping::new().map("subject", "not_a_key");
    let join = events_join(sample_query())
        .part(JoinPart::new("sample_team.sample_non_prod_group_by.v1").key_mapping(mapping))
        .online(true);
    let options = ValidationOptions {
        strict_online: false,
        ..ValidationOptions::default()
    };

    let report = validate("v1", &join, &registry(), &options);
    assert!(report.is_ok());
    assert!(report.has_warnings());
}

// ============================================================================
// References
// ============================================================================

#[test]
fn test_unresolved_group_by() {
    let part = r#"JoinPart { group_by = group_by("sample_team.unknown.v1") },"#;
    let report = validate_unit(&sample_unit(part));

    assert_eq!(
        errors(&report),
        vec![&ValidationError::UnresolvedReference {
            kind: ReferenceKind::GroupBy,
            name: "sample_team.unknown.v1".to_string()
        }]
    );
    assert!(report.is_fatal());
    assert_eq!(report.issues[0].path, "rightParts[0].group_by");
}

#[test]
fn test_online_join_with_offline_group_by() {
    let part = r#"
    JoinPart {
        group_by = group_by("sample_team.offline_group_by.v1"),
        keyMapping = { subject = "group_by_subject" },
    },
"#;
    let report = validate_unit(&sample_unit(part));
    assert_eq!(
        errors(&report),
        vec![&ValidationError::OfflineGroupBy {
            group_by: "sample_team.offline_group_by.v1".to_string()
        }]
    );
    assert!(!report.is_fatal());
}

#[test]
fn test_production_join_with_non_production_group_by() {
    let join = events_join(sample_query())
        .part(
            JoinPart::new("sample_team.sample_non_prod_group_by.v1")
                .key_mapping(KeyMapping::new().map("subject", "group_by_subject")),
        )
        .production(true);

    let report = validate("v1", &join, &registry(), &ValidationOptions::default());
    assert_eq!(
        errors(&report),
        vec![&ValidationError::NonProductionGroupBy {
            group_by: "sample_team.sample_non_prod_group_by.v1".to_string()
        }]
    );
}

#[test]
fn test_staging_query_table() {
    let mapping = KeyMapping::new().map("subject", "group_by_subject");
    let part = JoinPart::new("sample_team.sample_non_prod_group_by.v1").key_mapping(mapping);

    let known = Join::new(Source::Events(EventSource::new(
        TableRef::staging_query("sample_team.sample_staging_query.v1"),
        sample_query(),
    )))
    .part(part.clone());
    assert!(validate("v1", &known, &registry(), &ValidationOptions::default()).is_ok());

    let unknown = Join::new(Source::Events(EventSource::new(
        TableRef::staging_query("sample_team.unknown_staging_query.v1"),
        sample_query(),
    )))
    .part(part);
    let report = validate("v1", &unknown, &registry(), &ValidationOptions::default());
    assert_eq!(report.issues[0].path, "left.events.table");
    assert!(matches!(
        report.issues[0].error,
        ValidationError::UnresolvedReference {
            kind: ReferenceKind::StagingQuery,
            ..
        }
    ));
    // Offline joins can still be normalized
    assert!(!report.is_fatal());
}

// ============================================================================
// Left source
// ============================================================================

#[test]
fn test_left_source_checks_are_collected() {
    let join = Join::new(Source::Events(EventSource::new(
        TableRef::literal("unqualified_table"),
        Query::new()
            .start_partition("2021-13-01")
            .select("bad column", "x"),
    )))
    .part(
        JoinPart::new("sample_team.sample_non_prod_group_by.v1")
            .key_mapping(KeyMapping::new().map("subject", "group_by_subject")),
    );

    let report = validate("v1", &join, &registry(), &ValidationOptions::default());
    let found = errors(&report);
    assert!(found.contains(&&ValidationError::InvalidTable {
        table: "unqualified_table".to_string()
    }));
    assert!(found.contains(&&ValidationError::InvalidDate {
        value: "2021-13-01".to_string()
    }));
    assert!(found.contains(&&ValidationError::InvalidIdentifier {
        name: "bad column".to_string()
    }));
}

#[test]
fn test_missing_start_partition() {
    let join = events_join(Query::new().select("subject", "subject_expr"))
        .part(JoinPart::new("sample_team.sample_non_prod_group_by.v1")
            .key_mapping(KeyMapping::new().map("subject", "group_by_subject")));

    let report = validate("v1", &join, &registry(), &ValidationOptions::default());
    assert_eq!(
        errors(&report),
        vec![&ValidationError::MissingField {
            field: "startPartition".to_string()
        }]
    );
}

#[test]
fn test_invalid_expression_is_a_warning() {
    let join = events_join(sample_query().select("event", "event_expr +"))
        .part(JoinPart::new("sample_team.sample_non_prod_group_by.v1")
            .key_mapping(KeyMapping::new().map("subject", "group_by_subject")));

    let report = validate("v1", &join, &registry(), &ValidationOptions::default());
    assert!(report.is_ok());
    let warning = report.warnings().next().unwrap();
    assert_eq!(warning.severity, Severity::Warning);
    assert_eq!(warning.path, "left.events.query.selects.event");

    let unchecked = ValidationOptions {
        check_expressions: false,
        ..ValidationOptions::default()
    };
    assert!(validate("v1", &join, &registry(), &unchecked).issues.is_empty());
}

#[test]
fn test_unresolved_group_by_still_checks_left_keys() {
    let mapping = KeyMapping::new().map("not_selected", "gb_key");
    let join = events_join(sample_query())
        .part(JoinPart::new("sample_team.missing_group_by.v1").key_mapping(mapping));

    let report = validate("v1", &join, &registry(), &ValidationOptions::default());
    let found: Vec<_> = report.issues.iter().map(|i| &i.error).collect();
    assert_eq!(
        found,
        vec![
            &ValidationError::UnknownLeftKey {
                key: "not_selected".to_string()
            },
            &ValidationError::UnresolvedReference {
                kind: ReferenceKind::GroupBy,
                name: "sample_team.missing_group_by.v1".to_string()
            },
        ]
    );
    assert_eq!(report.issues[0].path, "rightParts[0].keyMapping.not_selected");
}
