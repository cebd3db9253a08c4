//! Tests for loading join declarations from Lua units.

#[cfg(test)]
mod tests {
    use joindecl::loader::{extract_bindings_regex, load, load_from_str, LoadError};
    use joindecl::model::{Source, TableRef};
    use std::path::{Path, PathBuf};

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    #[test]
    fn test_load_unit_with_import() {
        let declarations =
            load(&fixture("joins/sample_team/sample_join_from_module.lua")).unwrap();

        assert_eq!(declarations.len(), 1);
        let join = declarations.get("v1").unwrap();

        assert!(join.online);
        assert_eq!(
            join.left.table(),
            &TableRef::literal("sample_namespace.sample_table_skipped")
        );

        let query = join.left.query();
        assert_eq!(query.start_partition.as_deref(), Some("2021-03-01"));
        assert_eq!(query.selects.get("subject").map(String::as_str), Some("subject_expr"));
        assert_eq!(query.selects.get("event").map(String::as_str), Some("event_expr"));
        assert_eq!(query.time_column.as_deref(), Some("UNIX_TIMESTAMP(ts) * 1000"));

        assert_eq!(join.right_parts.len(), 1);
        let part = &join.right_parts[0];
        assert_eq!(part.group_by.name, "sample_team.sample_non_prod_group_by.v1");
        assert_eq!(part.key_mapping.right_for("subject"), Some("group_by_subject"));

        assert_eq!(join.meta.team.as_deref(), Some("sample_team"));
        assert_eq!(
            join.meta.name.as_deref(),
            Some("sample_team.sample_join_from_module.v1")
        );
    }

    #[test]
    fn test_load_entity_source_with_staging_table() {
        let declarations = load(&fixture("joins/sample_team/sample_staging_join.lua")).unwrap();
        let join = declarations.get("v1").unwrap();

        let Source::Entities(entities) = &join.left else {
            panic!("expected entities, got {:?}", join.left);
        };
        assert_eq!(
            entities.snapshot_table,
            TableRef::staging_query("sample_team.sample_staging_query.v1")
        );
        assert!(entities.mutation_table.is_none());

        // Plain strings are accepted for group_by as well as group_by("...")
        assert_eq!(
            join.right_parts[1].group_by.name,
            "sample_team.event_sample_group_by.v1"
        );
        assert_eq!(join.right_parts[0].prefix.as_deref(), Some("user"));
        assert_eq!(join.meta.output_namespace.as_deref(), Some("sample_output"));
        assert!(!join.online);
    }

    #[test]
    fn test_load_missing_file() {
        let result = load(Path::new("joins/no_such_unit.lua"));
        assert!(matches!(result, Err(LoadError::FileNotFound { .. })));
    }

    #[test]
    fn test_load_unsupported_extension() {
        let result = load(&fixture("registry.toml"));
        assert!(
            matches!(result, Err(LoadError::UnsupportedExtension { ref extension }) if extension == "toml"),
            "{:?}",
            result
        );
    }

    #[test]
    fn test_missing_import_is_a_lua_error() {
        let result = load_from_str(
            r#"local q = import("nowhere.lua") return {}"#,
            "joins/sample_team/unit.lua",
        );
        match result {
            Err(LoadError::Lua { message, .. }) => {
                assert!(message.contains("nowhere.lua"), "{}", message)
            }
            other => panic!("expected Lua error, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_import_resolves_from_importing_file() {
        // sample_query.lua imports its sibling sample_selects.lua
        let declarations =
            load(&fixture("joins/sample_team/sample_join_from_module.lua")).unwrap();
        let query = declarations.get("v1").unwrap().left.query();

        let selects: Vec<_> = query.selects.keys().map(String::as_str).collect();
        assert_eq!(selects, vec!["event", "subject"]);
    }

    #[test]
    fn test_circular_import_is_a_lua_error() {
        let result = load(&fixture("cycle/a.lua"));
        match result {
            Err(LoadError::Lua { message, .. }) => {
                assert!(message.contains("Circular import"), "{}", message)
            }
            other => panic!("expected Lua error, got {:?}", other),
        }
    }

    #[test]
    fn test_source_without_variant_reports_path() {
        let result = load_from_str(
            "return { v1 = Join { left = Source {}, rightParts = {} } }",
            "joins/sample_team/unit.lua",
        );
        match result {
            Err(LoadError::InvalidDeclaration { name, path, message, .. }) => {
                assert_eq!(name, "v1");
                assert_eq!(path, "v1.left");
                assert!(message.contains("found none"), "{}", message);
            }
            other => panic!("expected InvalidDeclaration, got {:?}", other),
        }
    }

    #[test]
    fn test_string_flag_is_rejected() {
        let result = load_from_str(
            r#"
return {
    v1 = Join {
        left = EventSource { table = "ns.a", query = Query {} },
        online = "false",
    },
}
"#,
            "joins/sample_team/unit.lua",
        );
        match result {
            Err(LoadError::InvalidDeclaration { path, message, .. }) => {
                assert_eq!(path, "v1.online");
                assert!(message.contains("expected a boolean"), "{}", message);
            }
            other => panic!("expected InvalidDeclaration, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_left_reports_path() {
        let result = load_from_str(
            "return { v1 = Join { rightParts = {} } }",
            "joins/sample_team/unit.lua",
        );
        match result {
            Err(LoadError::InvalidDeclaration { name, path, .. }) => {
                assert_eq!(name, "v1");
                assert_eq!(path, "v1.left");
            }
            other => panic!("expected InvalidDeclaration, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_unit() {
        let declarations = load_from_str("return {}", "joins/sample_team/unit.lua").unwrap();
        assert!(declarations.is_empty());
        assert_eq!(declarations.unit, "joins/sample_team/unit.lua");
    }

    #[test]
    fn test_extract_bindings_regex() {
        let source = r#"
local shared = import("shared.lua")
v1 = Join {
    left = broken(
}
  local v2 = Join({})
notajoin = JoinPart {}
"#;
        let bindings = extract_bindings_regex(source);
        let names: Vec<_> = bindings.iter().map(|b| (b.name.as_str(), b.line)).collect();
        assert_eq!(names, vec![("v1", 3), ("v2", 6)]);
    }
}
