#[cfg(test)]
mod tests {
    use joindecl::model::{
        Declarations, EntitySource, EventSource, Join, JoinPart, KeyMapping, Query, Source,
        TableRef,
    };

    fn sample_query() -> Query {
        Query::new()
            .start_partition("2021-03-01")
            .select("subject", "subject_expr")
            .select("event", "event_expr")
            .time_column("UNIX_TIMESTAMP(ts) * 1000")
    }

    #[test]
    fn test_query_builder() {
        let query = sample_query().filter("event IS NOT NULL").setup("SET x = 1");

        assert_eq!(query.start_partition.as_deref(), Some("2021-03-01"));
        assert!(query.end_partition.is_none());
        assert_eq!(query.wheres, vec!["event IS NOT NULL"]);
        assert_eq!(query.setups, vec!["SET x = 1"]);
        assert!(query.has_column("subject"));
        assert!(!query.has_column("ts"));

        // Selects are keyed, so output columns come back sorted
        let columns: Vec<_> = query.output_columns().collect();
        assert_eq!(columns, vec!["event", "subject"]);
    }

    #[test]
    fn test_event_source() {
        let source = Source::Events(
            EventSource::new(TableRef::literal("sample_namespace.sample_table"), sample_query())
                .with_topic("sample_topic")
                .cumulative(),
        );

        assert_eq!(source.kind(), "events");
        assert_eq!(source.table().to_string(), "sample_namespace.sample_table");
        assert!(source.query().has_column("event"));

        let Source::Events(events) = source else {
            panic!("expected events");
        };
        assert_eq!(events.topic.as_deref(), Some("sample_topic"));
        assert!(events.is_cumulative);
    }

    #[test]
    fn test_entity_source() {
        let source = Source::Entities(
            EntitySource::new(
                TableRef::staging_query("sample_team.sample_staging_query.v1"),
                Query::new(),
            )
            .with_mutations(
                TableRef::literal("sample_namespace.mutations"),
                Some("mutation_topic".to_string()),
            ),
        );

        assert_eq!(source.kind(), "entities");
        assert_eq!(
            source.table().to_string(),
            "staging_query(sample_team.sample_staging_query.v1)"
        );

        let Source::Entities(entities) = source else {
            panic!("expected entities");
        };
        assert_eq!(
            entities.mutation_table,
            Some(TableRef::literal("sample_namespace.mutations"))
        );
        assert_eq!(entities.mutation_topic.as_deref(), Some("mutation_topic"));
    }

    #[test]
    fn test_key_mapping_keeps_every_pair() {
        let mapping = KeyMapping::new()
            .map("subject", "group_by_subject")
            .map("user", "group_by_subject");

        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping.right_for("user"), Some("group_by_subject"));
        assert!(mapping.maps_to("group_by_subject"));
        assert!(!mapping.maps_to("subject"));
        assert_eq!(mapping.right_for("missing"), None);
    }

    #[test]
    fn test_key_mapping_from_iter() {
        let mapping: KeyMapping = [("subject", "group_by_subject")].into_iter().collect();
        assert_eq!(
            mapping.pairs(),
            &[("subject".to_string(), "group_by_subject".to_string())]
        );
        assert!(KeyMapping::new().is_empty());
    }

    #[test]
    fn test_join_builder_preserves_part_order() {
        let join = Join::new(Source::Events(EventSource::new(
            TableRef::literal("sample_namespace.sample_table"),
            sample_query(),
        )))
        .part(JoinPart::new("b.group_by.v1"))
        .part(JoinPart::new("a.group_by.v1").prefix("a"))
        .online(true)
        .team("sample_team");

        let names: Vec<_> = join
            .right_parts
            .iter()
            .map(|p| p.group_by.name.as_str())
            .collect();
        assert_eq!(names, vec!["b.group_by.v1", "a.group_by.v1"]);
        assert_eq!(join.right_parts[1].prefix.as_deref(), Some("a"));
        assert!(join.online);
        assert!(!join.production);
        assert_eq!(join.meta.team.as_deref(), Some("sample_team"));
    }

    #[test]
    fn test_declarations_lookup() {
        let join = Join::new(Source::Events(EventSource::new(
            TableRef::literal("sample_namespace.sample_table"),
            Query::new(),
        )));

        let mut declarations = Declarations::new("joins/sample_team/unit.lua");
        assert!(declarations.is_empty());
        declarations.joins.push(("v1".to_string(), join.clone()));

        assert_eq!(declarations.len(), 1);
        assert_eq!(declarations.get("v1"), Some(&join));
        assert!(declarations.get("v2").is_none());
        assert_eq!(declarations.names().collect::<Vec<_>>(), vec!["v1"]);
    }
}
