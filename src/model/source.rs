// src/model/source.rs
use super::query::Query;

/// A table a source reads from.
#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    /// A fully-qualified `namespace.table` name
    Literal(String),
    /// The output table of a named staging query, resolved through the registry
    StagingQuery(String),
}

impl TableRef {
    pub fn literal(name: impl Into<String>) -> Self {
        TableRef::Literal(name.into())
    }

    pub fn staging_query(name: impl Into<String>) -> Self {
        TableRef::StagingQuery(name.into())
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableRef::Literal(name) => write!(f, "{}", name),
            TableRef::StagingQuery(name) => write!(f, "staging_query({})", name),
        }
    }
}

/// Append-only event data, optionally mirrored to a stream topic.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSource {
    pub table: TableRef,
    pub topic: Option<String>,
    pub query: Query,
    /// Each partition holds the full history rather than one day of events
    pub is_cumulative: bool,
}

impl EventSource {
    pub fn new(table: TableRef, query: Query) -> Self {
        Self {
            table,
            topic: None,
            query,
            is_cumulative: false,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn cumulative(mut self) -> Self {
        self.is_cumulative = true;
        self
    }
}

/// Daily snapshots of an entity table, with optional mutation capture.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySource {
    pub snapshot_table: TableRef,
    pub mutation_table: Option<TableRef>,
    pub mutation_topic: Option<String>,
    pub query: Query,
}

impl EntitySource {
    pub fn new(snapshot_table: TableRef, query: Query) -> Self {
        Self {
            snapshot_table,
            mutation_table: None,
            mutation_topic: None,
            query,
        }
    }

    pub fn with_mutations(mut self, table: TableRef, topic: Option<String>) -> Self {
        self.mutation_table = Some(table);
        self.mutation_topic = topic;
        self
    }
}

/// Where the left side of a join comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Events(EventSource),
    Entities(EntitySource),
}

impl Source {
    /// Lowercase variant name, as written in declarations.
    pub fn kind(&self) -> &'static str {
        match self {
            Source::Events(_) => "events",
            Source::Entities(_) => "entities",
        }
    }

    pub fn query(&self) -> &Query {
        match self {
            Source::Events(events) => &events.query,
            Source::Entities(entities) => &entities.query,
        }
    }

    /// The primary table: the event table or the entity snapshot table.
    pub fn table(&self) -> &TableRef {
        match self {
            Source::Events(events) => &events.table,
            Source::Entities(entities) => &entities.snapshot_table,
        }
    }
}
