//! Normalized, serializable join descriptors.
//!
//! A [`JoinDescriptor`] is the flat form of a [`Join`] handed to the external
//! compiler: tables resolved, whitespace trimmed, key mappings sorted, right
//! parts kept in declaration order.
//!
//! Normalization is idempotent. Converting a descriptor back with
//! [`JoinDescriptor::to_join`] and normalizing again yields an equal descriptor.

pub mod hash;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{
    EntitySource, EventSource, GroupByRef, Join, JoinPart, KeyMapping, MetaData, Query, Source,
    TableRef,
};
use crate::registry::ReferenceResolver;
use hash::ContentHasher;

/// Left source variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Events,
    Entities,
}

/// A resolved table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Physical table name; `None` when a staging query could not be resolved
    pub name: Option<String>,
    /// Staging query the table is the output of
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_query: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub start_partition: Option<String>,
    pub end_partition: Option<String>,
    pub selects: BTreeMap<String, String>,
    pub wheres: Vec<String>,
    pub time_column: Option<String>,
    pub setups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeftDescriptor {
    pub kind: SourceKind,
    pub table: TableDescriptor,
    pub topic: Option<String>,
    pub is_cumulative: bool,
    pub mutation_table: Option<TableDescriptor>,
    pub mutation_topic: Option<String>,
    pub query: QueryDescriptor,
}

impl LeftDescriptor {
    /// The resolved primary table name.
    pub fn table_name(&self) -> Option<&str> {
        self.table.name.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RightPartDescriptor {
    pub group_by: String,
    /// Left column to GroupBy key, sorted by left column
    pub key_mapping: BTreeMap<String, String>,
    pub prefix: Option<String>,
    pub semantic_hash: String,
}

/// Flattened join handed to downstream compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinDescriptor {
    pub name: String,
    pub team: Option<String>,
    pub online: bool,
    pub production: bool,
    pub output_namespace: Option<String>,
    pub sample_percent: Option<f64>,
    pub left: LeftDescriptor,
    /// Declaration order
    pub right_parts: Vec<RightPartDescriptor>,
    /// Hash of everything that affects computed data. Name, team, output
    /// namespace and the online/production flags are excluded.
    pub semantic_hash: String,
}

/// Flatten a join into its descriptor.
pub fn normalize(name: &str, join: &Join, resolver: &dyn ReferenceResolver) -> JoinDescriptor {
    let left = normalize_source(&join.left, resolver);
    let right_parts: Vec<RightPartDescriptor> =
        join.right_parts.iter().map(normalize_part).collect();

    let mut hasher = ContentHasher::new();
    hash_left(&mut hasher, &left);
    hasher.count(right_parts.len());
    for part in &right_parts {
        hasher.str(&part.semantic_hash);
    }
    hasher.opt(join.meta.sample_percent.map(|v| v.to_string()).as_deref());

    JoinDescriptor {
        name: name.trim().to_string(),
        team: trimmed(join.meta.team.as_deref()),
        online: join.online,
        production: join.production,
        output_namespace: trimmed(join.meta.output_namespace.as_deref()),
        sample_percent: join.meta.sample_percent,
        left,
        right_parts,
        semantic_hash: hasher.finish(),
    }
}

fn trimmed(value: Option<&str>) -> Option<String> {
    value.map(|v| v.trim().to_string())
}

fn trim_all(values: &[String]) -> Vec<String> {
    values.iter().map(|v| v.trim().to_string()).collect()
}

fn resolve_table(table: &TableRef, resolver: &dyn ReferenceResolver) -> TableDescriptor {
    match table {
        TableRef::Literal(name) => TableDescriptor {
            name: Some(name.trim().to_string()),
            staging_query: None,
        },
        TableRef::StagingQuery(query) => {
            let query = query.trim();
            TableDescriptor {
                name: resolver.staging_query_output_table(query),
                staging_query: Some(query.to_string()),
            }
        }
    }
}

fn normalize_query(query: &Query) -> QueryDescriptor {
    QueryDescriptor {
        start_partition: trimmed(query.start_partition.as_deref()),
        end_partition: trimmed(query.end_partition.as_deref()),
        selects: query
            .selects
            .iter()
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect(),
        wheres: trim_all(&query.wheres),
        time_column: trimmed(query.time_column.as_deref()),
        setups: trim_all(&query.setups),
    }
}

fn normalize_source(source: &Source, resolver: &dyn ReferenceResolver) -> LeftDescriptor {
    match source {
        Source::Events(events) => LeftDescriptor {
            kind: SourceKind::Events,
            table: resolve_table(&events.table, resolver),
            topic: trimmed(events.topic.as_deref()),
            is_cumulative: events.is_cumulative,
            mutation_table: None,
            mutation_topic: None,
            query: normalize_query(&events.query),
        },
        Source::Entities(entities) => LeftDescriptor {
            kind: SourceKind::Entities,
            table: resolve_table(&entities.snapshot_table, resolver),
            topic: None,
            is_cumulative: false,
            mutation_table: entities
                .mutation_table
                .as_ref()
                .map(|t| resolve_table(t, resolver)),
            mutation_topic: trimmed(entities.mutation_topic.as_deref()),
            query: normalize_query(&entities.query),
        },
    }
}

fn normalize_part(part: &JoinPart) -> RightPartDescriptor {
    let group_by = part.group_by.name.trim().to_string();
    let key_mapping: BTreeMap<String, String> = part
        .key_mapping
        .pairs()
        .iter()
        .map(|(l, r)| (l.trim().to_string(), r.trim().to_string()))
        .collect();
    let prefix = trimmed(part.prefix.as_deref());

    let mut hasher = ContentHasher::new();
    hasher.str(&group_by).opt(prefix.as_deref());
    hasher.count(key_mapping.len());
    for (left, right) in &key_mapping {
        hasher.str(left).str(right);
    }

    RightPartDescriptor {
        group_by,
        key_mapping,
        prefix,
        semantic_hash: hasher.finish(),
    }
}

fn hash_table(hasher: &mut ContentHasher, table: &TableDescriptor) {
    hasher
        .opt(table.name.as_deref())
        .opt(table.staging_query.as_deref());
}

fn hash_left(hasher: &mut ContentHasher, left: &LeftDescriptor) {
    hasher.flag(left.kind == SourceKind::Entities);
    hash_table(hasher, &left.table);
    hasher.opt(left.topic.as_deref()).flag(left.is_cumulative);
    hasher.flag(left.mutation_table.is_some());
    if let Some(table) = &left.mutation_table {
        hash_table(hasher, table);
    }
    hasher.opt(left.mutation_topic.as_deref());

    let query = &left.query;
    hasher
        .opt(query.start_partition.as_deref())
        .opt(query.end_partition.as_deref())
        .opt(query.time_column.as_deref());
    hasher.count(query.selects.len());
    for (column, expr) in &query.selects {
        hasher.str(column).str(expr);
    }
    hasher.count(query.wheres.len());
    for predicate in &query.wheres {
        hasher.str(predicate);
    }
    hasher.count(query.setups.len());
    for setup in &query.setups {
        hasher.str(setup);
    }
}

impl TableDescriptor {
    fn to_table_ref(&self) -> TableRef {
        match &self.staging_query {
            Some(query) => TableRef::StagingQuery(query.clone()),
            None => TableRef::Literal(self.name.clone().unwrap_or_default()),
        }
    }
}

impl QueryDescriptor {
    fn to_query(&self) -> Query {
        Query {
            start_partition: self.start_partition.clone(),
            end_partition: self.end_partition.clone(),
            selects: self.selects.clone(),
            wheres: self.wheres.clone(),
            time_column: self.time_column.clone(),
            setups: self.setups.clone(),
        }
    }
}

impl JoinDescriptor {
    /// Rebuild a join equivalent to the one this descriptor was made from.
    pub fn to_join(&self) -> Join {
        let query = self.left.query.to_query();
        let left = match self.left.kind {
            SourceKind::Events => Source::Events(EventSource {
                table: self.left.table.to_table_ref(),
                topic: self.left.topic.clone(),
                query,
                is_cumulative: self.left.is_cumulative,
            }),
            SourceKind::Entities => Source::Entities(EntitySource {
                snapshot_table: self.left.table.to_table_ref(),
                mutation_table: self
                    .left
                    .mutation_table
                    .as_ref()
                    .map(TableDescriptor::to_table_ref),
                mutation_topic: self.left.mutation_topic.clone(),
                query,
            }),
        };

        let right_parts = self
            .right_parts
            .iter()
            .map(|part| JoinPart {
                group_by: GroupByRef::new(part.group_by.clone()),
                key_mapping: part
                    .key_mapping
                    .iter()
                    .map(|(l, r)| (l.clone(), r.clone()))
                    .collect::<KeyMapping>(),
                prefix: part.prefix.clone(),
            })
            .collect();

        Join {
            left,
            right_parts,
            online: self.online,
            production: self.production,
            meta: MetaData {
                name: Some(self.name.clone()),
                team: self.team.clone(),
                output_namespace: self.output_namespace.clone(),
                sample_percent: self.sample_percent,
            },
        }
    }

    /// Normalize this descriptor again.
    pub fn renormalize(&self, resolver: &dyn ReferenceResolver) -> JoinDescriptor {
        normalize(&self.name, &self.to_join(), resolver)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
