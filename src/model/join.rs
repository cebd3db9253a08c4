// src/model/join.rs
use super::source::Source;

/// Reference to a GroupBy defined outside the configuration unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupByRef {
    pub name: String,
}

impl GroupByRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Left key column to GroupBy key column pairs, in declaration order.
///
/// Stored as pairs rather than a map so duplicates survive construction and can
/// be reported by validation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeyMapping {
    pairs: Vec<(String, String)>,
}

impl KeyMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.pairs.push((left.into(), right.into()));
        self
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// The GroupBy key a left column maps to (first match wins).
    pub fn right_for(&self, left: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(l, _)| l == left)
            .map(|(_, r)| r.as_str())
    }

    pub fn maps_to(&self, right: &str) -> bool {
        self.pairs.iter().any(|(_, r)| r == right)
    }
}

impl<L: Into<String>, R: Into<String>> FromIterator<(L, R)> for KeyMapping {
    fn from_iter<I: IntoIterator<Item = (L, R)>>(iter: I) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(l, r)| (l.into(), r.into()))
                .collect(),
        }
    }
}

/// One right-hand contribution to a join.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinPart {
    pub group_by: GroupByRef,
    pub key_mapping: KeyMapping,
    /// Prepended to the GroupBy's output columns
    pub prefix: Option<String>,
}

impl JoinPart {
    pub fn new(group_by: impl Into<String>) -> Self {
        Self {
            group_by: GroupByRef::new(group_by),
            key_mapping: KeyMapping::new(),
            prefix: None,
        }
    }

    pub fn key_mapping(mut self, mapping: KeyMapping) -> Self {
        self.key_mapping = mapping;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

/// Ownership and output placement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetaData {
    /// Fully-qualified name (`team.unit.binding`), assigned by the loader
    pub name: Option<String>,
    pub team: Option<String>,
    pub output_namespace: Option<String>,
    /// Fraction of left rows to sample, 0-100
    pub sample_percent: Option<f64>,
}

/// A left source enriched with one or more GroupBys.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub left: Source,
    /// Order decides output column precedence on conflicts
    pub right_parts: Vec<JoinPart>,
    /// Materialized for low-latency serving, not just batch
    pub online: bool,
    pub production: bool,
    pub meta: MetaData,
}

impl Join {
    pub fn new(left: Source) -> Self {
        Self {
            left,
            right_parts: Vec::new(),
            online: false,
            production: false,
            meta: MetaData::default(),
        }
    }

    pub fn part(mut self, part: JoinPart) -> Self {
        self.right_parts.push(part);
        self
    }

    pub fn online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    pub fn production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    pub fn team(mut self, team: impl Into<String>) -> Self {
        self.meta.team = Some(team.into());
        self
    }
}
