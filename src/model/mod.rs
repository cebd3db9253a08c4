//! Join declaration value types.
//!
//! Everything here is plain data: built once by the loader (or by hand in
//! tests), then only read by validation and normalization.

pub mod join;
pub mod query;
pub mod source;

pub use join::{GroupByRef, Join, JoinPart, KeyMapping, MetaData};
pub use query::Query;
pub use source::{EntitySource, EventSource, Source, TableRef};

/// The joins exported by one configuration unit, keyed by binding name.
#[derive(Debug, Clone, Default)]
pub struct Declarations {
    /// Path or label of the unit the joins came from
    pub unit: String,
    /// `(binding name, join)` sorted by binding name
    pub joins: Vec<(String, Join)>,
}

impl Declarations {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            joins: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Join> {
        self.joins.iter().find(|(n, _)| n == name).map(|(_, j)| j)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.joins.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }
}

impl IntoIterator for Declarations {
    type Item = (String, Join);
    type IntoIter = std::vec::IntoIter<(String, Join)>;

    fn into_iter(self) -> Self::IntoIter {
        self.joins.into_iter()
    }
}
