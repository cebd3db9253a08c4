// src/model/query.rs
use std::collections::BTreeMap;

/// Column selection and partition range read from a source table.
///
/// `selects` maps output column name to a SQL expression over the source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    /// First partition to read (`YYYY-MM-DD`)
    pub start_partition: Option<String>,
    /// Last partition to read, inclusive
    pub end_partition: Option<String>,
    pub selects: BTreeMap<String, String>,
    /// Filter predicates, ANDed together
    pub wheres: Vec<String>,
    /// Expression yielding event time in epoch milliseconds
    pub time_column: Option<String>,
    /// Statements run before the query (UDF registration etc.)
    pub setups: Vec<String>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_partition(mut self, partition: impl Into<String>) -> Self {
        self.start_partition = Some(partition.into());
        self
    }

    pub fn end_partition(mut self, partition: impl Into<String>) -> Self {
        self.end_partition = Some(partition.into());
        self
    }

    pub fn select(mut self, column: impl Into<String>, expr: impl Into<String>) -> Self {
        self.selects.insert(column.into(), expr.into());
        self
    }

    pub fn filter(mut self, predicate: impl Into<String>) -> Self {
        self.wheres.push(predicate.into());
        self
    }

    pub fn time_column(mut self, expr: impl Into<String>) -> Self {
        self.time_column = Some(expr.into());
        self
    }

    pub fn setup(mut self, statement: impl Into<String>) -> Self {
        self.setups.push(statement.into());
        self
    }

    /// Output column names, in sorted order.
    pub fn output_columns(&self) -> impl Iterator<Item = &str> {
        self.selects.keys().map(String::as_str)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.selects.contains_key(column)
    }
}
