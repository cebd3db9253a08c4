//! Structural validation of join declarations.
//!
//! Validation never stops at the first problem: every issue in a declaration
//! is collected into a [`ValidationReport`] so they can be fixed together.
//! Checks cover:
//! - The left source (tables, partitions, selected columns, expressions)
//! - Right parts (non-empty, GroupBy references resolve, key mappings)
//! - Key coverage between the left source and each GroupBy
//! - Online/production consistency with the referenced GroupBys
//!
//! Key coverage problems are errors for online joins (when `strict_online` is
//! set) and warnings otherwise.

pub mod expr;

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Join, JoinPart, Query, Source, TableRef};
use crate::registry::ReferenceResolver;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

static QUALIFIED_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_]+(\.[A-Za-z0-9_]+)+$").expect("table pattern is valid")
});

/// Date format for partitions.
pub const PARTITION_FORMAT: &str = "%Y-%m-%d";

/// Issue severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// Kind of external definition a declaration refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    GroupBy,
    StagingQuery,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKind::GroupBy => write!(f, "GroupBy"),
            ReferenceKind::StagingQuery => write!(f, "staging query"),
        }
    }
}

/// A single problem found in a declaration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("rightParts is empty; a join needs at least one JoinPart")]
    EmptyRightParts,

    #[error("missing required field '{field}'")]
    MissingField { field: String },

    #[error("table '{table}' is not namespace-qualified (expected namespace.table)")]
    InvalidTable { table: String },

    #[error("'{value}' is not a valid partition date (expected YYYY-MM-DD)")]
    InvalidDate { value: String },

    #[error("endPartition {end} is before startPartition {start}")]
    PartitionOrder { start: String, end: String },

    #[error("'{name}' is not a valid identifier")]
    InvalidIdentifier { name: String },

    #[error("'{expr}' is not a valid SQL expression: {message}")]
    InvalidExpression { expr: String, message: String },

    #[error("unresolved {kind} reference '{name}'")]
    UnresolvedReference { kind: ReferenceKind, name: String },

    #[error("left key '{key}' is mapped more than once")]
    DuplicateKey { key: String },

    #[error("GroupBy key '{key}' is the target of more than one left key")]
    DuplicateTargetKey { key: String },

    #[error("key '{key}' maps to itself")]
    IdentityMapping { key: String },

    #[error("left key '{key}' is not selected by the left source")]
    UnknownLeftKey { key: String },

    #[error("'{key}' is not a key of GroupBy '{group_by}'")]
    UnknownRightKey { group_by: String, key: String },

    #[error("key '{key}' of GroupBy '{group_by}' is not covered by keyMapping or a left column")]
    UncoveredGroupByKey { group_by: String, key: String },

    #[error("online join includes offline GroupBy '{group_by}'")]
    OfflineGroupBy { group_by: String },

    #[error("production join includes non-production GroupBy '{group_by}'")]
    NonProductionGroupBy { group_by: String },

    #[error("JoinPart produces the same columns as rightParts[{first}], which takes precedence")]
    ConflictingOutputColumns { first: usize },

    #[error("samplePercent {value} is outside 0..=100")]
    InvalidSamplePercent { value: f64 },
}

/// A validation error located in a declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    /// Declaration name
    pub declaration: String,
    /// Field path within the declaration, e.g. `rightParts[0].keyMapping.subject`
    pub path: String,
    pub severity: Severity,
    pub error: ValidationError,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} at {}: {}",
            self.severity, self.declaration, self.path, self.error
        )
    }
}

/// All issues found in one declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub declaration: String,
    pub issues: Vec<ValidationIssue>,
    fatal: bool,
}

impl ValidationReport {
    /// Returns true if there are no errors (warnings are allowed).
    pub fn is_ok(&self) -> bool {
        !self.has_errors()
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    pub fn has_warnings(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }

    /// An online join references something that cannot be resolved, so it
    /// cannot be materialized at all.
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// Errors as a `Result`, discarding warnings.
    pub fn into_result(self) -> Result<(), Vec<ValidationIssue>> {
        let errors: Vec<_> = self
            .issues
            .into_iter()
            .filter(|i| i.severity == Severity::Error)
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Knobs for validation strictness.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOptions {
    /// Permit `keyMapping` entries such as `{ subject = "subject" }`
    pub allow_identity_mappings: bool,
    /// Key coverage problems are errors for online joins
    pub strict_online: bool,
    /// Parse select, where and time column expressions as SQL
    pub check_expressions: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            allow_identity_mappings: false,
            strict_online: true,
            check_expressions: true,
        }
    }
}

/// Validate one join declaration.
///
/// # Example
///
/// ```ignore
/// let report = validate("v1", &join, &registry, &ValidationOptions::default());
/// for issue in &report.issues {
///     eprintln!("{}", issue);
/// }
/// ```
pub fn validate(
    name: &str,
    join: &Join,
    resolver: &dyn ReferenceResolver,
    options: &ValidationOptions,
) -> ValidationReport {
    let mut validator = Validator {
        declaration: name,
        join,
        resolver,
        options,
        issues: Vec::new(),
        fatal: false,
    };
    validator.validate_join();

    ValidationReport {
        declaration: name.to_string(),
        issues: validator.issues,
        fatal: validator.fatal,
    }
}

/// Internal validator state that collects issues for one declaration.
struct Validator<'a> {
    declaration: &'a str,
    join: &'a Join,
    resolver: &'a dyn ReferenceResolver,
    options: &'a ValidationOptions,
    issues: Vec<ValidationIssue>,
    fatal: bool,
}

impl<'a> Validator<'a> {
    // ========================================================================
    // Issue helpers
    // ========================================================================

    fn push(&mut self, severity: Severity, path: impl Into<String>, error: ValidationError) {
        self.issues.push(ValidationIssue {
            declaration: self.declaration.to_string(),
            path: path.into(),
            severity,
            error,
        });
    }

    fn error(&mut self, path: impl Into<String>, error: ValidationError) {
        self.push(Severity::Error, path, error);
    }

    fn warning(&mut self, path: impl Into<String>, error: ValidationError) {
        self.push(Severity::Warning, path, error);
    }

    /// Errors for strict online joins, warnings otherwise.
    fn coverage(&mut self, path: impl Into<String>, error: ValidationError) {
        let severity = if self.join.online && self.options.strict_online {
            Severity::Error
        } else {
            Severity::Warning
        };
        self.push(severity, path, error);
    }

    fn unresolved(&mut self, path: impl Into<String>, kind: ReferenceKind, name: &str) {
        self.error(
            path,
            ValidationError::UnresolvedReference {
                kind,
                name: name.to_string(),
            },
        );
        if self.join.online {
            self.fatal = true;
        }
    }

    // ========================================================================
    // Join
    // ========================================================================

    fn validate_join(&mut self) {
        let join = self.join;
        self.validate_source(&join.left);

        if let Some(value) = join.meta.sample_percent {
            if !(0.0..=100.0).contains(&value) {
                self.error(
                    "metaData.samplePercent",
                    ValidationError::InvalidSamplePercent { value },
                );
            }
        }

        if join.right_parts.is_empty() {
            self.error("rightParts", ValidationError::EmptyRightParts);
            return;
        }

        let mut outputs: HashMap<(Option<&str>, &str), usize> = HashMap::new();
        for (i, part) in join.right_parts.iter().enumerate() {
            let path = format!("rightParts[{}]", i);
            self.validate_join_part(part, &path);

            let output = (part.prefix.as_deref(), part.group_by.name.as_str());
            if let Some(&first) = outputs.get(&output) {
                self.warning(path, ValidationError::ConflictingOutputColumns { first });
            } else {
                outputs.insert(output, i);
            }
        }
    }

    // ========================================================================
    // Left source
    // ========================================================================

    fn validate_source(&mut self, source: &Source) {
        match source {
            Source::Events(events) => {
                self.validate_table_ref(&events.table, "left.events.table");
                if events.query.start_partition.is_none() {
                    self.error(
                        "left.events.query",
                        ValidationError::MissingField {
                            field: "startPartition".to_string(),
                        },
                    );
                }
                self.validate_query(&events.query, "left.events.query");
            }
            Source::Entities(entities) => {
                self.validate_table_ref(&entities.snapshot_table, "left.entities.snapshotTable");
                if let Some(mutation_table) = &entities.mutation_table {
                    self.validate_table_ref(mutation_table, "left.entities.mutationTable");
                }
                self.validate_query(&entities.query, "left.entities.query");
            }
        }
    }

    fn validate_table_ref(&mut self, table: &TableRef, path: &str) {
        match table {
            TableRef::Literal(name) => {
                if !QUALIFIED_TABLE.is_match(name) {
                    self.error(
                        path,
                        ValidationError::InvalidTable {
                            table: name.clone(),
                        },
                    );
                }
            }
            TableRef::StagingQuery(name) => {
                if self.resolver.staging_query(name).is_none() {
                    self.unresolved(path, ReferenceKind::StagingQuery, name);
                }
            }
        }
    }

    fn validate_query(&mut self, query: &Query, path: &str) {
        let start = self.validate_partition(query.start_partition.as_deref(), path, "startPartition");
        let end = self.validate_partition(query.end_partition.as_deref(), path, "endPartition");
        if let (Some(start), Some(end)) = (start, end) {
            if end < start {
                self.error(
                    format!("{}.endPartition", path),
                    ValidationError::PartitionOrder {
                        start: start.to_string(),
                        end: end.to_string(),
                    },
                );
            }
        }

        for (column, expr) in &query.selects {
            let column_path = format!("{}.selects.{}", path, column);
            if !IDENTIFIER.is_match(column) {
                self.error(
                    column_path.clone(),
                    ValidationError::InvalidIdentifier {
                        name: column.clone(),
                    },
                );
            }
            self.check_expression(expr, column_path);
        }

        for (i, predicate) in query.wheres.iter().enumerate() {
            self.check_expression(predicate, format!("{}.wheres[{}]", path, i));
        }

        if let Some(time_column) = &query.time_column {
            self.check_expression(time_column, format!("{}.timeColumn", path));
        }
    }

    fn validate_partition(
        &mut self,
        value: Option<&str>,
        path: &str,
        field: &str,
    ) -> Option<NaiveDate> {
        let value = value?;
        match NaiveDate::parse_from_str(value, PARTITION_FORMAT) {
            Ok(date) => Some(date),
            Err(_) => {
                self.error(
                    format!("{}.{}", path, field),
                    ValidationError::InvalidDate {
                        value: value.to_string(),
                    },
                );
                None
            }
        }
    }

    fn check_expression(&mut self, raw: &str, path: String) {
        if !self.options.check_expressions {
            return;
        }
        if let Err(message) = expr::check_expression(raw) {
            self.warning(
                path,
                ValidationError::InvalidExpression {
                    expr: raw.to_string(),
                    message,
                },
            );
        }
    }

    // ========================================================================
    // Right parts
    // ========================================================================

    fn validate_join_part(&mut self, part: &JoinPart, path: &str) {
        if let Some(prefix) = &part.prefix {
            if !IDENTIFIER.is_match(prefix) {
                self.error(
                    format!("{}.prefix", path),
                    ValidationError::InvalidIdentifier {
                        name: prefix.clone(),
                    },
                );
            }
        }

        self.validate_key_mapping(part, path);

        let join = self.join;
        let resolver = self.resolver;
        let left = join.left.query();
        // No selects means every left column passes through, so nothing to check against
        let left_known = !left.selects.is_empty();

        if left_known {
            for (left_key, _) in part.key_mapping.pairs() {
                if !left.has_column(left_key) {
                    self.coverage(
                        format!("{}.keyMapping.{}", path, left_key),
                        ValidationError::UnknownLeftKey {
                            key: left_key.clone(),
                        },
                    );
                }
            }
        }

        let group_by_name = part.group_by.name.as_str();
        let Some(group_by) = resolver.group_by(group_by_name) else {
            self.unresolved(
                format!("{}.group_by", path),
                ReferenceKind::GroupBy,
                group_by_name,
            );
            return;
        };

        if join.online && !group_by.online {
            self.error(
                format!("{}.group_by", path),
                ValidationError::OfflineGroupBy {
                    group_by: group_by_name.to_string(),
                },
            );
        }
        if join.production && !group_by.production {
            self.error(
                format!("{}.group_by", path),
                ValidationError::NonProductionGroupBy {
                    group_by: group_by_name.to_string(),
                },
            );
        }

        for (left_key, right_key) in part.key_mapping.pairs() {
            if !group_by.keys.contains(right_key) {
                self.coverage(
                    format!("{}.keyMapping.{}", path, left_key),
                    ValidationError::UnknownRightKey {
                        group_by: group_by_name.to_string(),
                        key: right_key.clone(),
                    },
                );
            }
        }

        for key in &group_by.keys {
            let covered = part.key_mapping.maps_to(key) || !left_known || left.has_column(key);
            if !covered {
                self.coverage(
                    format!("{}.keyMapping", path),
                    ValidationError::UncoveredGroupByKey {
                        group_by: group_by_name.to_string(),
                        key: key.clone(),
                    },
                );
            }
        }
    }

    fn validate_key_mapping(&mut self, part: &JoinPart, path: &str) {
        let mut left_counts: HashMap<&str, usize> = HashMap::new();
        let mut right_counts: HashMap<&str, usize> = HashMap::new();

        for (left, right) in part.key_mapping.pairs() {
            let key_path = format!("{}.keyMapping.{}", path, left);

            let seen_left = left_counts.entry(left.as_str()).or_insert(0);
            *seen_left += 1;
            if *seen_left == 2 {
                self.error(
                    key_path.clone(),
                    ValidationError::DuplicateKey { key: left.clone() },
                );
            }

            let seen_right = right_counts.entry(right.as_str()).or_insert(0);
            *seen_right += 1;
            if *seen_right == 2 {
                self.error(
                    key_path.clone(),
                    ValidationError::DuplicateTargetKey { key: right.clone() },
                );
            }

            if left == right && !self.options.allow_identity_mappings {
                self.error(key_path, ValidationError::IdentityMapping { key: left.clone() });
            }
        }
    }
}
