//! Lookup of definitions that live outside a configuration unit.
//!
//! Joins name their GroupBys and staging queries; they never import them. The
//! validator and normalizer receive a [`ReferenceResolver`] instead, which keeps
//! resolution deterministic and lets tests build a registry inline.
//!
//! A registry can be loaded from TOML:
//!
//! ```toml
//! [group_bys."sample_team.sample_non_prod_group_by.v1"]
//! keys = ["group_by_subject"]
//! online = true
//! production = false
//!
//! [staging_queries."sample_team.sample_staging_query.v1"]
//! output_namespace = "sample_namespace"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for registry loading.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Registry file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read registry file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse registry file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("GroupBy '{0}' declares no key columns")]
    NoKeys(String),
}

/// An externally defined GroupBy, as far as joins care about it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GroupByDef {
    #[serde(skip)]
    pub name: String,
    /// Key columns the GroupBy is aggregated by
    pub keys: Vec<String>,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub production: bool,
}

impl GroupByDef {
    pub fn new<I, S>(name: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            keys: keys.into_iter().map(Into::into).collect(),
            online: false,
            production: false,
        }
    }

    pub fn online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    pub fn production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }
}

/// An externally executed staging query whose output a source may read.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StagingQueryDef {
    #[serde(skip)]
    pub name: String,
    pub output_namespace: String,
}

impl StagingQueryDef {
    pub fn new(name: impl Into<String>, output_namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output_namespace: output_namespace.into(),
        }
    }

    /// `namespace.sanitized_name`, where every non-alphanumeric character of
    /// the name becomes `_`.
    pub fn output_table(&self) -> String {
        format!("{}.{}", self.output_namespace, sanitize(&self.name))
    }
}

/// Replace every character that is not ASCII alphanumeric with `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Resolves names referenced by join declarations.
pub trait ReferenceResolver {
    fn group_by(&self, name: &str) -> Option<&GroupByDef>;

    fn staging_query(&self, name: &str) -> Option<&StagingQueryDef>;

    /// Output table of a staging query, if it is known.
    fn staging_query_output_table(&self, name: &str) -> Option<String> {
        self.staging_query(name).map(StagingQueryDef::output_table)
    }
}

/// In-memory registry of GroupBy and staging query definitions.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Registry {
    group_bys: BTreeMap<String, GroupByDef>,
    staging_queries: BTreeMap<String, StagingQueryDef>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a registry from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RegistryError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse a registry from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, RegistryError> {
        let mut registry: Registry = toml::from_str(content)?;

        // Table keys carry the names
        for (name, def) in registry.group_bys.iter_mut() {
            if def.keys.is_empty() {
                return Err(RegistryError::NoKeys(name.clone()));
            }
            def.name = name.clone();
        }
        for (name, def) in registry.staging_queries.iter_mut() {
            def.name = name.clone();
        }

        Ok(registry)
    }

    pub fn with_group_by(mut self, def: GroupByDef) -> Self {
        self.add_group_by(def);
        self
    }

    pub fn with_staging_query(mut self, def: StagingQueryDef) -> Self {
        self.add_staging_query(def);
        self
    }

    pub fn add_group_by(&mut self, def: GroupByDef) {
        self.group_bys.insert(def.name.clone(), def);
    }

    pub fn add_staging_query(&mut self, def: StagingQueryDef) {
        self.staging_queries.insert(def.name.clone(), def);
    }

    pub fn group_by_names(&self) -> impl Iterator<Item = &str> {
        self.group_bys.keys().map(String::as_str)
    }

    pub fn staging_query_names(&self) -> impl Iterator<Item = &str> {
        self.staging_queries.keys().map(String::as_str)
    }
}

impl ReferenceResolver for Registry {
    fn group_by(&self, name: &str) -> Option<&GroupByDef> {
        self.group_bys.get(name)
    }

    fn staging_query(&self, name: &str) -> Option<&StagingQueryDef> {
        self.staging_queries.get(name)
    }
}
