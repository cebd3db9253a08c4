//! End-to-end compilation from configuration units to join descriptors.
//!
//! ```text
//! Lua unit → Load → Declarations → Validate → Normalize → JoinDescriptor → JSON
//! ```
//!
//! Units are compiled independently. A unit that fails to load is reported
//! and skipped; the remaining units still compile.
//!
//! # Example
//!
//! ```ignore
//! use joindecl::compile::{compile_paths, write_descriptors, CompileOptions};
//! use joindecl::registry::Registry;
//!
//! let registry = Registry::from_file("registry.toml")?;
//! let options = CompileOptions::default();
//! let summary = compile_paths(&["joins".into()], &registry, &options)?;
//! write_descriptors(&summary, "compiled".as_ref(), &options)?;
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::descriptor::{normalize, JoinDescriptor};
use crate::loader::{self, LoadError};
use crate::registry::ReferenceResolver;
use crate::validation::{validate, ValidationOptions, ValidationReport};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that stop a compile run as a whole.
///
/// Problems inside a single unit are not errors here; they are recorded in
/// that unit's [`UnitOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize descriptor {name}: {source}")]
    Serialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type CompileResult<T> = Result<T, CompileError>;

// ============================================================================
// Options
// ============================================================================

/// Options for compilation.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Passed to the validator for every join.
    pub validation: ValidationOptions,

    /// Write descriptors even when validation reported errors.
    pub write_invalid: bool,
}

impl CompileOptions {
    pub fn with_validation(mut self, validation: ValidationOptions) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_write_invalid(mut self, write_invalid: bool) -> Self {
        self.write_invalid = write_invalid;
        self
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// One join after validation and normalization.
#[derive(Debug, Clone)]
pub struct CompiledJoin {
    /// Binding name inside the unit
    pub binding: String,

    pub report: ValidationReport,

    /// `None` when the report is fatal
    pub descriptor: Option<JoinDescriptor>,
}

impl CompiledJoin {
    /// Qualified name of the join.
    pub fn name(&self) -> &str {
        &self.report.declaration
    }

    /// Whether this join's descriptor should be written out.
    pub fn is_writable(&self, options: &CompileOptions) -> bool {
        self.descriptor.is_some() && (options.write_invalid || self.report.is_ok())
    }
}

/// Outcome of compiling one configuration unit.
#[derive(Debug)]
pub enum UnitOutcome {
    Loaded {
        unit: String,
        joins: Vec<CompiledJoin>,
    },
    Failed {
        unit: String,
        error: LoadError,
    },
}

impl UnitOutcome {
    pub fn unit(&self) -> &str {
        match self {
            UnitOutcome::Loaded { unit, .. } | UnitOutcome::Failed { unit, .. } => unit,
        }
    }

    pub fn joins(&self) -> &[CompiledJoin] {
        match self {
            UnitOutcome::Loaded { joins, .. } => joins,
            UnitOutcome::Failed { .. } => &[],
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, UnitOutcome::Failed { .. })
    }
}

/// Outcomes of every unit in a compile run, in path order.
#[derive(Debug, Default)]
pub struct CompileSummary {
    pub units: Vec<UnitOutcome>,
}

impl CompileSummary {
    pub fn joins(&self) -> impl Iterator<Item = (&str, &CompiledJoin)> {
        self.units
            .iter()
            .flat_map(|u| u.joins().iter().map(move |j| (u.unit(), j)))
    }

    pub fn failed_units(&self) -> impl Iterator<Item = (&str, &LoadError)> {
        self.units.iter().filter_map(|u| match u {
            UnitOutcome::Failed { unit, error } => Some((unit.as_str(), error)),
            UnitOutcome::Loaded { .. } => None,
        })
    }

    /// Joins whose reports carry at least one error.
    pub fn invalid_joins(&self) -> usize {
        self.joins().filter(|(_, j)| j.report.has_errors()).count()
    }

    /// No unit failed to load and no join has errors.
    pub fn is_clean(&self) -> bool {
        self.failed_units().next().is_none() && self.invalid_joins() == 0
    }
}

// ============================================================================
// Compilation Functions
// ============================================================================

/// Load, validate and normalize every join in one unit.
pub fn compile_unit(
    path: &Path,
    resolver: &dyn ReferenceResolver,
    options: &CompileOptions,
) -> UnitOutcome {
    let unit = path.display().to_string();
    finish_unit(unit, loader::load(path), resolver, options)
}

/// Like [`compile_unit`], for Lua source held in memory.
pub fn compile_source(
    content: &str,
    unit_name: &str,
    resolver: &dyn ReferenceResolver,
    options: &CompileOptions,
) -> UnitOutcome {
    let loaded = loader::load_from_str(content, unit_name);
    finish_unit(unit_name.to_string(), loaded, resolver, options)
}

fn finish_unit(
    unit: String,
    loaded: loader::LoadResult<crate::model::Declarations>,
    resolver: &dyn ReferenceResolver,
    options: &CompileOptions,
) -> UnitOutcome {
    let declarations = match loaded {
        Ok(declarations) => declarations,
        Err(error) => {
            warn!(unit = %unit, error = %error, "failed to load unit");
            return UnitOutcome::Failed { unit, error };
        }
    };

    let joins = declarations
        .into_iter()
        .map(|(binding, join)| {
            let name = join.meta.name.clone().unwrap_or_else(|| binding.clone());
            let report = validate(&name, &join, resolver, &options.validation);

            for issue in &report.issues {
                debug!(unit = %unit, "{}", issue);
            }

            let descriptor = if report.is_fatal() {
                warn!(unit = %unit, join = %name, "unresolvable online join, no descriptor");
                None
            } else {
                Some(normalize(&name, &join, resolver))
            };

            CompiledJoin {
                binding,
                report,
                descriptor,
            }
        })
        .collect::<Vec<_>>();

    info!(unit = %unit, joins = joins.len(), "compiled unit");
    UnitOutcome::Loaded { unit, joins }
}

/// Expand the given paths into a sorted list of `.lua` units.
///
/// Directories are walked recursively. Files are taken as given, whatever
/// their extension, so the loader can report unsupported ones.
pub fn collect_units(paths: &[PathBuf]) -> CompileResult<Vec<PathBuf>> {
    let mut units = Vec::new();
    for path in paths {
        if path.is_dir() {
            walk_dir(path, &mut units)?;
        } else if path.exists() {
            units.push(path.clone());
        } else {
            return Err(CompileError::PathNotFound(path.clone()));
        }
    }
    units.sort();
    units.dedup();
    Ok(units)
}

fn walk_dir(dir: &Path, units: &mut Vec<PathBuf>) -> CompileResult<()> {
    let io_error = |source| CompileError::Io {
        path: dir.to_path_buf(),
        source,
    };

    for entry in fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.is_dir() {
            walk_dir(&path, units)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("lua") {
            units.push(path);
        }
    }
    Ok(())
}

/// Compile every unit found under `paths`.
pub fn compile_paths(
    paths: &[PathBuf],
    resolver: &dyn ReferenceResolver,
    options: &CompileOptions,
) -> CompileResult<CompileSummary> {
    let units = collect_units(paths)?;
    debug!(count = units.len(), "collected units");

    let summary = CompileSummary {
        units: units
            .iter()
            .map(|path| compile_unit(path, resolver, options))
            .collect(),
    };

    info!(
        units = summary.units.len(),
        failed = summary.failed_units().count(),
        invalid_joins = summary.invalid_joins(),
        "compile finished"
    );
    Ok(summary)
}

/// Where a descriptor is written: `<out_dir>/joins/<team>/<unit_stem>.<binding>.json`.
pub fn descriptor_path(out_dir: &Path, unit: &str, compiled: &CompiledJoin) -> PathBuf {
    let team = compiled
        .descriptor
        .as_ref()
        .and_then(|d| d.team.as_deref())
        .unwrap_or("default");
    let stem = Path::new(unit)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unit");

    out_dir
        .join("joins")
        .join(team)
        .join(format!("{}.{}.json", stem, compiled.binding))
}

/// Write descriptors as pretty JSON, returning the files written.
///
/// Joins with validation errors are skipped unless `options.write_invalid`.
pub fn write_descriptors(
    summary: &CompileSummary,
    out_dir: &Path,
    options: &CompileOptions,
) -> CompileResult<Vec<PathBuf>> {
    let mut written = Vec::new();

    for (unit, compiled) in summary.joins() {
        let Some(descriptor) = compiled.descriptor.as_ref() else {
            continue;
        };
        if !compiled.is_writable(options) {
            debug!(join = %descriptor.name, "skipping invalid join");
            continue;
        }

        let path = descriptor_path(out_dir, unit, compiled);
        let json = descriptor.to_json().map_err(|source| CompileError::Serialize {
            name: descriptor.name.clone(),
            source,
        })?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| CompileError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&path, json).map_err(|source| CompileError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), "wrote descriptor");
        written.push(path);
    }

    Ok(written)
}
