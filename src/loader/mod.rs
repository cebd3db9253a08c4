//! Loading join declarations from configuration units.
//!
//! A unit is a Lua file that returns a table of binding name to `Join`:
//!
//! ```lua
//! return {
//!     v1 = Join {
//!         left = Source {
//!             events = EventSource {
//!                 table = "sample_namespace.sample_table",
//!                 query = Query {
//!                     startPartition = "2021-03-01",
//!                     selects = { subject = "subject_expr" },
//!                     timeColumn = "UNIX_TIMESTAMP(ts) * 1000",
//!                 },
//!             },
//!         },
//!         rightParts = {
//!             JoinPart {
//!                 group_by = group_by("sample_team.sample_group_by.v1"),
//!                 keyMapping = { subject = "group_by_subject" },
//!             },
//!         },
//!         online = true,
//!     },
//! }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use joindecl::loader::load;
//! use std::path::Path;
//!
//! let declarations = load(Path::new("joins/sample_team/sample_join.lua"))?;
//! for (name, join) in &declarations.joins {
//!     println!("{} -> {} right parts", name, join.right_parts.len());
//! }
//! ```

pub mod lua;

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use thiserror::Error;

use crate::model::Declarations;

pub use lua::LuaLoader;

/// Errors that abort loading a configuration unit.
#[derive(Debug, Error)]
pub enum LoadError {
    /// File not found
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    /// Unsupported file extension
    #[error("Unsupported file extension: {extension}. Supported: .lua")]
    UnsupportedExtension { extension: String },

    /// IO error reading file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Lua syntax or runtime error while evaluating the unit
    #[error("Lua error in {file}: {message}")]
    Lua { file: String, message: String },

    /// The unit did not return a table of declarations
    #[error("{file} must return a table of name = Join {{ ... }}, got {found}")]
    NotATable { file: String, found: String },

    /// A returned value could not be read as a join
    #[error("Invalid declaration '{name}' in {file} at {path}: {message}")]
    InvalidDeclaration {
        file: String,
        name: String,
        path: String,
        message: String,
    },
}

/// Result type for loading operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Load the joins exported by a configuration unit.
///
/// The loader is selected based on the file extension:
/// - `.lua` - Lua loader
pub fn load(path: &Path) -> LoadResult<Declarations> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    match extension {
        "lua" => LuaLoader::load(path),
        _ => Err(LoadError::UnsupportedExtension {
            extension: extension.to_string(),
        }),
    }
}

/// Load joins from Lua source held in memory.
///
/// `unit_name` stands in for the file path: its parent directory names the
/// team and its stem is used in qualified names.
pub fn load_from_str(content: &str, unit_name: &str) -> LoadResult<Declarations> {
    LuaLoader::load_from_str(content, unit_name)
}

/// A binding name found by pattern matching rather than evaluation.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct BasicBinding {
    pub name: String,
    pub line: usize,
}

static BINDING_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:local\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*=\s*Join\s*[{(]")
        .expect("binding pattern is valid")
});

/// Extract `name = Join { ... }` bindings using a regex.
///
/// Fallback for units that fail to evaluate: lets a listing still show what a
/// broken unit meant to declare.
pub fn extract_bindings_regex(content: &str) -> Vec<BasicBinding> {
    let mut bindings: Vec<BasicBinding> = BINDING_PATTERN
        .captures_iter(content)
        .filter_map(|cap| cap.get(1))
        .map(|m| BasicBinding {
            name: m.as_str().to_string(),
            line: content[..m.start()].chars().filter(|&c| c == '\n').count() + 1,
        })
        .collect();

    bindings.sort_by_key(|b| b.line);
    bindings
}
