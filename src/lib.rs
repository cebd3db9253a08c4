//! # joindecl
//!
//! Loads join declarations from Lua configuration units, validates them
//! against a registry of GroupBys and staging queries, and normalizes them
//! into descriptors for downstream compilation.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              Lua configuration unit                      │
//! │  return { v1 = Join { left = ..., rightParts = ... } }   │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [loader]
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Declarations (model)                     │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [validation] ◄── [registry]
//! ┌─────────────────────────────────────────────────────────┐
//! │                 ValidationReport                         │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [descriptor]
//! ┌─────────────────────────────────────────────────────────┐
//! │          JoinDescriptor (normalized, hashed)             │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! [`compile`] drives the whole pipeline over many units, isolating failures
//! per unit.

pub mod compile;
pub mod config;
pub mod descriptor;
pub mod loader;
pub mod model;
pub mod registry;
pub mod validation;

pub use compile::{compile_paths, compile_unit, CompileOptions, CompileSummary, UnitOutcome};
pub use descriptor::{normalize, JoinDescriptor};
pub use loader::{load, load_from_str, LoadError};
pub use model::{Declarations, Join};
pub use registry::{ReferenceResolver, Registry};
pub use validation::{validate, ValidationOptions, ValidationReport};
