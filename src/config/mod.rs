//! Configuration module for joindecl.
//!
//! Handles the settings file, registry location and environment variables.

mod settings;

pub use settings::{
    expand_env_vars, OutputSettings, RegistrySettings, Settings, SettingsError,
    ValidationSettings,
};
