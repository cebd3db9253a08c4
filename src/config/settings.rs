//! TOML-based configuration for joindecl.
//!
//! Supports a config file (joindecl.toml) with environment variable expansion
//! in path values.
//!
//! Example configuration:
//! ```toml
//! [registry]
//! path = "${FEATURE_REPO}/registry.toml"
//!
//! [validation]
//! allow_identity_mappings = false
//! strict_online = true
//! check_expressions = true
//!
//! [output]
//! dir = "compiled"
//! write_invalid = false
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::registry::{Registry, RegistryError};
use crate::validation::ValidationOptions;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Where GroupBy and staging query definitions come from.
    pub registry: RegistrySettings,

    /// Validation strictness.
    pub validation: ValidationSettings,

    /// Descriptor output.
    pub output: OutputSettings,
}

/// Registry location.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Path to a registry TOML file (supports ${ENV_VAR} expansion).
    pub path: Option<String>,
}

/// Validation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidationSettings {
    pub allow_identity_mappings: bool,
    pub strict_online: bool,
    pub check_expressions: bool,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        let defaults = ValidationOptions::default();
        Self {
            allow_identity_mappings: defaults.allow_identity_mappings,
            strict_online: defaults.strict_online,
            check_expressions: defaults.check_expressions,
        }
    }
}

impl From<&ValidationSettings> for ValidationOptions {
    fn from(settings: &ValidationSettings) -> Self {
        Self {
            allow_identity_mappings: settings.allow_identity_mappings,
            strict_online: settings.strict_online,
            check_expressions: settings.check_expressions,
        }
    }
}

/// Output settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Directory descriptors are written to (supports ${ENV_VAR} expansion).
    pub dir: String,

    /// Also write descriptors for joins with validation errors.
    pub write_invalid: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: "compiled".to_string(),
            write_invalid: false,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `JOINDECL_CONFIG`
    /// 2. `./joindecl.toml`
    /// 3. `~/.config/joindecl/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("JOINDECL_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("joindecl.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("joindecl").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        // Return defaults if no config file found
        Ok(Settings::default())
    }

    pub fn validation_options(&self) -> ValidationOptions {
        ValidationOptions::from(&self.validation)
    }

    /// The registry file path with environment variables expanded.
    pub fn registry_path(&self) -> Result<Option<PathBuf>, SettingsError> {
        self.registry
            .path
            .as_deref()
            .map(|p| expand_env_vars(p).map(PathBuf::from))
            .transpose()
    }

    /// Load the configured registry, or an empty one if none is configured.
    pub fn load_registry(&self) -> Result<Registry, SettingsError> {
        match self.registry_path()? {
            Some(path) => Ok(Registry::from_file(path)?),
            None => Ok(Registry::new()),
        }
    }

    /// The output directory with environment variables expanded.
    pub fn output_dir(&self) -> Result<PathBuf, SettingsError> {
        expand_env_vars(&self.output.dir).map(PathBuf::from)
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            // $VAR ends at non-alphanumeric/underscore
            while let Some(ch) = chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_') {
                var_name.push(ch);
            }
            if var_name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
                continue;
            }
        }

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
