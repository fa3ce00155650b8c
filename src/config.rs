//! Runtime configuration loaded from TOML.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::diagnostics::Result;

/// File picked up from the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "ezlang.toml";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub modules: ModuleConfig,
    /// Nested user-function calls allowed before evaluation aborts.
    pub max_call_depth: usize,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            modules: ModuleConfig::default(),
            max_call_depth: 256,
            log_filter: "ezlang=warn".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModuleConfig {
    /// Source extension appended to module paths that lack it.
    pub extension: String,
    /// Binding prefix that marks a top-level name as exported.
    pub export_prefix: String,
    /// Directory relative module paths resolve against outside a module.
    pub root: Option<PathBuf>,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            extension: "ez".to_string(),
            export_prefix: "export_".to_string(),
            root: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Loads `explicit` when given, else `ezlang.toml` from the working
    /// directory if present, else defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let fallback = Path::new(DEFAULT_CONFIG_FILE);
        if fallback.is_file() {
            Self::load(fallback)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::EzError;

    #[test]
    fn partial_tables_fall_back_to_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            max_call_depth = 32

            [modules]
            root = "scripts"
            "#,
        )
        .expect("valid config");
        assert_eq!(config.max_call_depth, 32);
        assert_eq!(config.modules.extension, "ez");
        assert_eq!(config.modules.export_prefix, "export_");
        assert_eq!(config.modules.root, Some(PathBuf::from("scripts")));
        assert_eq!(config.log_filter, "ezlang=warn");
    }

    #[test]
    fn empty_document_is_default() {
        let config = RuntimeConfig::from_toml_str("").expect("empty config");
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn type_errors_surface_as_config_errors() {
        let err = RuntimeConfig::from_toml_str("max_call_depth = \"deep\"").unwrap_err();
        assert!(matches!(err, EzError::Config(_)));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("ezlang.toml");
        fs::write(&path, "[modules]\nexport_prefix = \"pub_\"\n").expect("write config");
        let config = RuntimeConfig::discover(Some(&path)).expect("load config");
        assert_eq!(config.modules.export_prefix, "pub_");
    }
}
