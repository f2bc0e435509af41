//! Loading the muster run configuration.
//!
//! One invocation is described by a single TOML document: the `[muster]`
//! defaults, the optional `[archival]` and `[procman]` blocks, and the
//! named `[suite.*]` definitions the registry resolves into runnable
//! suites. See [`schema`] for the full layout.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads the run configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read run configuration {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse run configuration {}", path.display()))
}

/// Loads the run configuration from an in-memory TOML document.
pub fn load_config_str(content: &str) -> Result<Config> {
    toml::from_str(content).context("Failed to parse run configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_error_names_the_path() {
        let err = load_config(Path::new("/no/such/muster.toml")).unwrap_err();
        assert!(err.to_string().contains("/no/such/muster.toml"));
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let err = load_config_str("[suite.core\nkind =").unwrap_err();
        assert!(err.to_string().contains("parse"));
    }

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = load_config_str("").unwrap();
        assert!(config.suite.is_empty());
        assert_eq!(config.muster.jobs, 4);
    }
}
