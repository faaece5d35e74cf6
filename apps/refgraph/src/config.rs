//! # Configuration
//!
//! Optional `refgraph.toml`:
//!
//! ```toml
//! prefix = "~$£€"
//! json_mode = false
//! ```
//!
//! Command-line flags win over file values; file values win over defaults.

use refgraph_core::{CodecOptions, RefgraphError};
use serde::Deserialize;
use std::path::Path;

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "refgraph.toml";

/// Contents of a configuration file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Marker-key prefix shared by encoder and decoder.
    pub prefix: Option<String>,

    /// Print command output as JSON.
    pub json_mode: Option<bool>,
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, [`DEFAULT_CONFIG_FILE`] is
    /// read if present and defaults are used otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, RefgraphError> {
        match path {
            Some(path) => Self::read(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.is_file() {
                    Self::read(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn read(path: &Path) -> Result<Self, RefgraphError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RefgraphError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        let config = Self::from_toml(&contents)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, RefgraphError> {
        toml::from_str(contents).map_err(|e| RefgraphError::Config(e.to_string()))
    }

    /// Merge with command-line flags.
    pub fn resolve(self, prefix: Option<String>, json_mode: bool) -> Settings {
        let mut options = CodecOptions::new();
        if let Some(prefix) = prefix.or(self.prefix) {
            options = options.with_prefix(prefix);
        }
        Settings {
            options,
            json_mode: json_mode || self.json_mode.unwrap_or(false),
        }
    }
}

/// Effective settings handed to every command.
#[derive(Debug, Clone)]
pub struct Settings {
    pub options: CodecOptions,
    pub json_mode: bool,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_default() {
        assert_eq!(Config::from_toml("").expect("parse"), Config::default());
    }

    #[test]
    fn file_values_are_read() {
        let config = Config::from_toml("prefix = \"-\"\njson_mode = true\n").expect("parse");
        assert_eq!(config.prefix.as_deref(), Some("-"));
        assert_eq!(config.json_mode, Some(true));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = Config::from_toml("prefx = \"-\"");
        assert!(matches!(result, Err(RefgraphError::Config(_))));
    }

    #[test]
    fn flags_override_file() {
        let config = Config {
            prefix: Some("-".to_string()),
            json_mode: Some(false),
        };
        let settings = config.resolve(Some("~".to_string()), true);
        assert_eq!(settings.options.prefix(), "~");
        assert!(settings.json_mode);
    }

    #[test]
    fn defaults_apply_without_file_or_flags() {
        let settings = Config::default().resolve(None, false);
        assert_eq!(settings.options.prefix(), CodecOptions::default().prefix());
        assert!(!settings.json_mode);
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let result = Config::load(Some(Path::new("/nonexistent/refgraph.toml")));
        assert!(matches!(result, Err(RefgraphError::IoError(_))));
    }
}
