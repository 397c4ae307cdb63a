//! Project configuration for `livedev.toml`.
//!
//! # Module Structure
//!
//! ```text
//! config/
//! ├── section/       # [serve] and [preview]
//! ├── error          # ConfigError
//! ├── util           # Config discovery, path expansion
//! └── mod.rs         # LiveConfig (this file)
//! ```
//!
//! The file is optional. Every field has a default and CLI flags override
//! what the file says.

mod error;
pub mod section;
mod util;

pub use error::ConfigError;
pub use section::{PreviewConfig, ServeConfig};
pub use util::find_config_file_from;

use util::{expand_path, find_config_file};

use crate::{
    cli::{Cli, ServeArgs},
    log,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Root configuration structure representing livedev.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Absolute path to the config file, if one was found
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// Project root directory
    #[serde(skip)]
    pub root: PathBuf,

    /// Preview server settings
    #[serde(default)]
    pub serve: ServeConfig,

    /// Live preview behaviour
    #[serde(default)]
    pub preview: PreviewConfig,
}

impl LiveConfig {
    /// Load configuration for the CLI invocation.
    ///
    /// Searches upward from cwd for the config file. The project root is
    /// the positional `ROOT` argument, else the config file's directory,
    /// else cwd.
    pub fn load(cli: &Cli) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current working directory")?;

        let mut config = match find_config_file(&cli.config) {
            Some(path) => {
                let mut config = Self::from_path(&path)?;
                config.config_path = Some(path);
                config
            }
            None => Self::default(),
        };

        let args = cli.serve_args();
        let root = match &args.root {
            Some(root) => cwd.join(expand_path(root)),
            None => config
                .config_path
                .as_deref()
                .and_then(Path::parent)
                .map(Path::to_path_buf)
                .unwrap_or(cwd),
        };
        config.root = fs::canonicalize(&root)
            .map_err(|err| ConfigError::Io(root.clone(), err))?;

        config.apply_serve_args(args);
        config.validate()?;
        Ok(config)
    }

    /// Defaults rooted at `root`, for embedders and tests.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load configuration from file path with unknown field detection.
    fn from_path(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;

        let (config, ignored) = Self::parse_with_ignored(&content)?;
        if !ignored.is_empty() {
            Self::print_unknown_fields_warning(&ignored, path);
        }
        Ok(config)
    }

    /// Parse TOML content, collecting any unknown fields.
    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>), ConfigError> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })?;
        Ok((config, ignored))
    }

    fn print_unknown_fields_warning(fields: &[String], path: &Path) {
        let display_path = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| path.to_string_lossy());
        log!("warning"; "unknown fields in {} (ignored): {}", display_path, fields.join(", "));
    }

    /// CLI flags win over the file.
    fn apply_serve_args(&mut self, args: &ServeArgs) {
        Self::update_option(&mut self.serve.interface, args.interface.as_ref());
        Self::update_option(&mut self.serve.port, args.port.as_ref());
        Self::update_option(&mut self.serve.ws_port, args.ws_port.as_ref());
        Self::update_option(&mut self.serve.watch, args.watch.as_ref());
    }

    fn update_option<T: Clone>(target: &mut T, value: Option<&T>) {
        if let Some(v) = value {
            *target = v.clone();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.preview.html_extensions.is_empty() {
            return Err(ConfigError::Validation(
                "[preview.html_extensions] must name at least one extension".into(),
            ));
        }
        if self.preview.index_file.trim().is_empty() {
            return Err(ConfigError::Validation(
                "[preview.index_file] must not be empty".into(),
            ));
        }
        if self.serve.port == self.serve.ws_port {
            return Err(ConfigError::Validation(format!(
                "[serve] port and ws_port are both {}",
                self.serve.port
            )));
        }
        Ok(())
    }

    /// Join a path with the project root.
    pub fn root_join(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root.join(path)
    }

    /// Absolute path of the index file.
    pub fn index_path(&self) -> PathBuf {
        self.root_join(&self.preview.index_file)
    }
}

/// Parse a config snippet, panicking on error. Test helper.
#[cfg(test)]
pub fn test_parse_config(content: &str) -> LiveConfig {
    LiveConfig::parse_with_ignored(content)
        .map(|(config, _)| config)
        .expect("test config should parse")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_fields_are_collected() {
        let (config, ignored) =
            LiveConfig::parse_with_ignored("[serve]\nport = 9000\ncolour = true\n[extra]\na = 1")
                .unwrap();
        assert_eq!(config.serve.port, 9000);
        assert_eq!(ignored, vec!["serve.colour".to_string(), "extra".to_string()]);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            LiveConfig::parse_with_ignored("[serve\nport = 1"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = test_parse_config("[serve]\nport = 9000\nwatch = true");
        let args = ServeArgs {
            port: Some(7000),
            watch: Some(false),
            ..ServeArgs::default()
        };
        config.apply_serve_args(&args);
        assert_eq!(config.serve.port, 7000);
        assert!(!config.serve.watch);
        assert_eq!(config.serve.ws_port, 35729);
    }

    #[test]
    fn test_validate() {
        assert!(test_parse_config("").validate().is_ok());

        let clash = test_parse_config("[serve]\nport = 4000\nws_port = 4000");
        assert!(matches!(clash.validate(), Err(ConfigError::Validation(_))));

        let no_ext = test_parse_config("[preview]\nhtml_extensions = []");
        assert!(matches!(no_ext.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_index_path() {
        let config = LiveConfig::with_root("/srv/site");
        assert_eq!(config.index_path(), PathBuf::from("/srv/site/index.html"));
    }
}
