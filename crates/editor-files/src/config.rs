use std::path::{Path, PathBuf};

use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Editor server configuration.
///
/// Immutable for the lifetime of one server instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to bind to
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,

    /// Port to listen on (0 picks an ephemeral port)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shell-glob patterns; matching entry names are left out of listings
    #[serde(default)]
    pub ignore_pattern: Vec<String>,

    /// List directories before files
    #[serde(default)]
    pub dir_first: bool,

    /// Hide entries whose name starts with a dot
    #[serde(default)]
    pub hide_hidden: bool,

    /// Title substituted into the HTML shell
    #[serde(default = "default_page_title")]
    pub page_title: String,

    /// Root that client paths must stay within, and the join base for reads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,

    /// Directory holding `index.html` and the static front end
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,

    /// Maximum upload body size (in bytes)
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,

    /// Check every client path against `base_dir`
    #[serde(default)]
    pub restrict_paths: bool,
}

fn default_listen_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_page_title() -> String {
    "Editor".to_string()
}

fn default_assets_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets")
}

fn default_max_upload_size() -> u64 {
    100 * 1024 * 1024 // 100 MB
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_ip: default_listen_ip(),
            port: default_port(),
            ignore_pattern: Vec::new(),
            dir_first: false,
            hide_hidden: false,
            page_title: default_page_title(),
            base_dir: None,
            assets_dir: default_assets_dir(),
            max_upload_size: default_max_upload_size(),
            restrict_paths: false,
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.expand_paths()
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Expand `~` and environment variables in configured paths.
    pub fn expand_paths(mut self) -> Result<Self, ConfigError> {
        if let Some(base) = self.base_dir.take() {
            self.base_dir = Some(expand_path(&base)?);
        }
        self.assets_dir = expand_path(&self.assets_dir)?;
        Ok(self)
    }

    /// Check the configuration and compile the ignore patterns.
    pub fn validate(&self) -> Result<Vec<Pattern>, ConfigError> {
        if self.restrict_paths && self.base_dir.is_none() {
            return Err(ConfigError::RestrictWithoutBase);
        }
        self.ignore_patterns()
    }

    /// Compile the configured ignore globs.
    pub fn ignore_patterns(&self) -> Result<Vec<Pattern>, ConfigError> {
        self.ignore_pattern
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect()
    }

    /// Base used to join relative file names for `/api/file` and `/api/download`.
    pub fn join_base(&self) -> &Path {
        self.base_dir.as_deref().unwrap_or_else(|| Path::new("."))
    }
}

pub fn expand_path(path: &Path) -> Result<PathBuf, ConfigError> {
    let raw = path.to_string_lossy();
    let expanded =
        shellexpand::full(&raw).map_err(|_| ConfigError::Expand(raw.to_string()))?;
    Ok(PathBuf::from(expanded.as_ref()))
}
