//! HTTP file editor library.
//!
//! Serves a small web editor that can browse, read, write, upload, download,
//! rename, delete and create files and directories. The server can be
//! started, stopped and replaced at runtime through [`ServerManager`].

pub mod config;
pub mod error;
pub mod handlers;
pub mod listing;
pub mod path_guard;
pub mod routes;
pub mod server;
pub mod template;

use std::path::Path;
use std::sync::Arc;

pub use config::Config;
pub use error::{ConfigError, FileServerError, ServerError};
pub use listing::DirectoryLister;
pub use server::{ServerHandle, ServerManager, StartOptions};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Configuration
    pub config: Arc<Config>,
    /// Listing builder compiled from the configuration
    pub lister: Arc<DirectoryLister>,
}

impl AppState {
    /// Validate `config` and build the state for it.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let patterns = config.validate()?;
        let lister = DirectoryLister::new(config.dir_first, config.hide_hidden, patterns);
        Ok(Self {
            config: Arc::new(config),
            lister: Arc::new(lister),
        })
    }

    /// Reject `path` when paths are restricted and it leaves the base directory.
    pub fn guard(&self, path: &Path) -> Result<(), FileServerError> {
        if self.config.restrict_paths {
            path_guard::ensure_safe(self.config.base_dir.as_deref(), path)
        } else {
            Ok(())
        }
    }
}
