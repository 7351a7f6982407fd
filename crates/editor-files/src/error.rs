use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failure of a single filesystem operation.
///
/// The `Display` text is what ends up in the `message` field of the JSON
/// envelope, so variants carry the path they failed on.
#[derive(Error, Debug)]
pub enum FileServerError {
    #[error("No such file or directory: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("File exists: {0}")]
    AlreadyExists(String),

    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Path is outside base directory: {0}")]
    PathTraversal(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("File is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("File too big: {size}")]
    FileTooLarge { size: u64 },

    #[error("{0}")]
    MissingField(&'static str),

    #[error("Invalid form data: {0}")]
    Multipart(String),

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl FileServerError {
    /// Classify an I/O error raised while operating on `path`.
    pub fn from_io(err: io::Error, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().display().to_string();
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(path),
            io::ErrorKind::DirectoryNotEmpty => Self::NotEmpty(path),
            io::ErrorKind::NotADirectory => Self::NotADirectory(path),
            _ => Self::Io { path, source: err },
        }
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid ignore pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("restrict_paths requires base_dir to be set")]
    RestrictWithoutBase,

    #[error("failed to expand path {0:?}")]
    Expand(String),
}

/// Errors raised by the server lifecycle.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("invalid listen address {0:?}")]
    InvalidAddress(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to read bound address: {0}")]
    LocalAddr(#[source] io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_classifies_kinds() {
        let err = FileServerError::from_io(io::Error::from(io::ErrorKind::NotFound), "/x");
        assert!(matches!(err, FileServerError::NotFound(ref p) if p == "/x"));

        let err = FileServerError::from_io(io::Error::from(io::ErrorKind::AlreadyExists), "/x");
        assert_eq!(err.to_string(), "File exists: /x");

        let err =
            FileServerError::from_io(io::Error::from(io::ErrorKind::DirectoryNotEmpty), "/d");
        assert_eq!(err.to_string(), "Directory not empty: /d");
    }

    #[test]
    fn test_from_io_keeps_other_errors() {
        let err = FileServerError::from_io(io::Error::other("boom"), "/y");
        assert!(matches!(err, FileServerError::Io { .. }));
        assert_eq!(err.to_string(), "/y: boom");
    }

    #[test]
    fn test_too_big_message() {
        let err = FileServerError::FileTooLarge { size: 157286400 };
        assert_eq!(err.to_string(), "File too big: 157286400");
    }
}
