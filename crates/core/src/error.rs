//! Error type for the non-GPU crates.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by configuration, windowing and surface setup.
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or handle access failed.
    #[error("Window error: {0}")]
    Window(String),

    /// Surface creation or surface extension enumeration failed.
    #[error("Surface error: {0}")]
    Surface(String),

    /// A configuration file could not be parsed or holds invalid values.
    #[error("Config error in {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using the core Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_names_path() {
        let err = Error::Config {
            path: PathBuf::from("presto.toml"),
            reason: "expected a table".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("presto.toml"));
        assert!(message.contains("expected a table"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
