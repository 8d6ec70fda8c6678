//! Error taxonomy for the interceptor
//!
//! Every variant here aborts the run. Lookups that only degrade the
//! result (unknown fuzzer or sanitizer names) are not errors; see
//! [`crate::settings::ResolveWarning`].

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors raised while setting up, running or finishing a build
#[derive(Error, Debug)]
pub enum InterceptError {
    #[error("Failed to bind interceptor service to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration in {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("Invalid match pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Preload library not found: {0}")]
    PreloadLibraryNotFound(String),

    #[error("Failed to start build command {command:?}: {source}")]
    BuildSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Build command exited with status {0}")]
    BuildFailed(i32),

    #[error("Failed to write compilation database {path}: {message}")]
    Database { path: PathBuf, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for interceptor operations
pub type Result<T> = std::result::Result<T, InterceptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_failed_message_carries_status() {
        let err = InterceptError::BuildFailed(2);
        assert_eq!(err.to_string(), "Build command exited with status 2");
    }

    #[test]
    fn test_bind_error_names_address() {
        let err = InterceptError::Bind {
            addr: "127.0.0.1:6774".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().contains("127.0.0.1:6774"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: InterceptError = io.into();
        assert!(matches!(err, InterceptError::Io(_)));
    }
}
