//! Error types for the asset ingest pipeline.
//!
//! Errors are split by subsystem: configuration parsing, storage backends,
//! and per-upload processing. Processing errors carry their disposition
//! (user-caused vs. internal) so the server layer can map them to HTTP
//! statuses without inspecting message strings.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A config line is not of the `key=value` form
    #[error("invalid config line: {line:?}")]
    InvalidLine { line: String },

    /// The same key appeared twice
    #[error("duplicate config key: {key}")]
    DuplicateKey { key: String },

    /// The key is not recognized
    #[error("unknown config key: {key}")]
    UnknownKey { key: String },

    /// The value for a known key failed to parse
    #[error("error parsing config key '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Cross-key validation failed (missing sections, inconsistent timeouts)
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl ConfigError {
    pub(crate) fn value(key: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Storage backend errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// An underlying I/O operation failed
    #[error("storage I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The staged folder was already committed
    #[error("staged folder for {name} was committed twice")]
    AlreadyCommitted { name: String },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Sentinel for a task group that was cancelled before finishing.
///
/// Error types used with [`crate::group::TaskGroup::cancel`] must be
/// convertible from this.
#[derive(Debug, Clone, Copy)]
pub struct Cancelled;

/// Errors raised while processing a single upload.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The payload could not be decoded as an image. User-caused; maps to 400.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Encoding a resized variant failed.
    #[error("failed to encode {format}: {message}")]
    Codec { format: String, message: String },

    /// A storage operation failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// An internal invariant did not hold (e.g. a committed folder with no
    /// original file). Always a bug or external interference; maps to 500.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// The task group was cancelled.
    #[error("processing was cancelled")]
    Cancelled,
}

impl From<Cancelled> for ProcessError {
    fn from(_: Cancelled) -> Self {
        ProcessError::Cancelled
    }
}

impl ProcessError {
    /// True when the error was caused by the uploaded payload itself, as
    /// opposed to a server-side failure.
    pub fn is_user_error(&self) -> bool {
        matches!(self, ProcessError::InvalidImage(_))
    }
}

/// Convenience alias for processing results.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;
