//! Error types for the Strata connection layer
//!
//! This module defines the error type shared by the connection lifecycle
//! controller and every subsystem it drives.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use std::io;
use thiserror::Error;

/// Result type alias for Strata operations
pub type StrataResult<T> = std::result::Result<T, StrataError>;

/// Broad classification of a [`StrataError`]
///
/// Callers branch on the kind rather than on individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid option value; raised before any state is mutated
    Configuration,
    /// Allocation failure
    ResourceExhausted,
    /// Structural validation failed
    Corruption,
    /// Unrecoverable without reopening in salvage mode
    TrySalvage,
    /// An expected item does not exist
    NotFound,
    /// A collaborator's create/destroy/open failed
    Subsystem,
    /// The database is locked by another handle or process
    Busy,
    /// The connection is closing and refuses the operation
    Closing,
    /// Operating system I/O failure
    Io,
    /// Broken internal invariant
    Internal,
}

/// Errors raised while opening, running, or closing a connection
#[derive(Debug, Error)]
pub enum StrataError {
    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Allocation failure
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Corruption that can only be repaired by reopening with `salvage = true`
    #[error("{0}; reopen the database with salvage = true to repair it")]
    TrySalvage(String),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A subsystem reported a failure
    #[error("{subsystem} failed: {message}")]
    Subsystem {
        /// Subsystem name, e.g. `"cache"` or `"eviction"`
        subsystem: &'static str,
        /// What went wrong
        message: String,
    },

    /// Database is in use elsewhere
    #[error("Database busy: {0}")]
    Busy(String),

    /// Operation refused because the connection is shutting down
    #[error("Connection is closing: {0}")]
    Closing(String),

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal invariant violated
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StrataError {
    /// Build a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        StrataError::Config(message.into())
    }

    /// Build a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        StrataError::Corruption(message.into())
    }

    /// Build a subsystem failure.
    pub fn subsystem(subsystem: &'static str, message: impl Into<String>) -> Self {
        StrataError::Subsystem {
            subsystem,
            message: message.into(),
        }
    }

    /// Build an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        StrataError::Internal(message.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StrataError::Config(_) => ErrorKind::Configuration,
            StrataError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            StrataError::Corruption(_) => ErrorKind::Corruption,
            StrataError::TrySalvage(_) => ErrorKind::TrySalvage,
            StrataError::NotFound(_) => ErrorKind::NotFound,
            StrataError::Subsystem { .. } => ErrorKind::Subsystem,
            StrataError::Busy(_) => ErrorKind::Busy,
            StrataError::Closing(_) => ErrorKind::Closing,
            StrataError::Io(_) => ErrorKind::Io,
            StrataError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True when the operator should reopen with salvage enabled.
    pub fn is_try_salvage(&self) -> bool {
        self.kind() == ErrorKind::TrySalvage
    }
}

impl From<toml::de::Error> for StrataError {
    fn from(e: toml::de::Error) -> Self {
        StrataError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for StrataError {
    fn from(e: toml::ser::Error) -> Self {
        StrataError::Internal(format!("config serialization: {}", e))
    }
}

impl From<serde_json::Error> for StrataError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            StrataError::Io(e.into())
        } else {
            StrataError::Corruption(format!("malformed JSON: {}", e))
        }
    }
}

impl From<std::collections::TryReserveError> for StrataError {
    fn from(e: std::collections::TryReserveError) -> Self {
        StrataError::ResourceExhausted(e.to_string())
    }
}
