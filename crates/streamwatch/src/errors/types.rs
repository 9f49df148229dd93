//! Error type definitions for the streamwatch application
//!
//! Probe failures are deliberately absent here: a failed probe is data (it
//! becomes a `MetricSample` with a non-ok outcome), never an error. These
//! types cover the control surface — stream management, persistence, and
//! the web boundary.

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Validation errors (bad manifest URL, missing parameters)
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Resource not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// A stream with the same manifest URL already exists
    #[error("Duplicate stream: manifest url {url} is already monitored")]
    DuplicateStream { url: String },

    /// Persistence layer errors
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Persistence layer specific errors
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Filesystem failures while reading or writing the streams document
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The streams document is not valid JSON
    #[error("Malformed streams document {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl AppError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        AppError::Validation {
            message: message.into(),
        }
    }

    pub fn not_found<R: Into<String>, I: Into<String>>(resource: R, id: I) -> Self {
        AppError::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        AppError::Internal {
            message: message.into(),
        }
    }
}

/// Convenience result type for application operations
pub type AppResult<T> = Result<T, AppError>;
