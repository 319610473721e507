//! review-mirror - Keeps git-notes code reviews and a remote review tool in sync.
//!
//! The library holds the reconciliation engine used by the `review-mirror`
//! binary: local review assembly from git notes, comment deduplication,
//! report translation, the per-review diff reconciler and the sync loop.

pub mod arcanist;
pub mod cli;
pub mod commands;
pub mod config;
pub mod mirror;
pub mod models;
pub mod review;
pub mod storage;

/// Test utilities shared by unit tests: an in-memory repository and a
/// recording remote API.
#[cfg(test)]
pub(crate) mod test_utils;

/// Library-level error type for mirror operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("git error: {0}")]
    Git(String),

    #[error("conduit call {method} failed ({code}): {message}")]
    Conduit {
        method: String,
        code: String,
        message: String,
    },

    #[error("conduit call {method} timed out after {secs}s")]
    Timeout { method: String, secs: u64 },

    #[error("malformed response from {method}: {reason}")]
    MalformedResponse { method: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for mirror operations.
pub type Result<T> = std::result::Result<T, Error>;
