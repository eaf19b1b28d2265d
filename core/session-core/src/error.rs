//! Error types for session-core.
//!
//! Engine operations themselves never fail; invalid-state calls are silent
//! no-ops. These errors cover the edges the crate owns: configuration files
//! and archived session payloads.

use std::path::PathBuf;

/// All errors that can occur in session-core operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Archive Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Archived session payload is invalid: {context}: {source}")]
    Payload {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type alias for session-core operations.
pub type Result<T> = std::result::Result<T, SessionError>;
