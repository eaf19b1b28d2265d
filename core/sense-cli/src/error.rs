use session_core::SessionError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to connect to daemon socket {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Timed out waiting for daemon response")]
    Timeout,

    #[error("Daemon response was empty")]
    EmptyResponse,

    #[error("Daemon response exceeded maximum size")]
    ResponseTooLarge,

    #[error("Daemon error {code}: {message}")]
    Daemon { code: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] SessionError),

    #[error("Backend unreachable after {attempts} reconnect attempt(s)")]
    BackendUnreachable { attempts: u32 },
}

pub type Result<T> = std::result::Result<T, CliError>;
