// src/errors.rs

//! Crate-wide error type and result alias.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::session::SessionState;

#[derive(Error, Debug)]
pub enum LiverunError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// The executable is missing or not runnable.
    #[error("failed to start '{program}': {source}")]
    SpawnError {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Input could not be handed to a process.
    #[error("write to process input failed: {0}")]
    WriteError(String),

    #[error("workspace error at {}: {source}", path.display())]
    WorkspaceError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("session is busy ({0}); wait for the current program to finish")]
    SessionBusy(SessionState),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// A child ignored SIGTERM past the grace period.
    #[error("process {pid} did not terminate within {timeout:?}")]
    TerminationTimeout { pid: u32, timeout: Duration },

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LiverunError {
    /// Short machine-readable tag used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            LiverunError::ConfigError(_) => "config",
            LiverunError::IoError(_) => "io",
            LiverunError::TomlError(_) => "config",
            LiverunError::SpawnError { .. } => "spawn",
            LiverunError::WriteError(_) => "write",
            LiverunError::WorkspaceError { .. } => "io",
            LiverunError::SessionBusy(_) => "session_busy",
            LiverunError::UnsupportedLanguage(_) => "unsupported_language",
            LiverunError::TerminationTimeout { .. } => "termination_timeout",
            LiverunError::ProtocolError(_) | LiverunError::JsonError(_) => "protocol",
            LiverunError::Other(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, LiverunError>;
