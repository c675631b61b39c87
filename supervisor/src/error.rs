//! Supervisor-specific error types

use shared::SharedError;
use thiserror::Error;

/// Errors from `spawn()`. Configuration errors are surfaced to the caller
/// and never retried automatically.
#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("server is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("server {field} is not configured")]
    NotConfigured { field: &'static str },

    #[error("failed to launch server process: {0}")]
    LaunchFailed(#[from] std::io::Error),
}

/// Errors from `kill()`. Killing an already-stopped server is a no-op
/// success, not an error.
#[derive(Error, Debug)]
pub enum KillError {
    #[error("failed to terminate server process (pid {pid}): {source}")]
    TerminateFailed {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from `restart()`, keeping the failed step distinct so callers can
/// tell "still running" from "stopped but did not come back".
#[derive(Error, Debug)]
pub enum RestartError {
    #[error("restart failed during kill step: {0}")]
    Kill(#[from] KillError),

    #[error("restart failed during spawn step: {0}")]
    Spawn(#[from] SpawnError),
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error(transparent)]
    Kill(#[from] KillError),

    #[error(transparent)]
    Restart(#[from] RestartError),

    #[error("Shared component error: {0}")]
    Shared(#[from] SharedError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {field}")]
    Configuration { field: String },
}

impl SupervisorError {
    pub fn config(field: impl Into<String>) -> Self {
        Self::Configuration { field: field.into() }
    }
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;
