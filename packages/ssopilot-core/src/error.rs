//! Error types for the login flow.

use std::time::Duration;
use thiserror::Error;

use crate::browser::BrowserError;

/// Failures that end a login run.
///
/// Transient misses inside a polling pass never surface here; they are
/// folded into [`crate::steps::StepOutcome`] and recovered locally.
#[derive(Debug, Error)]
pub enum LoginError {
    /// The authorization CLI never printed a recognizable login URL.
    #[error("SSO login URL not found in CLI output: {0}")]
    UrlNotFound(String),

    /// The overall login deadline elapsed.
    #[error("login did not complete within {}s", .0.as_secs())]
    Timeout(Duration),

    /// The run was cancelled (Ctrl+C / SIGTERM).
    #[error("login cancelled")]
    Cancelled,

    /// Failed to spawn or talk to the authorization CLI.
    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The authorization CLI exited unsuccessfully while its exit code
    /// decided the run.
    #[error("authorization CLI failed: {0}")]
    CliExit(String),

    /// The browser session could not be created or used.
    #[error(transparent)]
    Browser(#[from] BrowserError),

    /// Credentials could not be loaded or stored.
    #[error("credential store error: {0}")]
    Credentials(String),

    /// Reading operator input failed.
    #[error("prompt failed: {0}")]
    Prompt(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for login operations.
pub type LoginResult<T> = Result<T, LoginError>;
