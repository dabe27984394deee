//! ssopilot Core Library
//!
//! This crate automates the AWS SSO device-authorization login:
//! - Login-URL extraction from `aws sso login --no-browser`
//! - Browser session management over WebDriver (chromedriver)
//! - Step handlers for the confirmation, sign-in, MFA and allow-access screens
//! - A polling orchestrator with stall detection and page refresh
//! - Credential management (keyring with file fallback)
//!
//! # Features
//!
//! - `keyring-storage` (default): Use platform keyring for credential storage
//! - `file-storage`: Use file-based credential storage (for headless Linux)
//! - `open-browser` (default): Open the login URL in the system browser for manual logins
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ssopilot_core::auth::{default_store, CredentialManager, TerminalPrompter};
//! use ssopilot_core::{load_login_config, LoginRequest, LoginRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_login_config();
//!     let prompter = Arc::new(TerminalPrompter);
//!     let credentials = Arc::new(CredentialManager::new(default_store()?, prompter.clone()));
//!
//!     let runner = LoginRunner::new(config, credentials, prompter);
//!     let report = runner.login(&LoginRequest::new("prod", Duration::from_secs(300))).await?;
//!     println!("Logged in after {} passes", report.passes);
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod browser;
pub mod config;
pub mod error;
pub mod extractor;
pub mod login;
pub mod orchestrator;
pub mod session;
pub mod steps;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::{load_login_config, BackoffPolicy, ConfigSource, LoginConfig, ProcessPolicy};
pub use error::{LoginError, LoginResult};
pub use extractor::{LoginUrl, UrlExtractor};
pub use login::{LoginReport, LoginRunner};
pub use session::{LoginRequest, TerminalStatus};
pub use steps::{StepId, StepOutcome};
