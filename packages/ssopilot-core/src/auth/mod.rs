//! Credentials for the sign-in screens and operator prompts.

pub mod credentials;
pub mod prompt;

pub use credentials::{
    default_store, CredentialField, CredentialManager, CredentialSource, CredentialStore,
    Credentials, FileStore, StoredCredentials,
};
#[cfg(feature = "keyring-storage")]
pub use credentials::KeyringStore;
pub use prompt::{Prompter, TerminalPrompter};
