//! Credential storage with platform keyring and file-based fallback.
//!
//! Storage priority:
//! 1. Platform keyring (if `keyring-storage` feature enabled and available)
//! 2. File-based storage (0600 JSON file in the config directory)
//!
//! Entries are kept per AWS profile, one secret per field.

use super::prompt::Prompter;
use crate::error::{LoginError, LoginResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

#[cfg(feature = "keyring-storage")]
use keyring::Entry;

/// Service name used for keyring storage
#[cfg(feature = "keyring-storage")]
const KEYRING_SERVICE: &str = "aws_sso_login";

/// Which secret of a profile an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialField {
    Email,
    Password,
}

impl CredentialField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialField::Email => "email",
            CredentialField::Password => "password",
        }
    }
}

/// Whatever is stored for one profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredCredentials {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Email and password ready to be typed into the sign-in page.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Secure local secret store.
pub trait CredentialStore: Send + Sync {
    fn get(&self, profile: &str) -> Result<StoredCredentials>;

    fn set(&self, profile: &str, field: CredentialField, value: &str) -> Result<()>;

    fn delete(&self, profile: &str) -> Result<()>;

    /// Human-readable location, for `ssopilot config`.
    fn describe(&self) -> String;
}

// ============================================================================
// File-based credential storage (always available)
// ============================================================================

type FileContents = BTreeMap<String, BTreeMap<CredentialField, String>>;

/// Credentials in a JSON file readable only by the owner.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `~/.config/ssopilot/.credentials`
    pub fn default_location() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .context("Failed to find config directory")?;
        Ok(Self::new(config_dir.join("ssopilot").join(".credentials")))
    }

    fn load(&self) -> Result<FileContents> {
        if !self.path.exists() {
            return Ok(FileContents::new());
        }
        let content = fs::read_to_string(&self.path).context("Failed to read credentials file")?;
        serde_json::from_str(&content).context("Failed to parse credentials file")
    }

    fn save(&self, contents: &FileContents) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }
        let json = serde_json::to_string(contents).context("Failed to serialize credentials")?;

        // Set restrictive permissions on Unix before writing
        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600) // Owner read/write only
                .open(&self.path)
                .context("Failed to create credentials file")?;
            let mut file = std::io::BufWriter::new(file);
            file.write_all(json.as_bytes())
                .context("Failed to write credentials")?;
            file.flush().context("Failed to write credentials")?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&self.path, &json).context("Failed to write credentials file")?;
        }

        tracing::debug!("Credentials saved to file: {:?}", self.path);
        Ok(())
    }
}

impl CredentialStore for FileStore {
    fn get(&self, profile: &str) -> Result<StoredCredentials> {
        let contents = self.load()?;
        let entry = contents.get(profile);
        Ok(StoredCredentials {
            email: entry.and_then(|e| e.get(&CredentialField::Email)).cloned(),
            password: entry.and_then(|e| e.get(&CredentialField::Password)).cloned(),
        })
    }

    fn set(&self, profile: &str, field: CredentialField, value: &str) -> Result<()> {
        let mut contents = self.load()?;
        contents
            .entry(profile.to_string())
            .or_default()
            .insert(field, value.to_string());
        self.save(&contents)
    }

    fn delete(&self, profile: &str) -> Result<()> {
        let mut contents = self.load()?;
        if contents.remove(profile).is_some() {
            if contents.is_empty() {
                fs::remove_file(&self.path).context("Failed to delete credentials file")?;
            } else {
                self.save(&contents)?;
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("File-based storage: {}", self.path.display())
    }
}

// ============================================================================
// Keyring-based credential storage (optional, platform-specific)
// ============================================================================

#[cfg(feature = "keyring-storage")]
pub struct KeyringStore {
    fallback: FileStore,
}

#[cfg(feature = "keyring-storage")]
impl KeyringStore {
    pub fn new(fallback: FileStore) -> Self {
        Self { fallback }
    }

    fn entry(profile: &str, field: CredentialField) -> Result<Entry> {
        let user = format!("{}:{}", profile, field.as_str());
        tracing::trace!(
            "Creating keyring entry for service='{}', user='{}'",
            KEYRING_SERVICE,
            user
        );
        Entry::new(KEYRING_SERVICE, &user)
            .map_err(|e| anyhow::anyhow!("Failed to create keyring entry: {}", e))
    }

    fn get_field(&self, profile: &str, field: CredentialField) -> Result<Option<String>> {
        let entry = match Self::entry(profile, field) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("{}, trying file fallback", e);
                return Ok(self.fallback.get(profile)?.field(field));
            }
        };

        match entry.get_password() {
            Ok(value) => {
                tracing::debug!("{} for '{}' loaded from keyring", field.as_str(), profile);
                Ok(Some(value))
            }
            Err(keyring::Error::NoEntry) => {
                tracing::debug!("No {} in keyring, trying file fallback", field.as_str());
                Ok(self.fallback.get(profile)?.field(field))
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load {} from keyring: {}, trying file fallback",
                    field.as_str(),
                    e
                );
                Ok(self.fallback.get(profile)?.field(field))
            }
        }
    }
}

#[cfg(feature = "keyring-storage")]
impl StoredCredentials {
    fn field(self, field: CredentialField) -> Option<String> {
        match field {
            CredentialField::Email => self.email,
            CredentialField::Password => self.password,
        }
    }
}

#[cfg(feature = "keyring-storage")]
impl CredentialStore for KeyringStore {
    fn get(&self, profile: &str) -> Result<StoredCredentials> {
        Ok(StoredCredentials {
            email: self.get_field(profile, CredentialField::Email)?,
            password: self.get_field(profile, CredentialField::Password)?,
        })
    }

    fn set(&self, profile: &str, field: CredentialField, value: &str) -> Result<()> {
        let entry = match Self::entry(profile, field) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("{}, using file storage", e);
                return self.fallback.set(profile, field, value);
            }
        };

        if let Err(e) = entry.set_password(value) {
            tracing::warn!(
                "Failed to save {} to keyring: {}, using file storage",
                field.as_str(),
                e
            );
            return self.fallback.set(profile, field, value);
        }

        // Verify the save worked
        match Self::entry(profile, field)?.get_password() {
            Ok(stored) if stored == value => {
                tracing::debug!("{} verified in keyring after save", field.as_str());
                Ok(())
            }
            Ok(_) | Err(keyring::Error::NoEntry) => {
                tracing::warn!("Keyring did not keep {}, using file storage", field.as_str());
                self.fallback.set(profile, field, value)
            }
            Err(e) => {
                tracing::warn!("Could not verify {} after save: {}", field.as_str(), e);
                Ok(())
            }
        }
    }

    fn delete(&self, profile: &str) -> Result<()> {
        // Always delete from file as well
        self.fallback.delete(profile)?;

        for field in [CredentialField::Email, CredentialField::Password] {
            match Self::entry(profile, field)?.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(e) => {
                    return Err(anyhow::anyhow!(
                        "Failed to delete {} from keyring: {}",
                        field.as_str(),
                        e
                    ));
                }
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        #[cfg(target_os = "windows")]
        let platform = "Windows Credential Manager";
        #[cfg(target_os = "macos")]
        let platform = "macOS Keychain";
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        let platform = "Linux Secret Service (GNOME Keyring/KWallet)";

        format!("{} (with file fallback {})", platform, self.fallback.path.display())
    }
}

/// The store selected by the enabled features.
pub fn default_store() -> Result<Arc<dyn CredentialStore>> {
    let file = FileStore::default_location()?;

    #[cfg(all(feature = "keyring-storage", not(feature = "file-storage")))]
    {
        Ok(Arc::new(KeyringStore::new(file)))
    }

    #[cfg(not(all(feature = "keyring-storage", not(feature = "file-storage"))))]
    {
        Ok(Arc::new(file))
    }
}

// ============================================================================
// Credential collaborator used by the sign-in step
// ============================================================================

#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Stored credentials for `profile`, prompting for whatever is missing.
    /// `force_refresh` re-prompts the password even when one is stored.
    async fn get_credentials(&self, profile: &str, force_refresh: bool) -> LoginResult<Credentials>;
}

/// Store-backed [`CredentialSource`] that prompts on first use.
pub struct CredentialManager {
    store: Arc<dyn CredentialStore>,
    prompter: Arc<dyn Prompter>,
}

impl CredentialManager {
    pub fn new(store: Arc<dyn CredentialStore>, prompter: Arc<dyn Prompter>) -> Self {
        Self { store, prompter }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Delete everything stored for `profile`.
    pub fn forget(&self, profile: &str) -> LoginResult<()> {
        self.store
            .delete(profile)
            .map_err(|e| LoginError::Credentials(format!("{:#}", e)))?;
        tracing::info!("Deleted stored credentials for profile '{}'", profile);
        Ok(())
    }
}

fn store_error(e: anyhow::Error) -> LoginError {
    LoginError::Credentials(format!("{:#}", e))
}

#[async_trait]
impl CredentialSource for CredentialManager {
    async fn get_credentials(&self, profile: &str, force_refresh: bool) -> LoginResult<Credentials> {
        let stored = self.store.get(profile).map_err(store_error)?;

        let email = match stored.email {
            Some(email) => email,
            None => {
                let email = self.prompter.email(profile).await?;
                self.store
                    .set(profile, CredentialField::Email, &email)
                    .map_err(store_error)?;
                email
            }
        };

        let password = match stored.password {
            Some(password) if !force_refresh => password,
            _ => {
                let password = self.prompter.password(profile).await?;
                self.store
                    .set(profile, CredentialField::Password, &password)
                    .map_err(store_error)?;
                tracing::info!("Password updated successfully.");
                password
            }
        };

        Ok(Credentials { email, password })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryStore, ScriptedPrompter};

    #[test]
    fn test_file_store_roundtrip_per_profile() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested").join(".credentials"));

        assert_eq!(store.get("prod").unwrap(), StoredCredentials::default());
        store.set("prod", CredentialField::Email, "me@example.com").unwrap();
        store.set("prod", CredentialField::Password, "hunter2").unwrap();
        store.set("dev", CredentialField::Email, "dev@example.com").unwrap();

        let prod = store.get("prod").unwrap();
        assert_eq!(prod.email.as_deref(), Some("me@example.com"));
        assert_eq!(prod.password.as_deref(), Some("hunter2"));
        assert_eq!(store.get("dev").unwrap().password, None);

        store.delete("prod").unwrap();
        assert_eq!(store.get("prod").unwrap(), StoredCredentials::default());
        assert!(store.get("dev").unwrap().email.is_some());
    }

    #[test]
    fn test_file_store_writes_fields_in_stable_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".credentials");
        let store = FileStore::new(path.clone());
        store.set("prod", CredentialField::Password, "hunter2").unwrap();
        store.set("prod", CredentialField::Email, "me@example.com").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let email = content.find("\"email\"").unwrap();
        let password = content.find("\"password\"").unwrap();
        assert!(email < password);
        assert!(CredentialField::Email < CredentialField::Password);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".credentials");
        FileStore::new(path.clone())
            .set("prod", CredentialField::Email, "me@example.com")
            .unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_prompts_once_then_uses_store() {
        let store = Arc::new(MemoryStore::default());
        let prompter = Arc::new(ScriptedPrompter::new().with_email("me@example.com").with_password("s3cret"));
        let manager = CredentialManager::new(store.clone(), prompter.clone());

        let first = manager.get_credentials("prod", false).await.unwrap();
        assert_eq!(first.email, "me@example.com");
        assert_eq!(first.password, "s3cret");

        let second = manager.get_credentials("prod", false).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(prompter.email_prompts(), 1);
        assert_eq!(prompter.password_prompts(), 1);
    }

    #[tokio::test]
    async fn test_force_refresh_reprompts_password_only() {
        let store = Arc::new(MemoryStore::default());
        store.set("prod", CredentialField::Email, "me@example.com").unwrap();
        store.set("prod", CredentialField::Password, "old").unwrap();
        let prompter = Arc::new(ScriptedPrompter::new().with_password("new"));
        let manager = CredentialManager::new(store.clone(), prompter.clone());

        let creds = manager.get_credentials("prod", true).await.unwrap();
        assert_eq!(creds.password, "new");
        assert_eq!(store.get("prod").unwrap().password.as_deref(), Some("new"));
        assert_eq!(prompter.email_prompts(), 0);
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials {
            email: "me@example.com".into(),
            password: "hunter2".into(),
        };
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("me@example.com"));
    }
}
