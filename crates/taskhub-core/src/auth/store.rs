use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use keyring::Entry;
use tracing::{debug, warn};

/// Fixed key the bearer token is persisted under
pub const TOKEN_KEY: &str = "token";

/// Keychain service name for the keyring-backed store
const SERVICE_NAME: &str = "taskhub";

/// Persistence for the single bearer token string.
///
/// Implementations accept and return any string unchanged. Storage failures
/// are logged and swallowed: a failed read reports the token as absent.
pub trait TokenStore: Send + Sync {
    fn get(&self) -> Option<String>;
    fn set(&self, token: &str);
    fn clear(&self);
}

/// Token kept in process memory only.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    slot: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(token.into())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Option<String> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set(&self, token: &str) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.to_string());
    }

    fn clear(&self) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Token persisted as a plain file named after [`TOKEN_KEY`] inside a data directory.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(TOKEN_KEY),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path).context("Failed to read token file")?;
        Ok(Some(contents))
    }

    fn write(&self, token: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create data directory")?;
        }
        std::fs::write(&self.path, token).context("Failed to write token file")?;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).context("Failed to remove token file")?;
        }
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> Option<String> {
        match self.read() {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, path = ?self.path, "Token file unreadable, treating as absent");
                None
            }
        }
    }

    fn set(&self, token: &str) {
        if let Err(e) = self.write(token) {
            warn!(error = %e, path = ?self.path, "Failed to persist token");
        } else {
            debug!(path = ?self.path, "Token persisted");
        }
    }

    fn clear(&self) {
        if let Err(e) = self.remove() {
            warn!(error = %e, path = ?self.path, "Failed to remove token");
        }
    }
}

/// Token kept in the OS keychain under a fixed service/account pair.
pub struct KeyringTokenStore {
    account: String,
}

impl KeyringTokenStore {
    pub fn new() -> Self {
        Self {
            account: TOKEN_KEY.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &self.account).context("Failed to create keyring entry")
    }
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore for KeyringTokenStore {
    fn get(&self) -> Option<String> {
        let entry = match self.entry() {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Keychain unavailable, treating token as absent");
                return None;
            }
        };
        match entry.get_password() {
            Ok(token) => Some(token),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read token from keychain");
                None
            }
        }
    }

    fn set(&self, token: &str) {
        let result = self
            .entry()
            .and_then(|entry| entry.set_password(token).context("Failed to store token in keychain"));
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist token");
        }
    }

    fn clear(&self) {
        let result = self.entry().and_then(|entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete token from keychain"),
        });
        if let Err(e) = result {
            warn!(error = %e, "Failed to remove token");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.get(), None);
        store.set("not-even-a-jwt");
        assert_eq!(store.get().as_deref(), Some("not-even-a-jwt"));
        store.clear();
        assert_eq!(store.get(), None);
        store.clear();
        assert_eq!(store.get(), None);
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("taskhub");

        let store = FileTokenStore::new(&nested);
        assert_eq!(store.get(), None);
        store.set("a.b.c");
        assert!(store.path().ends_with(TOKEN_KEY));

        let reopened = FileTokenStore::new(&nested);
        assert_eq!(reopened.get().as_deref(), Some("a.b.c"));

        reopened.clear();
        assert_eq!(store.get(), None);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_file_store_returns_value_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());
        store.set("  spaced token\n");
        assert_eq!(store.get().as_deref(), Some("  spaced token\n"));
    }
}
