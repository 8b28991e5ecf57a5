use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretStoreError {
    /// Locked keychain, denied access or a platform failure. Never "not found".
    #[error("secret store unavailable: {0}")]
    Unavailable(String),
}

/// Platform secret store keyed by `(service, account)`.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, service: &str, account: &str) -> Result<Option<String>, SecretStoreError>;
    async fn set(&self, service: &str, account: &str, secret: &str)
        -> Result<(), SecretStoreError>;
}

/// OS keychain (macOS Keychain, Secret Service, Windows Credential Manager).
#[derive(Debug, Default, Clone)]
pub struct KeyringSecretStore;

impl KeyringSecretStore {
    pub fn new() -> Self {
        Self
    }
}

fn map_keyring_error(err: keyring::Error) -> SecretStoreError {
    SecretStoreError::Unavailable(err.to_string())
}

#[async_trait]
impl SecretStore for KeyringSecretStore {
    async fn get(&self, service: &str, account: &str) -> Result<Option<String>, SecretStoreError> {
        let service = service.to_string();
        let account = account.to_string();
        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, &account).map_err(map_keyring_error)?;
            match entry.get_password() {
                Ok(value) => Ok(Some(value)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(err) => Err(map_keyring_error(err)),
            }
        })
        .await
        .map_err(|err| SecretStoreError::Unavailable(format!("keychain task failed: {}", err)))?
    }

    async fn set(
        &self,
        service: &str,
        account: &str,
        secret: &str,
    ) -> Result<(), SecretStoreError> {
        let service = service.to_string();
        let account = account.to_string();
        let secret = secret.to_string();
        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, &account).map_err(map_keyring_error)?;
            entry.set_password(&secret).map_err(map_keyring_error)
        })
        .await
        .map_err(|err| SecretStoreError::Unavailable(format!("keychain task failed: {}", err)))?
    }
}

/// In-process store. Used by `--no-keychain` and by tests.
#[derive(Debug, Default, Clone)]
pub struct MemorySecretStore {
    entries: Arc<Mutex<HashMap<(String, String), String>>>,
    unavailable: Option<String>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, service: &str, account: &str, secret: &str) -> Self {
        if let Ok(mut guard) = self.entries.lock() {
            guard.insert((service.to_string(), account.to_string()), secret.to_string());
        }
        self
    }

    /// Every call fails as if the keychain were locked.
    pub fn unavailable(reason: &str) -> Self {
        Self {
            entries: Arc::default(),
            unavailable: Some(reason.to_string()),
        }
    }

    fn check(&self) -> Result<(), SecretStoreError> {
        match &self.unavailable {
            Some(reason) => Err(SecretStoreError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, service: &str, account: &str) -> Result<Option<String>, SecretStoreError> {
        self.check()?;
        let guard = self
            .entries
            .lock()
            .map_err(|_| SecretStoreError::Unavailable("memory store poisoned".to_string()))?;
        Ok(guard
            .get(&(service.to_string(), account.to_string()))
            .cloned())
    }

    async fn set(
        &self,
        service: &str,
        account: &str,
        secret: &str,
    ) -> Result<(), SecretStoreError> {
        self.check()?;
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| SecretStoreError::Unavailable("memory store poisoned".to_string()))?;
        guard.insert((service.to_string(), account.to_string()), secret.to_string());
        Ok(())
    }
}
