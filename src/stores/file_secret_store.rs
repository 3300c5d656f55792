use crate::errors::{BrokerError, BrokerResult};
use crate::models::SecretValue;
use crate::services::security::Security;
use crate::stores::SecretStore;
use crate::utils::fs_atomic::atomic_write_text_file;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

type Sealed = BTreeMap<String, BTreeMap<String, String>>;

/// Secret vault persisted as one JSON document of sealed values, keyed by
/// scope then key. Plaintext never touches disk.
#[derive(Clone)]
pub struct FileSecretStore {
    security: Security,
    file_path: PathBuf,
    sealed: Arc<Mutex<Sealed>>,
}

impl FileSecretStore {
    pub fn open(file_path: impl Into<PathBuf>, security: Security) -> BrokerResult<Self> {
        let file_path = file_path.into();
        let sealed = Self::load_from_disk(&file_path)?;
        Ok(Self {
            security,
            file_path,
            sealed: Arc::new(Mutex::new(sealed)),
        })
    }

    fn load_from_disk(path: &Path) -> BrokerResult<Sealed> {
        if !path.exists() {
            return Ok(Sealed::new());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|err| BrokerError::store(format!("failed to load secret store: {}", err)))?;
        if raw.trim().is_empty() {
            return Ok(Sealed::new());
        }
        serde_json::from_str(&raw)
            .map_err(|err| BrokerError::store(format!("failed to parse secret store: {}", err)))
    }

    fn persist(&self, sealed: &Sealed) -> BrokerResult<()> {
        let payload = serde_json::to_string_pretty(sealed)
            .map_err(|err| BrokerError::store(format!("failed to serialize secret store: {}", err)))?;
        atomic_write_text_file(&self.file_path, &format!("{}\n", payload), 0o600)
            .map_err(|err| BrokerError::store(format!("failed to persist secret store: {}", err)))
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn put(&self, scope: &str, key: &str, value: &SecretValue) -> BrokerResult<()> {
        let ciphertext = self.security.encrypt(value.expose())?;
        let mut guard = self.sealed.lock().unwrap_or_else(|err| err.into_inner());
        let previous = guard
            .entry(scope.to_string())
            .or_default()
            .insert(key.to_string(), ciphertext);
        if let Err(err) = self.persist(&guard) {
            let scope_map = guard.entry(scope.to_string()).or_default();
            match previous {
                Some(old) => {
                    scope_map.insert(key.to_string(), old);
                }
                None => {
                    scope_map.remove(key);
                }
            }
            return Err(err);
        }
        Ok(())
    }

    async fn get(&self, scope: &str, key: &str) -> BrokerResult<SecretValue> {
        let ciphertext = {
            let guard = self.sealed.lock().unwrap_or_else(|err| err.into_inner());
            guard.get(scope).and_then(|entries| entries.get(key)).cloned()
        };
        let ciphertext =
            ciphertext.ok_or_else(|| BrokerError::not_found("secret", format!("{}/{}", scope, key)))?;
        let plain = self.security.decrypt(&ciphertext)?;
        Ok(SecretValue::new(plain.as_str()))
    }

    async fn delete(&self, scope: &str, key: &str) -> BrokerResult<bool> {
        let mut guard = self.sealed.lock().unwrap_or_else(|err| err.into_inner());
        let removed = match guard.get_mut(scope) {
            Some(entries) => entries.remove(key),
            None => None,
        };
        let Some(old) = removed else {
            return Ok(false);
        };
        if guard.get(scope).map(|entries| entries.is_empty()).unwrap_or(false) {
            guard.remove(scope);
        }
        if let Err(err) = self.persist(&guard) {
            guard
                .entry(scope.to_string())
                .or_default()
                .insert(key.to_string(), old);
            return Err(err);
        }
        Ok(true)
    }

    async fn list(&self, scope: &str) -> BrokerResult<Vec<String>> {
        let guard = self.sealed.lock().unwrap_or_else(|err| err.into_inner());
        Ok(guard
            .get(scope)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }
}
