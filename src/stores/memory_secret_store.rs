use crate::errors::{BrokerError, BrokerResult};
use crate::models::SecretValue;
use crate::stores::SecretStore;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

#[derive(Clone, Default)]
pub struct MemorySecretStore {
    scopes: Arc<RwLock<HashMap<String, BTreeMap<String, SecretValue>>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn put(&self, scope: &str, key: &str, value: &SecretValue) -> BrokerResult<()> {
        let mut guard = self.scopes.write().unwrap_or_else(|err| err.into_inner());
        guard
            .entry(scope.to_string())
            .or_default()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn get(&self, scope: &str, key: &str) -> BrokerResult<SecretValue> {
        let guard = self.scopes.read().unwrap_or_else(|err| err.into_inner());
        guard
            .get(scope)
            .and_then(|entries| entries.get(key))
            .cloned()
            .ok_or_else(|| BrokerError::not_found("secret", format!("{}/{}", scope, key)))
    }

    async fn delete(&self, scope: &str, key: &str) -> BrokerResult<bool> {
        let mut guard = self.scopes.write().unwrap_or_else(|err| err.into_inner());
        Ok(guard
            .get_mut(scope)
            .map(|entries| entries.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn list(&self, scope: &str) -> BrokerResult<Vec<String>> {
        let guard = self.scopes.read().unwrap_or_else(|err| err.into_inner());
        Ok(guard
            .get(scope)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }
}
