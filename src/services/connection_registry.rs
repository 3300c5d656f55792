use crate::errors::{BrokerError, BrokerResult};
use crate::models::{Connection, ConnectionSpec, EntryFilter, SecretValue};
use crate::services::credential_context::CredentialContext;
use crate::services::logger::Logger;
use crate::services::validation::Validation;
use crate::stores::{MetadataStore, SecretStore};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<String, Arc<Mutex<()>>>;

/// Exclusive hold on one connection name. Mutations of that name go through
/// the `*_locked` methods while this guard is alive.
pub struct NameLock {
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
    mutex: Arc<Mutex<()>>,
    table: Arc<LockTable>,
}

impl NameLock {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NameLock {
    fn drop(&mut self) {
        self.guard.take();
        // Two handles left means the table and this lock; nobody is waiting.
        self.table.remove_if(&self.name, |_, mutex| {
            Arc::ptr_eq(mutex, &self.mutex) && Arc::strong_count(mutex) == 2
        });
    }
}

/// A stored connection together with its credential, as read under the
/// name's lock.
pub struct StoredConnection {
    pub connection: Connection,
    secret: Option<SecretValue>,
}

/// Connection CRUD plus the secret writes coupled to it.
pub struct ConnectionRegistry {
    logger: Logger,
    validation: Validation,
    metadata: Arc<dyn MetadataStore>,
    secrets: Arc<dyn SecretStore>,
    locks: Arc<LockTable>,
}

impl ConnectionRegistry {
    pub fn new(
        logger: Logger,
        metadata: Arc<dyn MetadataStore>,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            logger: logger.child("connections"),
            validation: Validation::new(),
            metadata,
            secrets,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub async fn lock_name(&self, name: &str) -> NameLock {
        let mutex = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.clone().lock_owned().await;
        NameLock {
            name: name.to_string(),
            guard: Some(guard),
            mutex,
            table: self.locks.clone(),
        }
    }

    pub async fn create_connection(
        &self,
        spec: ConnectionSpec,
        credentials: &CredentialContext,
    ) -> BrokerResult<Connection> {
        let lock = self.lock_name(spec.name.trim()).await;
        self.create_locked(&lock, spec, credentials).await
    }

    pub async fn replace_connection(
        &self,
        spec: ConnectionSpec,
        credentials: &CredentialContext,
    ) -> BrokerResult<Connection> {
        let lock = self.lock_name(spec.name.trim()).await;
        self.replace_locked(&lock, spec, credentials).await
    }

    /// Idempotent. Returns whether a connection was removed.
    pub async fn drop_connection(&self, name: &str) -> BrokerResult<bool> {
        let lock = self.lock_name(name.trim()).await;
        self.drop_locked(&lock).await
    }

    pub async fn resolve(&self, name: &str) -> BrokerResult<Connection> {
        self.metadata
            .get_connection(name)
            .await?
            .ok_or_else(|| BrokerError::not_found("connection", name))
    }

    pub async fn list(&self) -> BrokerResult<Vec<Connection>> {
        self.metadata.list_connections().await
    }

    /// Reads the stored credential for `connection`. `None` for flavor none.
    pub(crate) async fn load_secret(&self, connection: &Connection) -> BrokerResult<Option<SecretValue>> {
        let (Some(scope), Some(key)) = (&connection.secret_scope, &connection.secret_key) else {
            return Ok(None);
        };
        match self.secrets.get(scope, key).await {
            Ok(secret) => Ok(Some(secret)),
            Err(BrokerError::NotFound { .. }) => Err(BrokerError::MissingCredential {
                name: connection.name.clone(),
                flavor: connection.auth_flavor.as_str(),
            }),
            Err(err) => Err(err),
        }
    }

    pub async fn create_locked(
        &self,
        lock: &NameLock,
        spec: ConnectionSpec,
        credentials: &CredentialContext,
    ) -> BrokerResult<Connection> {
        let connection = self.prepare(lock, spec)?;
        if self.metadata.get_connection(&connection.name).await?.is_some() {
            return Err(BrokerError::duplicate("connection", &connection.name));
        }
        let secret = self.take_secret(&connection, credentials)?;
        self.write(&connection, secret.as_ref()).await?;
        self.logger.info(
            "connection created",
            Some(&serde_json::json!({
                "name": connection.name,
                "auth_flavor": connection.auth_flavor,
                "secret_scope": connection.secret_scope,
            })),
        );
        Ok(connection)
    }

    /// Drop + create under one lock. All inputs are checked and the
    /// credential taken before anything is removed; if the new write fails
    /// the previous connection and secret are put back.
    pub async fn replace_locked(
        &self,
        lock: &NameLock,
        spec: ConnectionSpec,
        credentials: &CredentialContext,
    ) -> BrokerResult<Connection> {
        let connection = self.prepare(lock, spec)?;
        let secret = self.take_secret(&connection, credentials)?;

        let previous = self.snapshot_locked(lock).await?;
        if let Some(old) = &previous {
            self.remove(&old.connection).await?;
        }

        if let Err(err) = self.write(&connection, secret.as_ref()).await {
            if let Some(old) = &previous {
                if let Err(restore_err) = self.write(&old.connection, old.secret.as_ref()).await {
                    self.logger.error(
                        "failed to restore connection after replace",
                        Some(&serde_json::json!({
                            "name": old.connection.name,
                            "error": restore_err.to_string(),
                        })),
                    );
                }
            }
            return Err(err);
        }
        self.logger.info(
            "connection replaced",
            Some(&serde_json::json!({
                "name": connection.name,
                "auth_flavor": connection.auth_flavor,
                "previous_flavor": previous.as_ref().map(|old| old.connection.auth_flavor),
            })),
        );
        Ok(connection)
    }

    /// Reads the connection and its credential. A credential that is already
    /// missing reads as `None`; any other store failure is returned.
    pub async fn snapshot_locked(&self, lock: &NameLock) -> BrokerResult<Option<StoredConnection>> {
        let Some(connection) = self.metadata.get_connection(lock.name()).await? else {
            return Ok(None);
        };
        let secret = match self.load_secret(&connection).await {
            Ok(secret) => secret,
            Err(BrokerError::MissingCredential { .. }) => None,
            Err(err) => return Err(err),
        };
        Ok(Some(StoredConnection { connection, secret }))
    }

    /// Puts a snapshot back in place of whatever the name holds now.
    pub async fn restore_locked(&self, lock: &NameLock, previous: &StoredConnection) -> BrokerResult<()> {
        if let Some(current) = self.metadata.get_connection(lock.name()).await? {
            self.remove(&current).await?;
        }
        self.write(&previous.connection, previous.secret.as_ref()).await?;
        self.logger.info(
            "connection restored",
            Some(&serde_json::json!({
                "name": previous.connection.name,
                "auth_flavor": previous.connection.auth_flavor,
            })),
        );
        Ok(())
    }

    /// Fails with `ConnectionInUse` while a registry entry references the
    /// connection.
    pub async fn drop_locked(&self, lock: &NameLock) -> BrokerResult<bool> {
        let Some(existing) = self.metadata.get_connection(lock.name()).await? else {
            return Ok(false);
        };
        let referencing = self
            .metadata
            .list_entries(&EntryFilter::by_connection(lock.name()))
            .await?;
        if !referencing.is_empty() {
            return Err(BrokerError::ConnectionInUse {
                name: existing.name,
                api_ids: referencing.into_iter().map(|entry| entry.api_id).collect(),
            });
        }
        self.remove(&existing).await?;
        self.logger.info(
            "connection dropped",
            Some(&serde_json::json!({ "name": existing.name })),
        );
        Ok(true)
    }

    fn prepare(&self, lock: &NameLock, spec: ConnectionSpec) -> BrokerResult<Connection> {
        let name = self.validation.ensure_identifier(&spec.name, "connection name")?;
        if name != lock.name() {
            return Err(BrokerError::invalid(format!(
                "connection '{}' is not covered by the held lock '{}'",
                name,
                lock.name()
            )));
        }
        let host = self.validation.normalize_host(&spec.host)?;
        let base_path = self.validation.normalize_base_path(spec.base_path.as_deref())?;
        let secret_scope = match spec.secret_scope.as_deref().map(str::trim) {
            Some(scope) if !scope.is_empty() => {
                Some(self.validation.ensure_identifier(scope, "secret_scope")?)
            }
            _ => None,
        };
        let api_key_param = match spec.api_key_param.as_deref().map(str::trim) {
            Some(param) if !param.is_empty() => {
                Some(self.validation.ensure_identifier(param, "api_key_param")?)
            }
            _ => None,
        };
        let connection = Connection::from_normalized(
            name,
            host,
            base_path,
            spec.auth_flavor,
            secret_scope,
            api_key_param,
        );
        connection.check_invariants()?;
        Ok(connection)
    }

    fn take_secret(
        &self,
        connection: &Connection,
        credentials: &CredentialContext,
    ) -> BrokerResult<Option<SecretValue>> {
        if !connection.auth_flavor.requires_secret() {
            return Ok(None);
        }
        match credentials.take(connection.auth_flavor) {
            Some(secret) if !secret.is_blank() => Ok(Some(secret)),
            _ => Err(BrokerError::MissingCredential {
                name: connection.name.clone(),
                flavor: connection.auth_flavor.as_str(),
            }),
        }
    }

    /// Secret first, then the row; the secret is removed again if the row
    /// cannot be written.
    async fn write(&self, connection: &Connection, secret: Option<&SecretValue>) -> BrokerResult<()> {
        let target = match (&connection.secret_scope, &connection.secret_key, secret) {
            (Some(scope), Some(key), Some(secret)) => {
                self.secrets.put(scope, key, secret).await?;
                Some((scope, key))
            }
            _ => None,
        };
        if let Err(err) = self.metadata.insert_connection(connection).await {
            if let Some((scope, key)) = target {
                if let Err(cleanup_err) = self.secrets.delete(scope, key).await {
                    self.logger.warn(
                        "failed to remove secret after connection insert failed",
                        Some(&serde_json::json!({
                            "secret_scope": scope,
                            "secret_key": key,
                            "error": cleanup_err.to_string(),
                        })),
                    );
                }
            }
            return Err(err);
        }
        Ok(())
    }

    /// Row first; a secret that cannot be deleted is logged as orphaned.
    async fn remove(&self, connection: &Connection) -> BrokerResult<()> {
        self.metadata.delete_connection(&connection.name).await?;
        if let (Some(scope), Some(key)) = (&connection.secret_scope, &connection.secret_key) {
            if let Err(err) = self.secrets.delete(scope, key).await {
                self.logger.warn(
                    "orphaned secret left behind",
                    Some(&serde_json::json!({
                        "secret_scope": scope,
                        "secret_key": key,
                        "error": err.to_string(),
                    })),
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuthFlavor;
    use crate::stores::{MemoryMetadataStore, MemorySecretStore};

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(
            Logger::new("test"),
            Arc::new(MemoryMetadataStore::new()),
            Arc::new(MemorySecretStore::new()),
        )
    }

    #[tokio::test]
    async fn released_names_leave_the_lock_table() {
        let registry = registry();
        {
            let _a = registry.lock_name("a").await;
            let _b = registry.lock_name("b").await;
            assert_eq!(registry.locks.len(), 2);
        }
        assert!(registry.locks.is_empty());

        registry
            .create_connection(
                ConnectionSpec::new("svc", "https://example.com", AuthFlavor::None),
                &CredentialContext::new(),
            )
            .await
            .expect("create");
        registry.drop_connection("svc").await.expect("drop");
        assert!(registry.locks.is_empty());
    }

    #[tokio::test]
    async fn contended_names_are_pruned_after_the_last_holder() {
        let registry = Arc::new(registry());
        let held = registry.lock_name("a").await;
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let _lock = registry.lock_name("a").await;
            })
        };
        tokio::task::yield_now().await;
        drop(held);
        waiter.await.expect("waiter finished");
        assert!(registry.locks.is_empty());
    }
}
