#![allow(dead_code)]

use api_registry::errors::{BrokerError, BrokerResult};
use api_registry::models::{Connection, EntryFilter, RegistryEntry, SecretValue};
use api_registry::services::call_executor::ExecutorSettings;
use api_registry::services::http_transport::{HttpTransport, OutboundRequest, TransportResponse};
use api_registry::stores::{MemoryMetadataStore, MemorySecretStore, MetadataStore, SecretStore};
use api_registry::App;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;

pub static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Clone)]
pub enum Canned {
    Status(u16, &'static str),
    /// Answers with a status after sleeping this many milliseconds.
    Slow(u64, u16, &'static str),
    Fail(&'static str),
}

fn json_response(status: u16, body: &'static str) -> TransportResponse {
    TransportResponse {
        status,
        headers: BTreeMap::from([("content-type".to_string(), "application/json".to_string())]),
        content_type: Some("application/json".to_string()),
        body: body.as_bytes().to_vec(),
        body_truncated: false,
    }
}

/// Transport double: records every outbound request and answers with a
/// canned response.
pub struct RecordingTransport {
    answer: StdMutex<Canned>,
    sent: StdMutex<Vec<OutboundRequest>>,
}

impl RecordingTransport {
    pub fn answering(answer: Canned) -> Arc<Self> {
        Arc::new(Self {
            answer: StdMutex::new(answer),
            sent: StdMutex::new(Vec::new()),
        })
    }

    pub fn ok_json(body: &'static str) -> Arc<Self> {
        Self::answering(Canned::Status(200, body))
    }

    pub fn set_answer(&self, answer: Canned) {
        *self.answer.lock().unwrap() = answer;
    }

    pub fn sent(&self) -> Vec<OutboundRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last(&self) -> OutboundRequest {
        self.sent().pop().expect("at least one request")
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for RecordingTransport {
    async fn send(&self, request: OutboundRequest) -> BrokerResult<TransportResponse> {
        self.sent.lock().unwrap().push(request);
        let answer = self.answer.lock().unwrap().clone();
        match answer {
            Canned::Status(status, body) => Ok(json_response(status, body)),
            Canned::Slow(delay_ms, status, body) => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(json_response(status, body))
            }
            Canned::Fail(message) => Err(BrokerError::transport(message)),
        }
    }
}

pub fn settings() -> ExecutorSettings {
    ExecutorSettings {
        default_timeout_ms: 5_000,
        max_body_bytes: 64 * 1024,
        max_concurrent_calls: 4,
    }
}

/// Memory vault whose writes can be slowed down and whose reads can be made
/// to fail on demand.
#[derive(Default)]
pub struct SlowSecretStore {
    inner: MemorySecretStore,
    put_delay_ms: AtomicU64,
    fail_reads: AtomicBool,
}

impl SlowSecretStore {
    pub fn slow_puts(&self, delay_ms: u64) {
        self.put_delay_ms.store(delay_ms, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SecretStore for SlowSecretStore {
    async fn put(&self, scope: &str, key: &str, value: &SecretValue) -> BrokerResult<()> {
        let delay_ms = self.put_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        self.inner.put(scope, key, value).await
    }

    async fn get(&self, scope: &str, key: &str) -> BrokerResult<SecretValue> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BrokerError::store("vault unreadable"));
        }
        self.inner.get(scope, key).await
    }

    async fn delete(&self, scope: &str, key: &str) -> BrokerResult<bool> {
        self.inner.delete(scope, key).await
    }

    async fn list(&self, scope: &str) -> BrokerResult<Vec<String>> {
        self.inner.list(scope).await
    }
}

/// Memory metadata store whose entry updates can be made to fail.
#[derive(Default)]
pub struct FlakyMetadataStore {
    inner: MemoryMetadataStore,
    fail_entry_updates: AtomicBool,
}

impl FlakyMetadataStore {
    pub fn fail_entry_updates(&self, fail: bool) {
        self.fail_entry_updates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetadataStore for FlakyMetadataStore {
    async fn insert_connection(&self, connection: &Connection) -> BrokerResult<()> {
        self.inner.insert_connection(connection).await
    }

    async fn get_connection(&self, name: &str) -> BrokerResult<Option<Connection>> {
        self.inner.get_connection(name).await
    }

    async fn delete_connection(&self, name: &str) -> BrokerResult<bool> {
        self.inner.delete_connection(name).await
    }

    async fn list_connections(&self) -> BrokerResult<Vec<Connection>> {
        self.inner.list_connections().await
    }

    async fn insert_entry(&self, entry: &RegistryEntry) -> BrokerResult<()> {
        self.inner.insert_entry(entry).await
    }

    async fn get_entry(&self, api_id: &str) -> BrokerResult<Option<RegistryEntry>> {
        self.inner.get_entry(api_id).await
    }

    async fn find_entry_by_name(&self, api_name: &str) -> BrokerResult<Option<RegistryEntry>> {
        self.inner.find_entry_by_name(api_name).await
    }

    async fn update_entry(&self, entry: &RegistryEntry) -> BrokerResult<()> {
        if self.fail_entry_updates.load(Ordering::SeqCst) {
            return Err(BrokerError::store("disk full"));
        }
        self.inner.update_entry(entry).await
    }

    async fn delete_entry(&self, api_id: &str) -> BrokerResult<bool> {
        self.inner.delete_entry(api_id).await
    }

    async fn list_entries(&self, filter: &EntryFilter) -> BrokerResult<Vec<RegistryEntry>> {
        self.inner.list_entries(filter).await
    }
}

pub fn app_with(
    metadata: Arc<dyn MetadataStore>,
    secrets: Arc<dyn SecretStore>,
    transport: Arc<RecordingTransport>,
    settings: ExecutorSettings,
) -> Arc<App> {
    Arc::new(
        App::with_parts(metadata, secrets, transport as Arc<dyn HttpTransport>, settings)
            .expect("app wiring"),
    )
}

pub struct Harness {
    pub app: Arc<App>,
    pub transport: Arc<RecordingTransport>,
    pub metadata: Arc<MemoryMetadataStore>,
    pub secrets: Arc<MemorySecretStore>,
}

pub fn harness_with(transport: Arc<RecordingTransport>) -> Harness {
    let metadata = Arc::new(MemoryMetadataStore::new());
    let secrets = Arc::new(MemorySecretStore::new());
    let app = App::with_parts(
        metadata.clone() as Arc<dyn MetadataStore>,
        secrets.clone() as Arc<dyn SecretStore>,
        transport.clone() as Arc<dyn HttpTransport>,
        settings(),
    )
    .expect("app wiring");
    Harness {
        app: Arc::new(app),
        transport,
        metadata,
        secrets,
    }
}

pub fn harness() -> Harness {
    harness_with(RecordingTransport::ok_json(r#"{"ok":true}"#))
}
