use crate::constants::network::MAX_TIMEOUT_MS;
use crate::errors::{BrokerError, BrokerResult};
use crate::models::{AuthFlavor, Connection, SecretValue};
use crate::services::connection_registry::ConnectionRegistry;
use crate::services::http_transport::{HttpTransport, OutboundRequest, TransportResponse};
use crate::services::logger::Logger;
use crate::services::validation::Validation;
use crate::utils::redact::{mask_secrets, REDACTED};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub default_timeout_ms: u64,
    pub max_body_bytes: usize,
    pub max_concurrent_calls: usize,
}

/// Call-level inputs. The connection supplies everything else.
#[derive(Debug, Clone, Default)]
pub struct CallRequest {
    pub path: String,
    pub method: Option<String>,
    pub params: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub timeout_ms: Option<u64>,
}

impl CallRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// What a caller gets back. Holds no credential: `query` shows the injected
/// key as `[REDACTED]` and `effective_url` has no query string.
#[derive(Debug, Clone, Serialize)]
pub struct HttpResult {
    pub success: bool,
    pub status: u16,
    pub effective_url: String,
    pub method: String,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub body_truncated: bool,
    pub duration_ms: u64,
    pub auth_applied: bool,
}

pub struct CallExecutor {
    logger: Logger,
    validation: Validation,
    registry: Arc<ConnectionRegistry>,
    transport: Arc<dyn HttpTransport>,
    permits: Arc<Semaphore>,
    settings: ExecutorSettings,
}

impl CallExecutor {
    pub fn new(
        logger: Logger,
        registry: Arc<ConnectionRegistry>,
        transport: Arc<dyn HttpTransport>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            logger: logger.child("executor"),
            validation: Validation::new(),
            registry,
            transport,
            permits: Arc::new(Semaphore::new(settings.max_concurrent_calls.max(1))),
            settings,
        }
    }

    pub fn default_timeout_ms(&self) -> u64 {
        self.settings.default_timeout_ms
    }

    pub async fn execute(&self, connection_name: &str, request: CallRequest) -> BrokerResult<HttpResult> {
        let connection = self.registry.resolve(connection_name).await?;
        self.execute_with(&connection, request).await
    }

    /// Runs a call through an already resolved connection.
    pub async fn execute_with(
        &self,
        connection: &Connection,
        request: CallRequest,
    ) -> BrokerResult<HttpResult> {
        let method = normalize_method(request.method.as_deref())?;
        let path = self.validation.normalize_call_path(&request.path)?;
        let effective_url = format!("{}{}", connection.base_url(), path);
        let timeout_ms = request
            .timeout_ms
            .unwrap_or(self.settings.default_timeout_ms)
            .clamp(1, MAX_TIMEOUT_MS);

        let mut outbound = OutboundRequest {
            method: method.clone(),
            url: effective_url.clone(),
            query: request.params.clone().into_iter().collect(),
            injected_query: None,
            headers: request.headers.clone(),
            body: request.body.clone(),
            credential: None,
            timeout: Duration::from_millis(timeout_ms),
            max_body_bytes: self.settings.max_body_bytes,
        };
        let mut echoed_query = request.params;

        let secret = self.registry.load_secret(connection).await?;
        let auth_applied = match (connection.auth_flavor, secret) {
            (AuthFlavor::None, _) => false,
            (AuthFlavor::ApiKey, Some(secret)) => {
                let param = connection
                    .api_key_param
                    .clone()
                    .ok_or_else(|| BrokerError::store(format!(
                        "connection '{}' has no api key parameter name",
                        connection.name
                    )))?;
                echoed_query.insert(param.clone(), REDACTED.to_string());
                outbound.injected_query = Some((param, secret));
                true
            }
            (AuthFlavor::BearerToken, Some(secret)) => {
                outbound.headers.retain(|key, _| !key.eq_ignore_ascii_case("authorization"));
                outbound.credential = Some(secret);
                true
            }
            (flavor, None) => {
                return Err(BrokerError::MissingCredential {
                    name: connection.name.clone(),
                    flavor: flavor.as_str(),
                })
            }
        };
        let secret_values = outbound.secret_values();

        let started = Instant::now();
        // Waiting for a permit counts against the caller's timeout.
        let attempt = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| BrokerError::transport("executor is shutting down"))?;
            self.transport.send(outbound).await
        };
        let sent = match tokio::time::timeout(Duration::from_millis(timeout_ms), attempt).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::timeout(format!(
                "no response from {} within {} ms",
                effective_url, timeout_ms
            ))),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let response = match sent {
            Ok(response) => response,
            Err(err) => {
                let err = scrub(err, &secret_values);
                self.logger.warn(
                    "call failed",
                    Some(&serde_json::json!({
                        "connection": connection.name,
                        "method": method,
                        "effective_url": effective_url,
                        "error": err.to_string(),
                        "duration_ms": duration_ms,
                    })),
                );
                return Err(err);
            }
        };

        self.logger.info(
            "call completed",
            Some(&serde_json::json!({
                "connection": connection.name,
                "method": method,
                "effective_url": effective_url,
                "status": response.status,
                "auth_applied": auth_applied,
                "duration_ms": duration_ms,
            })),
        );

        match response.status {
            401 | 403 => Err(BrokerError::AuthFailure {
                status: response.status,
                secret_scope: connection.secret_scope.clone(),
                secret_key: connection.secret_key.clone(),
            }),
            404 => Err(BrokerError::PathNotFound { effective_url }),
            status => {
                let body_truncated = response.body_truncated;
                let headers = response.headers.clone();
                Ok(HttpResult {
                    success: (200..300).contains(&status),
                    status,
                    effective_url,
                    method,
                    query: echoed_query,
                    headers,
                    body: decode_body(&response, &secret_values),
                    body_truncated,
                    duration_ms,
                    auth_applied,
                })
            }
        }
    }
}

fn normalize_method(raw: Option<&str>) -> BrokerResult<String> {
    let method = raw.map(|m| m.trim().to_uppercase()).unwrap_or_else(|| "GET".to_string());
    let method = if method.is_empty() { "GET".to_string() } else { method };
    if !ALLOWED_METHODS.contains(&method.as_str()) {
        return Err(BrokerError::invalid(format!(
            "method must be one of {} (got '{}')",
            ALLOWED_METHODS.join(", "),
            method
        )));
    }
    Ok(method)
}

fn scrub(err: BrokerError, secrets: &[SecretValue]) -> BrokerError {
    match err {
        BrokerError::TransportFailure { message, timed_out } => BrokerError::TransportFailure {
            message: mask_secrets(&message, secrets),
            timed_out,
        },
        other => other,
    }
}

/// JSON when the content type says so and it parses, text otherwise. A target
/// that echoes the credential back gets it masked.
fn decode_body(response: &TransportResponse, secrets: &[SecretValue]) -> Value {
    if response.body.is_empty() {
        return Value::Null;
    }
    let text = mask_secrets(&String::from_utf8_lossy(&response.body), secrets);
    let is_json = response
        .content_type
        .as_deref()
        .map(|ct| ct.to_lowercase().contains("json"))
        .unwrap_or(false);
    if is_json && !response.body_truncated {
        if let Ok(parsed) = serde_json::from_str::<Value>(&text) {
            return parsed;
        }
    }
    Value::String(text)
}
