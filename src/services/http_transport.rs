use crate::constants::network::USER_AGENT;
use crate::errors::{BrokerError, BrokerResult};
use crate::models::SecretValue;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};
use std::collections::BTreeMap;
use std::time::Duration;

/// One fully described outbound request. Credential-bearing parts are held
/// as [`SecretValue`] so `Debug` output stays clean.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: String,
    /// Scheme, authority and path. Never a query string.
    pub url: String,
    pub query: Vec<(String, String)>,
    /// API key injected as a query parameter, applied last.
    pub injected_query: Option<(String, SecretValue)>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
    /// Bearer credential applied by the transport as `Authorization`.
    pub credential: Option<SecretValue>,
    pub timeout: Duration,
    pub max_body_bytes: usize,
}

impl OutboundRequest {
    /// The query pairs that go on the wire, the injected key included and
    /// any caller pair with the same name dropped.
    pub fn wire_query(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = match &self.injected_query {
            Some((name, _)) => self
                .query
                .iter()
                .filter(|(key, _)| key != name)
                .cloned()
                .collect(),
            None => self.query.clone(),
        };
        if let Some((name, value)) = &self.injected_query {
            pairs.push((name.clone(), value.expose().to_string()));
        }
        pairs
    }

    pub fn secret_values(&self) -> Vec<SecretValue> {
        self.injected_query
            .iter()
            .map(|(_, value)| value.clone())
            .chain(self.credential.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub body_truncated: bool,
}

/// Issues the actual request. Implementations report network-level problems
/// as `TransportFailure` and never retry.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> BrokerResult<TransportResponse>;
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> BrokerResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|err| BrokerError::store(format!("failed to build HTTP client: {}", err)))?;
        Ok(Self { client })
    }
}

pub(crate) fn map_reqwest_error(err: reqwest::Error) -> BrokerError {
    if err.is_timeout() {
        return BrokerError::timeout("HTTP request timed out");
    }
    BrokerError::transport(err.without_url().to_string())
}

fn build_headers(headers: &BTreeMap<String, String>) -> BrokerResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| BrokerError::invalid(format!("invalid header name '{}'", key)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| BrokerError::invalid(format!("invalid value for header '{}'", key)))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: OutboundRequest) -> BrokerResult<TransportResponse> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| BrokerError::invalid(format!("invalid method '{}'", request.method)))?;
        let mut req = self
            .client
            .request(method, &request.url)
            .headers(build_headers(&request.headers)?)
            .timeout(request.timeout);
        let query = request.wire_query();
        if !query.is_empty() {
            req = req.query(&query);
        }
        if let Some(body) = &request.body {
            req = req.json(body);
        }
        if let Some(token) = &request.credential {
            req = req.bearer_auth(token.expose());
        }

        let mut response = req.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect::<BTreeMap<_, _>>();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let mut body = Vec::new();
        let mut body_truncated = false;
        while let Some(chunk) = response.chunk().await.map_err(map_reqwest_error)? {
            let remaining = request.max_body_bytes.saturating_sub(body.len());
            if chunk.len() <= remaining {
                body.extend_from_slice(&chunk);
            } else {
                body.extend_from_slice(&chunk[..remaining]);
                body_truncated = true;
                break;
            }
        }

        Ok(TransportResponse {
            status,
            headers,
            content_type,
            body,
            body_truncated,
        })
    }
}
