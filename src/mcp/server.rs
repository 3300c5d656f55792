use crate::app::App;
use crate::errors::{ErrorCode, McpError, ToolError, ToolErrorKind};
use crate::mcp::catalog::tool_catalog;
use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse, ToolCallParams};
use crate::services::credential_context::CredentialContext;
use crate::services::tool_executor::Surface;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

const PROTOCOL_VERSION: &str = "2025-06-18";
const SERVER_NAME: &str = "api-registry";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) fn map_tool_error(tool: &str, error: &ToolError) -> McpError {
    let mut lines = vec![
        "ApiRegistryError".to_string(),
        format!("tool: {}", tool),
        format!("kind: {}", error.kind.as_str()),
        format!("code: {}", error.code),
        format!("retryable: {}", error.retryable),
        format!("message: {}", error.message),
    ];
    if let Some(hint) = &error.hint {
        lines.push(format!("hint: {}", hint));
    }
    if let Some(details) = &error.details {
        lines.push(format!("details: {}", details));
    }
    let message = lines.join("\n");

    match error.kind {
        ToolErrorKind::InvalidParams => McpError::new(ErrorCode::InvalidParams, message),
        ToolErrorKind::Timeout => McpError::new(ErrorCode::RequestTimeout, message),
        ToolErrorKind::Denied | ToolErrorKind::Conflict | ToolErrorKind::NotFound => {
            McpError::new(ErrorCode::InvalidRequest, message)
        }
        _ => McpError::new(ErrorCode::InternalError, message),
    }
}

/// JSON-RPC dispatcher shared by the stdio and http transports.
#[derive(Clone)]
pub struct McpServer {
    app: Arc<App>,
}

impl McpServer {
    pub fn new(app: Arc<App>) -> Self {
        Self { app }
    }

    pub fn app(&self) -> &Arc<App> {
        &self.app
    }

    fn handle_initialize(&self) -> Value {
        serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {"listChanged": false}},
            "serverInfo": {"name": SERVER_NAME, "version": SERVER_VERSION},
            "instructions": "Register external HTTP APIs once, then call any path on them. Secrets go in params._meta.credentials on register_api and are never returned.",
        })
    }

    fn handle_tools_list(&self) -> Value {
        let tools: Vec<_> = tool_catalog()
            .iter()
            .filter(|tool| self.app.tool_executor.has_tool(&tool.name))
            .collect();
        serde_json::json!({ "tools": tools })
    }

    async fn handle_tools_call(&self, params: Value) -> Result<Value, McpError> {
        let params: ToolCallParams = serde_json::from_value(params)
            .map_err(|_| McpError::new(ErrorCode::InvalidParams, "Invalid tools/call params"))?;
        let name = params.name.trim().to_string();
        if name.is_empty() {
            return Err(McpError::new(ErrorCode::InvalidParams, "Missing tool name"));
        }
        let meta = params.meta.unwrap_or_default();
        let credentials = CredentialContext::from_boundary(meta.credentials.as_ref())
            .map_err(|err| map_tool_error(&name, &err.into()))?;

        let payload = self
            .app
            .dispatch(Surface::Protocol, &name, params.arguments, credentials, meta.requested_by)
            .await
            .map_err(|err| map_tool_error(&name, &err))?;

        Ok(serde_json::json!({
            "content": [ { "type": "text", "text": serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string()) } ],
            "structuredContent": payload,
        }))
    }

    /// `None` for notifications.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.method.starts_with("notifications/") && request.id.is_none() {
            return None;
        }
        let id = request.id.clone()?;
        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(id, self.handle_initialize()),
            "ping" | "notifications/initialized" => JsonRpcResponse::success(id, serde_json::json!({})),
            "tools/list" => JsonRpcResponse::success(id, self.handle_tools_list()),
            "tools/call" => match self.handle_tools_call(request.params).await {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(err) => JsonRpcResponse::failure(id, err.code.as_i32(), err.message),
            },
            _ => JsonRpcResponse::failure(
                id,
                ErrorCode::MethodNotFound.as_i32(),
                "Method not found".to_string(),
            ),
        };
        Some(response)
    }

    /// Parses one raw JSON-RPC message and dispatches it.
    pub async fn handle_value(&self, parsed: Value) -> Option<JsonRpcResponse> {
        match serde_json::from_value::<JsonRpcRequest>(parsed) {
            Ok(request) => self.handle_request(request).await,
            Err(_) => Some(JsonRpcResponse::failure(
                Value::Null,
                ErrorCode::InvalidRequest.as_i32(),
                "Invalid request".to_string(),
            )),
        }
    }

    /// Raw bytes in, same parse rules for every transport.
    pub async fn handle_message(&self, raw: &[u8]) -> Option<JsonRpcResponse> {
        match serde_json::from_slice::<Value>(raw) {
            Ok(parsed) => self.handle_value(parsed).await,
            Err(_) => Some(JsonRpcResponse::failure(
                Value::Null,
                ErrorCode::ParseError.as_i32(),
                "Parse error".to_string(),
            )),
        }
    }

    pub async fn serve_lines<R, W>(&self, reader: R, writer: W) -> Result<(), ToolError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        let mut writer = BufWriter::new(writer);

        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Some(response) = self.handle_message(trimmed.as_bytes()).await {
                let payload = serde_json::to_string(&response).unwrap_or_default();
                writer.write_all(payload.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }

        Ok(())
    }

    pub async fn run_stdio(&self) -> Result<(), ToolError> {
        self.serve_lines(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }
}
