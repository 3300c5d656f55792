use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::constants::limits::LOG_ARG_STRING_LENGTH;
use crate::errors::ToolError;
use crate::mcp::catalog::validate_tool_args;
use crate::services::credential_context::CredentialContext;
use crate::services::logger::Logger;
use crate::utils::redact::redact_object;
use crate::utils::suggest::suggest;

/// Argument names that may never carry data into a tool call. Secrets travel
/// through the credential channel only.
const FORBIDDEN_ARG_KEYS: &[&str] = &[
    "api_key",
    "apikey",
    "bearer_token",
    "token",
    "access_token",
    "secret",
    "password",
    "authorization",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Direct,
    Protocol,
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Surface::Direct => "direct",
            Surface::Protocol => "protocol",
        })
    }
}

/// Per-call state handed to handlers next to the arguments. The credential
/// context is the only place a raw secret can be found during a call.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub surface: Surface,
    pub trace_id: String,
    pub requested_by: Option<String>,
    pub credentials: CredentialContext,
}

impl CallContext {
    pub fn new(surface: Surface, credentials: CredentialContext) -> Self {
        Self {
            surface,
            trace_id: uuid::Uuid::new_v4().to_string(),
            requested_by: None,
            credentials,
        }
    }

    pub fn with_requested_by(mut self, requested_by: Option<String>) -> Self {
        self.requested_by = requested_by.filter(|s| !s.trim().is_empty());
        self
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, args: Value, ctx: &CallContext) -> Result<Value, ToolError>;
}

/// The single dispatch point behind both the direct and the protocol path.
#[derive(Clone)]
pub struct ToolExecutor {
    logger: Logger,
    handlers: Arc<HashMap<String, Arc<dyn ToolHandler>>>,
}

impl ToolExecutor {
    pub fn new(logger: Logger, handlers: HashMap<String, Arc<dyn ToolHandler>>) -> Self {
        Self {
            logger: logger.child("tools"),
            handlers: Arc::new(handlers),
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_tool(&self, tool: &str) -> bool {
        self.handlers.contains_key(tool)
    }

    fn check_args(&self, tool: &str, args: &Value) -> Result<(), ToolError> {
        let obj = args.as_object().ok_or_else(|| {
            ToolError::invalid_params(format!("Arguments for {} must be an object", tool))
        })?;
        let leaked: Vec<&str> = obj
            .keys()
            .map(|k| k.as_str())
            .filter(|key| FORBIDDEN_ARG_KEYS.contains(&key.trim().to_lowercase().as_str()))
            .collect();
        if !leaked.is_empty() {
            return Err(ToolError::invalid_params(format!(
                "Arguments for {} must not carry credentials (field: {})",
                tool,
                leaked.join(", ")
            ))
            .with_hint(
                "Send secrets in params._meta.credentials (protocol) or the credentials argument of App::invoke (direct)."
                    .to_string(),
            ));
        }
        validate_tool_args(tool, args)
    }

    pub async fn execute(&self, tool: &str, args: Value, ctx: &CallContext) -> Result<Value, ToolError> {
        let started = Instant::now();
        let Some(handler) = self.handlers.get(tool) else {
            let suggestions = suggest(tool, &self.tool_names(), 3);
            let hint = if suggestions.is_empty() {
                format!("Available tools: {}", self.tool_names().join(", "))
            } else {
                format!("Did you mean: {}", suggestions.join(", "))
            };
            return Err(ToolError::invalid_params(format!("Unknown tool: {}", tool)).with_hint(hint));
        };
        let args = if args.is_null() {
            Value::Object(Default::default())
        } else {
            args
        };
        self.check_args(tool, &args)?;

        self.logger.debug(
            tool,
            Some(&serde_json::json!({
                "surface": ctx.surface.to_string(),
                "trace_id": ctx.trace_id,
                "args": redact_object(&args, LOG_ARG_STRING_LENGTH),
            })),
        );

        let outcome = handler.handle(args, ctx).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(result) => {
                self.logger.info(
                    "tool call completed",
                    Some(&serde_json::json!({
                        "tool": tool,
                        "surface": ctx.surface.to_string(),
                        "trace_id": ctx.trace_id,
                        "duration_ms": duration_ms,
                    })),
                );
                Ok(serde_json::json!({
                    "ok": true,
                    "result": result,
                    "meta": {
                        "tool": tool,
                        "trace_id": ctx.trace_id,
                        "duration_ms": duration_ms,
                    },
                }))
            }
            Err(err) => {
                self.logger.warn(
                    "tool call failed",
                    Some(&serde_json::json!({
                        "tool": tool,
                        "surface": ctx.surface.to_string(),
                        "trace_id": ctx.trace_id,
                        "code": err.code,
                        "message": err.message,
                        "duration_ms": duration_ms,
                    })),
                );
                Err(err)
            }
        }
    }
}
