mod broker_error;
mod mcp_error;
mod tool_error;

pub use broker_error::{BrokerError, BrokerResult};
pub use mcp_error::{ErrorCode, McpError};
pub use tool_error::{ToolError, ToolErrorKind};
