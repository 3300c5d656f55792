pub mod api_registry;
pub mod call_executor;
pub mod connection_registry;
pub mod credential_context;
pub mod http_transport;
pub mod logger;
pub mod security;
pub mod tool_executor;
pub mod validation;
