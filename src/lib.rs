//! A registry of external HTTP APIs. Each API is registered once with its
//! host and auth contract; callers then reach any path on it by name while
//! the credential stays in the secret store.

pub mod app;
pub mod config;
pub mod constants;
pub mod errors;
pub mod managers;
pub mod mcp;
pub mod models;
pub mod services;
pub mod stores;
pub mod utils;

pub use app::App;
pub use config::Config;
pub use services::credential_context::CredentialContext;
