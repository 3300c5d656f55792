pub mod network {
    pub const TIMEOUT_API_REQUEST_MS: u64 = 30_000;
    pub const MAX_TIMEOUT_MS: u64 = 300_000;
    pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8765";
    pub const MAX_CONCURRENT_CALLS: usize = 16;
    pub const USER_AGENT: &str = "api-registry/1.0";
}

pub mod limits {
    pub const MAX_BODY_BYTES: usize = 256 * 1024;
    pub const MAX_NAME_LENGTH: usize = 128;
    pub const LOG_ARG_STRING_LENGTH: usize = 2048;
}

pub mod secrets {
    pub const API_KEY_SCOPE: &str = "mcp_api_keys";
    pub const BEARER_TOKEN_SCOPE: &str = "mcp_bearer_tokens";
    pub const DEFAULT_API_KEY_PARAM: &str = "api_key";
}

pub mod registry {
    pub const STATUS_PENDING_MESSAGE: &str = "Awaiting validation";
    pub const DEFAULT_VALIDATE_PATH: &str = "/";
    pub const API_ID_PREFIX: &str = "api-";
}

pub mod buffers {
    pub const CRYPTO_KEY_SIZE: usize = 32;
    pub const CRYPTO_IV_SIZE: usize = 12;
    pub const CRYPTO_TAG_SIZE: usize = 16;
}

pub mod protocols {
    pub const ALLOWED_HTTP: &[&str] = &["http:", "https:"];
    pub const DEFAULT_SCHEME: &str = "https";
}
