mod common;
use common::ENV_LOCK;

use api_registry::config::{Config, MetadataBackend, SecretBackend};
use api_registry::App;

const VARS: &[&str] = &[
    "APIREG_DATA_DIR",
    "APIREG_METADATA_BACKEND",
    "APIREG_SECRET_BACKEND",
    "APIREG_HTTP_ADDR",
    "APIREG_MAX_BODY_BYTES",
];

fn snapshot() -> Vec<(&'static str, Option<String>)> {
    VARS.iter().map(|key| (*key, std::env::var(key).ok())).collect()
}

fn restore(saved: Vec<(&'static str, Option<String>)>) {
    for (key, previous) in saved {
        match previous {
            Some(value) => std::env::set_var(key, value),
            None => std::env::remove_var(key),
        }
    }
}

#[tokio::test]
async fn environment_selects_backends_and_limits() {
    let _guard = ENV_LOCK.lock().await;
    let saved = snapshot();

    std::env::set_var("APIREG_DATA_DIR", "/tmp/api-registry-test");
    std::env::set_var("APIREG_METADATA_BACKEND", "memory");
    std::env::set_var("APIREG_SECRET_BACKEND", "memory");
    std::env::set_var("APIREG_HTTP_ADDR", "0.0.0.0:9900");
    std::env::set_var("APIREG_MAX_BODY_BYTES", "1024");

    let config = Config::from_env();
    restore(saved);

    let config = config.expect("config");
    assert_eq!(config.data_dir, std::path::PathBuf::from("/tmp/api-registry-test"));
    assert_eq!(config.metadata_backend, MetadataBackend::Memory);
    assert_eq!(config.secret_backend, SecretBackend::Memory);
    assert_eq!(config.http_addr.port(), 9900);
    assert_eq!(config.max_body_bytes, 1024);

    let app = App::from_config(&config).expect("memory app starts without touching disk");
    assert_eq!(app.tool_executor.tool_names().len(), 8);
}

#[tokio::test]
async fn invalid_backend_is_a_startup_error() {
    let _guard = ENV_LOCK.lock().await;
    let saved = snapshot();

    std::env::set_var("APIREG_SECRET_BACKEND", "vault");
    let config = Config::from_env();
    restore(saved);

    let err = config.expect_err("unknown backend");
    assert!(err.to_string().contains("APIREG_SECRET_BACKEND"));
}
