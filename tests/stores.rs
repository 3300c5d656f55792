use api_registry::config::Config;
use api_registry::models::{AuthFlavor, ConnectionSpec, SecretValue};
use api_registry::services::security::Security;
use api_registry::stores::{FileSecretStore, MetadataStore, SecretStore, SqliteMetadataStore};
use api_registry::{App, CredentialContext};
use serde_json::json;

#[tokio::test]
async fn file_secret_store_persists_only_ciphertext() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("secrets.json");
    let key = [7u8; 32];

    let store = FileSecretStore::open(&path, Security::from_key(&key)).expect("open");
    store
        .put("mcp_api_keys", "fred_api", &SecretValue::new("plain-XYZ-value"))
        .await
        .expect("put");

    let on_disk = std::fs::read_to_string(&path).expect("read");
    assert!(!on_disk.contains("plain-XYZ-value"));
    assert!(on_disk.contains("fred_api"));

    let reopened = FileSecretStore::open(&path, Security::from_key(&key)).expect("reopen");
    assert_eq!(
        reopened.get("mcp_api_keys", "fred_api").await.expect("get").expose(),
        "plain-XYZ-value"
    );
    assert!(reopened.delete("mcp_api_keys", "fred_api").await.expect("delete"));
    assert!(!reopened.delete("mcp_api_keys", "fred_api").await.expect("second delete"));

    let after = FileSecretStore::open(&path, Security::from_key(&key)).expect("reopen again");
    assert!(after.list("mcp_api_keys").await.expect("list").is_empty());
}

#[tokio::test]
async fn wrong_key_cannot_read_secrets() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("secrets.json");
    let store = FileSecretStore::open(&path, Security::from_key(&[1u8; 32])).expect("open");
    store
        .put("scope", "key", &SecretValue::new("value-123"))
        .await
        .expect("put");

    let other = FileSecretStore::open(&path, Security::from_key(&[2u8; 32])).expect("open");
    assert!(other.get("scope", "key").await.is_err());
}

#[tokio::test]
async fn sqlite_store_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = dir.path().join("nested").join("registry.sqlite3");

    {
        let metadata = SqliteMetadataStore::open(&db).expect("open");
        let connections = metadata.list_connections().await.expect("list");
        assert!(connections.is_empty());
    }

    let metadata = SqliteMetadataStore::open(&db).expect("reopen");
    assert!(metadata.get_connection("missing").await.expect("get").is_none());
}

#[tokio::test]
async fn persistent_app_keeps_registrations_across_restarts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        ..Config::default()
    };

    {
        let app = App::from_config(&config).expect("first start");
        let ctx = CredentialContext::new();
        ctx.supply(AuthFlavor::ApiKey, SecretValue::new("persisted-key-1"));
        app.invoke(
            "register_api",
            json!({
                "api_name": "fred_api",
                "host": "https://api.stlouisfed.org",
                "base_path": "/fred",
                "auth_flavor": "api_key",
            }),
            ctx,
        )
        .await
        .expect("register");
    }

    let app = App::from_config(&config).expect("second start");
    let found = app
        .invoke("lookup_api", json!({"api_name": "fred_api"}), CredentialContext::new())
        .await
        .expect("lookup after restart");
    assert_eq!(found["result"]["connection"]["base_url"], "https://api.stlouisfed.org/fred");

    assert!(dir.path().join(".secrets.key").exists());
    let sealed = std::fs::read_to_string(dir.path().join("secrets.json")).expect("secrets file");
    assert!(!sealed.contains("persisted-key-1"));

    let err = app
        .connections
        .create_connection(
            ConnectionSpec::new("fred_api", "https://api.stlouisfed.org", AuthFlavor::None),
            &CredentialContext::new(),
        )
        .await
        .expect_err("name survives restart");
    assert_eq!(err.code(), "DUPLICATE_NAME");
}
