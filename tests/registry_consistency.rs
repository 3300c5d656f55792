mod common;
use common::{app_with, harness, settings, FlakyMetadataStore, RecordingTransport, SlowSecretStore};

use api_registry::errors::ToolError;
use api_registry::models::{AuthFlavor, SecretValue};
use api_registry::stores::{MemoryMetadataStore, MemorySecretStore, MetadataStore};
use api_registry::{App, CredentialContext};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn creds(flavor: AuthFlavor, value: &str) -> CredentialContext {
    let ctx = CredentialContext::new();
    ctx.supply(flavor, SecretValue::new(value));
    ctx
}

async fn register(app: &App, flavor: AuthFlavor, secret: &str, replace: bool) -> Result<Value, ToolError> {
    app.invoke(
        "register_api",
        json!({
            "api_name": "fred_api",
            "host": "https://api.stlouisfed.org",
            "base_path": "/fred",
            "auth_flavor": flavor.as_str(),
            "replace": replace,
        }),
        creds(flavor, secret),
    )
    .await
}

fn sent_api_key(transport: &RecordingTransport) -> Option<String> {
    let wire: BTreeMap<String, String> = transport.last().wire_query().into_iter().collect();
    wire.get("api_key").cloned()
}

#[tokio::test]
async fn calls_during_a_replace_wait_for_the_new_connection() {
    let secrets = Arc::new(SlowSecretStore::default());
    let transport = RecordingTransport::ok_json(r#"{"ok":true}"#);
    let app = app_with(
        Arc::new(MemoryMetadataStore::new()),
        secrets.clone(),
        transport.clone(),
        settings(),
    );
    register(&app, AuthFlavor::ApiKey, "XYZ-old", false)
        .await
        .expect("register");

    secrets.slow_puts(300);
    let replacing = {
        let app = app.clone();
        tokio::spawn(async move { register(&app, AuthFlavor::ApiKey, "XYZ-new", true).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let called = app
        .invoke(
            "call_api",
            json!({"api_name": "fred_api", "path": "/series"}),
            CredentialContext::new(),
        )
        .await
        .expect("call made while the replace was in flight");
    assert_eq!(called["result"]["success"], true);
    assert_eq!(sent_api_key(&transport).as_deref(), Some("XYZ-new"));

    replacing.await.expect("join").expect("replace");
    let looked = app
        .invoke("lookup_api", json!({"api_name": "fred_api"}), CredentialContext::new())
        .await
        .expect("lookup");
    assert_eq!(looked["result"]["connection"]["auth_flavor"], "api_key");
}

#[tokio::test]
async fn failed_entry_refresh_restores_the_previous_connection() {
    let metadata = Arc::new(FlakyMetadataStore::default());
    let transport = RecordingTransport::ok_json(r#"{"ok":true}"#);
    let app = app_with(
        metadata.clone(),
        Arc::new(MemorySecretStore::new()),
        transport.clone(),
        settings(),
    );
    let first = register(&app, AuthFlavor::ApiKey, "XYZ-old", false)
        .await
        .expect("register");

    metadata.fail_entry_updates(true);
    let err = register(&app, AuthFlavor::BearerToken, "tok-new", true)
        .await
        .expect_err("entry refresh fails");
    assert_eq!(err.code, "STORE_FAILURE");
    metadata.fail_entry_updates(false);

    let looked = app
        .invoke("lookup_api", json!({"api_name": "fred_api"}), CredentialContext::new())
        .await
        .expect("lookup");
    assert_eq!(looked["result"]["api_id"], first["result"]["api_id"]);
    assert_eq!(looked["result"]["connection"]["auth_flavor"], "api_key");

    app.invoke(
        "call_api",
        json!({"api_name": "fred_api", "path": "/series"}),
        CredentialContext::new(),
    )
    .await
    .expect("call");
    let sent = transport.last();
    assert!(sent.credential.is_none());
    assert_eq!(sent_api_key(&transport).as_deref(), Some("XYZ-old"));
}

#[tokio::test]
async fn entries_without_their_connection_are_reported_not_repaired() {
    let h = harness();
    register(&h.app, AuthFlavor::ApiKey, "XYZ", false)
        .await
        .expect("register");
    h.metadata
        .delete_connection("fred_api")
        .await
        .expect("remove the row behind the registry's back");

    for (tool, args) in [
        ("call_api", json!({"api_name": "fred_api", "path": "/series"})),
        ("lookup_api", json!({"api_name": "fred_api"})),
    ] {
        let err = h
            .app
            .invoke(tool, args, CredentialContext::new())
            .await
            .expect_err("dangling reference");
        assert_eq!(err.code, "INCONSISTENT_REFERENCE", "{}", tool);
        assert!(err.message.contains("fred_api"));
        assert!(err.hint.expect("hint").contains("replace=true"));
    }
    assert_eq!(h.transport.count(), 0);
    assert!(h
        .metadata
        .find_entry_by_name("fred_api")
        .await
        .expect("read")
        .is_some());
}

#[tokio::test]
async fn unreadable_previous_secret_stops_a_replace_before_anything_is_removed() {
    let secrets = Arc::new(SlowSecretStore::default());
    let transport = RecordingTransport::ok_json(r#"{"ok":true}"#);
    let app = app_with(
        Arc::new(MemoryMetadataStore::new()),
        secrets.clone(),
        transport.clone(),
        settings(),
    );
    register(&app, AuthFlavor::ApiKey, "XYZ-old", false)
        .await
        .expect("register");

    secrets.fail_reads(true);
    let err = register(&app, AuthFlavor::ApiKey, "XYZ-new", true)
        .await
        .expect_err("previous secret cannot be read");
    assert_eq!(err.code, "STORE_FAILURE");
    secrets.fail_reads(false);

    app.invoke(
        "call_api",
        json!({"api_name": "fred_api", "path": "/series"}),
        CredentialContext::new(),
    )
    .await
    .expect("call");
    assert_eq!(sent_api_key(&transport).as_deref(), Some("XYZ-old"));
}
