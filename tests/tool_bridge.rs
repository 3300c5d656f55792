mod common;
use common::{harness, harness_with, Harness, RecordingTransport};

use api_registry::mcp::protocol::JsonRpcRequest;
use api_registry::mcp::server::McpServer;
use api_registry::models::{AuthFlavor, SecretValue};
use api_registry::CredentialContext;
use serde_json::{json, Value};
use std::collections::BTreeMap;

fn rpc(id: u64, method: &str, params: Value) -> JsonRpcRequest {
    serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    }))
    .expect("request")
}

async fn call_tool(server: &McpServer, name: &str, arguments: Value, meta: Option<Value>) -> Value {
    let mut params = json!({"name": name, "arguments": arguments});
    if let Some(meta) = meta {
        params["_meta"] = meta;
    }
    let response = server
        .handle_request(rpc(7, "tools/call", params))
        .await
        .expect("response");
    serde_json::to_value(&response).expect("serialize")
}

fn api_key(value: &str) -> CredentialContext {
    let ctx = CredentialContext::new();
    ctx.supply(AuthFlavor::ApiKey, SecretValue::new(value));
    ctx
}

async fn register_fred(h: &Harness) -> Value {
    h.app
        .invoke_as(
            "analyst",
            "register_api",
            json!({
                "api_name": "fred_api",
                "host": "https://api.stlouisfed.org",
                "base_path": "/fred",
                "auth_flavor": "api_key",
                "description": "Federal Reserve economic data",
                "available_endpoints": ["/series/observations"],
            }),
            api_key("XYZ-secret"),
        )
        .await
        .expect("register")
}

#[tokio::test]
async fn register_then_call_through_the_direct_path() {
    let h = harness_with(RecordingTransport::ok_json(r#"{"observations":[{"value":"1"}]}"#));
    let registered = register_fred(&h).await;
    assert_eq!(registered["ok"], true);
    let entry = &registered["result"];
    assert_eq!(entry["status"], "pending");
    assert_eq!(entry["validation_message"], "Awaiting validation");
    assert_eq!(entry["requested_by"], "analyst");
    assert!(entry["api_id"].as_str().expect("id").starts_with("api-"));
    assert_eq!(entry["connection"]["secret_key"], "fred_api");

    let called = h
        .app
        .invoke(
            "call_api",
            json!({
                "api_name": "fred_api",
                "path": "/series/observations",
                "params": {"series_id": "GDPC1"},
            }),
            CredentialContext::new(),
        )
        .await
        .expect("call");
    let result = &called["result"];
    assert_eq!(result["api_name"], "fred_api");
    assert_eq!(result["status"], 200);
    assert_eq!(
        result["effective_url"],
        "https://api.stlouisfed.org/fred/series/observations"
    );
    assert_eq!(result["query"]["api_key"], "[REDACTED]");

    let wire: BTreeMap<String, String> = h.transport.last().wire_query().into_iter().collect();
    assert_eq!(wire.get("api_key").map(String::as_str), Some("XYZ-secret"));
    assert!(!called.to_string().contains("XYZ-secret"));
}

#[tokio::test]
async fn both_paths_return_the_same_result() {
    let h = harness();
    register_fred(&h).await;
    let server = McpServer::new(h.app.clone());

    let direct = h
        .app
        .invoke("lookup_api", json!({"api_name": "fred_api"}), CredentialContext::new())
        .await
        .expect("direct lookup");
    let protocol = call_tool(&server, "lookup_api", json!({"api_name": "fred_api"}), None).await;
    let structured = &protocol["result"]["structuredContent"];

    assert_eq!(structured["ok"], true);
    assert_eq!(structured["result"], direct["result"]);
    assert_eq!(structured["meta"]["tool"], direct["meta"]["tool"]);

    let text = protocol["result"]["content"][0]["text"].as_str().expect("text");
    let parsed: Value = serde_json::from_str(text).expect("text is json");
    assert_eq!(parsed["result"], direct["result"]);
}

#[tokio::test]
async fn both_paths_fail_the_same_way() {
    let h = harness();
    let server = McpServer::new(h.app.clone());

    let direct = h
        .app
        .invoke("lookup_api", json!({"api_name": "ghost"}), CredentialContext::new())
        .await
        .expect_err("unknown api");
    assert_eq!(direct.code, "NOT_FOUND");

    let protocol = call_tool(&server, "lookup_api", json!({"api_name": "ghost"}), None).await;
    let message = protocol["error"]["message"].as_str().expect("message");
    assert!(message.starts_with("ApiRegistryError"));
    assert!(message.contains("code: NOT_FOUND"));
    assert!(message.contains(&direct.message));
}

#[tokio::test]
async fn protocol_credentials_travel_in_meta_only() {
    let h = harness();
    let server = McpServer::new(h.app.clone());

    let response = call_tool(
        &server,
        "register_api",
        json!({
            "api_name": "github",
            "host": "api.github.com",
            "auth_flavor": "bearer_token",
        }),
        Some(json!({"credentials": {"bearer_token": "ghp_meta_token"}, "requestedBy": "ops"})),
    )
    .await;
    let structured = &response["result"]["structuredContent"];
    assert_eq!(structured["ok"], true, "unexpected response: {}", response);
    assert_eq!(structured["result"]["requested_by"], "ops");
    assert!(!response.to_string().contains("ghp_meta_token"));

    let rejected = call_tool(
        &server,
        "register_api",
        json!({
            "api_name": "leaky",
            "host": "api.leaky.test",
            "auth_flavor": "api_key",
            "api_key": "in-the-arguments",
        }),
        None,
    )
    .await;
    let message = rejected["error"]["message"].as_str().expect("error");
    assert!(message.contains("must not carry credentials"));
    assert!(!message.contains("in-the-arguments"));
    assert!(h.app.connections.resolve("leaky").await.is_err());
}

#[tokio::test]
async fn direct_path_rejects_secrets_in_arguments() {
    let h = harness();
    let err = h
        .app
        .invoke(
            "register_api",
            json!({
                "api_name": "leaky",
                "host": "api.leaky.test",
                "auth_flavor": "bearer_token",
                "token": "in-the-arguments",
            }),
            CredentialContext::new(),
        )
        .await
        .expect_err("secret argument");
    assert_eq!(err.code, "INVALID_PARAMS");
    assert!(!err.message.contains("in-the-arguments"));
}

#[tokio::test]
async fn lookup_never_shows_the_secret() {
    let h = harness();
    register_fred(&h).await;
    let found = h
        .app
        .invoke("lookup_api", json!({"api_name": "fred_api"}), CredentialContext::new())
        .await
        .expect("lookup");
    let rendered = found.to_string();
    assert!(!rendered.contains("XYZ-secret"));
    assert_eq!(found["result"]["connection"]["secret_scope"], "mcp_api_keys");
    assert_eq!(found["result"]["connection"]["api_key_param"], "api_key");
}

#[tokio::test]
async fn duplicate_registration_needs_replace() {
    let h = harness();
    register_fred(&h).await;

    let err = h
        .app
        .invoke(
            "register_api",
            json!({"api_name": "fred_api", "host": "https://api.stlouisfed.org"}),
            CredentialContext::new(),
        )
        .await
        .expect_err("duplicate");
    assert_eq!(err.code, "DUPLICATE_NAME");

    let first = h
        .app
        .invoke("lookup_api", json!({"api_name": "fred_api"}), CredentialContext::new())
        .await
        .expect("lookup");
    let replaced = h
        .app
        .invoke(
            "register_api",
            json!({
                "api_name": "fred_api",
                "host": "https://api.stlouisfed.org",
                "auth_flavor": "none",
                "replace": true,
            }),
            CredentialContext::new(),
        )
        .await
        .expect("replace");
    assert_eq!(replaced["result"]["api_id"], first["result"]["api_id"]);
    assert_eq!(replaced["result"]["connection"]["auth_flavor"], "none");
    assert!(replaced["result"]["connection"]["secret_scope"].is_null());
}

#[tokio::test]
async fn delete_api_drops_the_connection_by_default() {
    let h = harness();
    register_fred(&h).await;

    let deleted = h
        .app
        .invoke("delete_api", json!({"api_name": "fred_api"}), CredentialContext::new())
        .await
        .expect("delete");
    assert_eq!(deleted["result"]["deleted"], true);
    assert_eq!(deleted["result"]["connection_dropped"], true);
    assert!(h.app.connections.resolve("fred_api").await.is_err());

    let listed = h
        .app
        .invoke("list_connections", json!({}), CredentialContext::new())
        .await
        .expect("list");
    assert_eq!(listed["result"]["count"], 0);
}

#[tokio::test]
async fn delete_api_can_keep_the_connection() {
    let h = harness();
    register_fred(&h).await;

    let deleted = h
        .app
        .invoke(
            "delete_api",
            json!({"api_name": "fred_api", "drop_connection": false}),
            CredentialContext::new(),
        )
        .await
        .expect("delete");
    assert_eq!(deleted["result"]["connection_dropped"], false);

    let tested = h
        .app
        .invoke(
            "test_connection",
            json!({"connection_name": "fred_api"}),
            CredentialContext::new(),
        )
        .await
        .expect("connection still usable");
    assert_eq!(tested["result"]["success"], true);
    assert_eq!(tested["result"]["auth_applied"], true);
}

#[tokio::test]
async fn validation_call_records_the_outcome() {
    let h = harness();
    let registered = h
        .app
        .invoke(
            "register_api",
            json!({
                "api_name": "open_data",
                "host": "https://data.example.org",
                "validate": true,
                "validate_path": "/health",
            }),
            CredentialContext::new(),
        )
        .await
        .expect("register");
    assert_eq!(registered["result"]["status"], "valid");
    assert_eq!(h.transport.last().url, "https://data.example.org/health");

    let listed = h
        .app
        .invoke("list_apis", json!({"status": "valid"}), CredentialContext::new())
        .await
        .expect("list");
    assert_eq!(listed["result"]["count"], 1);
}

#[tokio::test]
async fn unknown_tools_and_fields_get_suggestions() {
    let h = harness();
    let err = h
        .app
        .invoke("regster_api", json!({}), CredentialContext::new())
        .await
        .expect_err("unknown tool");
    assert!(err.hint.expect("hint").contains("register_api"));

    let err = h
        .app
        .invoke(
            "list_apis",
            json!({"stauts": "valid"}),
            CredentialContext::new(),
        )
        .await
        .expect_err("unknown field");
    assert_eq!(err.code, "INVALID_PARAMS");
    assert!(err.message.contains("status"));
}

#[tokio::test]
async fn server_lists_tools_and_answers_ping() {
    let h = harness();
    let server = McpServer::new(h.app.clone());

    let listed = server
        .handle_request(rpc(1, "tools/list", json!({})))
        .await
        .expect("response");
    let listed = serde_json::to_value(&listed).expect("serialize");
    let names: Vec<&str> = listed["result"]["tools"]
        .as_array()
        .expect("tools")
        .iter()
        .filter_map(|tool| tool["name"].as_str())
        .collect();
    for expected in ["register_api", "lookup_api", "call_api", "delete_api"] {
        assert!(names.contains(&expected), "missing {}", expected);
    }

    let ping = server
        .handle_request(rpc(2, "ping", json!({})))
        .await
        .expect("response");
    assert!(ping.error.is_none());

    let notification: JsonRpcRequest = serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "method": "notifications/initialized",
    }))
    .expect("notification");
    assert!(server.handle_request(notification).await.is_none());
}

#[tokio::test]
async fn update_api_edits_metadata_and_keeps_the_connection() {
    let h = harness();
    let registered = register_fred(&h).await;
    let api_id = registered["result"]["api_id"].as_str().expect("id").to_string();

    let updated = h
        .app
        .invoke(
            "update_api",
            json!({
                "api_id": api_id,
                "description": "FRED time series",
                "documentation_url": "https://fred.stlouisfed.org/docs/api/fred/",
            }),
            CredentialContext::new(),
        )
        .await
        .expect("update");
    let entry = &updated["result"];
    assert_eq!(entry["description"], "FRED time series");
    assert_eq!(entry["documentation_url"], "https://fred.stlouisfed.org/docs/api/fred/");
    assert_eq!(entry["available_endpoints"], json!(["/series/observations"]));
    assert_eq!(entry["status"], "pending");
    assert_eq!(entry["created_at"], registered["result"]["created_at"]);

    let looked = h
        .app
        .invoke("lookup_api", json!({"api_name": "fred_api"}), CredentialContext::new())
        .await
        .expect("lookup");
    assert_eq!(looked["result"]["description"], "FRED time series");
    assert_eq!(
        looked["result"]["connection"]["created_at"],
        registered["result"]["connection"]["created_at"]
    );

    h.app
        .invoke(
            "call_api",
            json!({"api_name": "fred_api", "path": "/series/observations"}),
            CredentialContext::new(),
        )
        .await
        .expect("call with the original credential");
    let wire: BTreeMap<String, String> = h.transport.last().wire_query().into_iter().collect();
    assert_eq!(wire.get("api_key").map(String::as_str), Some("XYZ-secret"));
}

#[tokio::test]
async fn update_api_needs_a_field_and_a_known_entry() {
    let h = harness();
    register_fred(&h).await;

    let err = h
        .app
        .invoke("update_api", json!({"api_name": "fred_api"}), CredentialContext::new())
        .await
        .expect_err("nothing to change");
    assert_eq!(err.code, "INVALID_PARAMS");

    let err = h
        .app
        .invoke(
            "update_api",
            json!({"api_name": "ghost", "description": "x"}),
            CredentialContext::new(),
        )
        .await
        .expect_err("unknown api");
    assert_eq!(err.code, "NOT_FOUND");

    let err = h
        .app
        .invoke(
            "update_api",
            json!({"api_name": "fred_api", "host": "https://elsewhere.example"}),
            CredentialContext::new(),
        )
        .await
        .expect_err("connection fields are not editable here");
    assert_eq!(err.code, "INVALID_PARAMS");
}
