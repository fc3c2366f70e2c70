// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;
use crate::credential::{cache_path, persist, CacheKind, Credential};
use crate::test_support::ConfigBuilder;

fn seed(dir: &std::path::Path, token: &str) -> anyhow::Result<()> {
    persist::save(&cache_path(dir, CacheKind::Local), &Credential::issued(token, None))
}

async fn read_me(gate: &Gate, explicit: Option<&str>) -> ToolOutcome {
    let graph = Arc::clone(gate.graph());
    gate.invoke(explicit, |token| async move { graph.get("me", &token, &[]).await }).await
}

#[tokio::test]
async fn missing_token_returns_login_link_on_live_port() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let gate = Gate::new(&ConfigBuilder::new(dir.path()).build());

    let outcome = read_me(&gate, None).await;
    let ToolOutcome::AuthRequired { reason, ref link } = outcome else {
        anyhow::bail!("expected AuthRequired, got {outcome:?}");
    };
    assert_eq!(reason, AuthReason::Missing);
    let port = gate.server().port().unwrap_or_default();
    assert!(port > 0);
    assert!(link.url().contains(&format!("redirect_uri=http://localhost:{port}/callback")), "url: {}", link.url());

    let value = outcome.to_value();
    assert_eq!(value["error"]["code"], "AUTH_REQUIRED");
    assert_eq!(value["error"]["message"], "Authentication Required");
    let details = &value["error"]["details"];
    assert_eq!(details["login_url"], link.url());
    assert!(details["markdown_link"].as_str().is_some_and(|m| m.starts_with("[Click here to authenticate")));
    assert_eq!(details["server_status"], format!("Callback server running on port {port}"));
    Ok(())
}

#[tokio::test]
async fn missing_app_id_is_a_config_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let gate = Gate::new(&ConfigBuilder::new(dir.path()).app_id(None).build());

    let value = read_me(&gate, None).await.to_value();
    assert_eq!(value["error"]["code"], "CONFIG");
    assert!(!gate.server().is_running());
    Ok(())
}

#[tokio::test]
async fn cached_token_goes_straight_to_graph() -> anyhow::Result<()> {
    let graph = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v22.0/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "42" })))
        .expect(1)
        .mount(&graph)
        .await;

    let dir = tempfile::tempdir()?;
    seed(dir.path(), "EAAB-cached-token")?;
    let gate = Gate::new(&ConfigBuilder::new(dir.path()).graph_url(&format!("{}/v22.0", graph.uri())).build());

    let outcome = read_me(&gate, None).await;
    assert!(outcome.is_ok());
    assert_eq!(outcome.to_value(), json!({ "id": "42" }));
    assert!(!gate.server().is_running());
    Ok(())
}

#[tokio::test]
async fn rejected_token_asks_for_reauthentication() -> anyhow::Result<()> {
    let graph = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v22.0/me"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "Error validating access token", "type": "OAuthException", "code": 190 }
        })))
        .mount(&graph)
        .await;

    let dir = tempfile::tempdir()?;
    seed(dir.path(), "EAAB-stale-token")?;
    let gate = Gate::new(&ConfigBuilder::new(dir.path()).graph_url(&format!("{}/v22.0", graph.uri())).build());

    let outcome = read_me(&gate, None).await;
    assert!(matches!(outcome, ToolOutcome::AuthRequired { reason: AuthReason::Rejected, .. }));
    let value = outcome.to_value();
    assert!(value["error"]["details"]["description"]
        .as_str()
        .is_some_and(|d| d.starts_with("Session expired")));
    assert!(gate.provider().cached_token().is_none());
    assert!(gate.provider().needs_authentication());
    Ok(())
}

#[tokio::test]
async fn app_id_rejection_keeps_credential() -> anyhow::Result<()> {
    let graph = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v22.0/me"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "(#200) Provide valid app ID", "code": 200 }
        })))
        .mount(&graph)
        .await;

    let dir = tempfile::tempdir()?;
    seed(dir.path(), "EAAB-cached-token")?;
    let gate = Gate::new(&ConfigBuilder::new(dir.path()).graph_url(&format!("{}/v22.0", graph.uri())).build());

    let value = read_me(&gate, None).await.to_value();
    assert_eq!(value["error"]["code"], "CONFIG");
    assert_eq!(gate.provider().cached_token().as_deref(), Some("EAAB-cached-token"));
    Ok(())
}

#[tokio::test]
async fn other_api_errors_are_reported() -> anyhow::Result<()> {
    let graph = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v22.0/me"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "Invalid parameter", "code": 100 }
        })))
        .mount(&graph)
        .await;

    let dir = tempfile::tempdir()?;
    seed(dir.path(), "EAAB-cached-token")?;
    let gate = Gate::new(&ConfigBuilder::new(dir.path()).graph_url(&format!("{}/v22.0", graph.uri())).build());

    let value = read_me(&gate, None).await.to_value();
    assert_eq!(value["error"]["code"], "API_ERROR");
    assert_eq!(value["error"]["details"]["error"], "HTTP Error: 400");
    assert!(gate.provider().cached_token().is_some());
    Ok(())
}

#[tokio::test]
async fn broker_mode_links_to_broker_login() -> anyhow::Result<()> {
    let broker = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/meta/token"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&broker)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/meta/auth"))
        .and(header("authorization", "Bearer pb-token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "loginUrl": "https://broker.example/login/abc" })),
        )
        .mount(&broker)
        .await;

    let dir = tempfile::tempdir()?;
    let gate = Gate::new(
        &ConfigBuilder::new(dir.path()).app_id(None).broker(&format!("{}/api", broker.uri()), "pb-token").build(),
    );

    let outcome = read_me(&gate, None).await;
    let value = outcome.to_value();
    assert_eq!(value["error"]["code"], "AUTH_REQUIRED");
    assert_eq!(value["error"]["details"]["login_url"], "https://broker.example/login/abc");
    assert!(!gate.server().is_running());
    Ok(())
}

#[tokio::test]
async fn propose_update_validates_input() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let gate = Gate::new(&ConfigBuilder::new(dir.path()).build());

    let empty = gate.propose_update(ObjectKind::AdSet, "120", ChangeSet::new(), Some("EAAB-tok")).await;
    assert_eq!(empty.to_value()["error"]["message"], "No update parameters provided");

    let mut changes = ChangeSet::new();
    changes.insert("status".to_owned(), json!("PAUSED"));
    let no_id = gate.propose_update(ObjectKind::Ad, "", changes, Some("EAAB-tok")).await;
    assert_eq!(no_id.to_value()["error"]["message"], "No ad ID provided");
    assert_eq!(gate.coordinator().pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn propose_update_returns_confirmation_link() -> anyhow::Result<()> {
    let graph = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v22.0/120"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "120", "status": "ACTIVE" })))
        .mount(&graph)
        .await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&graph).await;

    let dir = tempfile::tempdir()?;
    seed(dir.path(), "EAAB-cached-token")?;
    let gate = Gate::new(&ConfigBuilder::new(dir.path()).graph_url(&format!("{}/v22.0", graph.uri())).build());

    let mut changes = ChangeSet::new();
    changes.insert("status".to_owned(), json!("PAUSED"));
    let outcome = gate.propose_update(ObjectKind::AdSet, "120", changes, None).await;
    let value = outcome.to_value();

    let port = gate.server().port().unwrap_or_default();
    let url = value["confirmation_url"].as_str().unwrap_or_default();
    assert!(url.starts_with(&format!("http://localhost:{port}/confirm-update?adset_id=120")), "url: {url}");
    assert_eq!(value["current_details"]["status"], "ACTIVE");
    assert_eq!(value["proposed_changes"], json!({ "status": "PAUSED" }));
    assert_eq!(gate.coordinator().pending_count(), 1);
    Ok(())
}
