// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;
use crate::graph::GraphClient;
use crate::test_support::ConfigBuilder;

struct Fixture {
    _dir: tempfile::TempDir,
    ctx: Arc<CallbackContext>,
    server: TestServer,
}

fn fixture(graph_uri: &str) -> anyhow::Result<Fixture> {
    let dir = tempfile::tempdir()?;
    let config = ConfigBuilder::new(dir.path()).graph_url(&format!("{graph_uri}/v22.0")).build();
    let provider = CredentialProvider::new(&config);
    let graph = Arc::new(GraphClient::new(Arc::clone(&provider)));
    let coordinator = Arc::new(ConfirmationCoordinator::new(graph));
    let ctx = CallbackContext::new(provider, coordinator);
    let server = TestServer::new(build_router(Arc::clone(&ctx)))?;
    Ok(Fixture { _dir: dir, ctx, server })
}

fn changes(value: Value) -> ChangeSet {
    serde_json::from_value(value).unwrap_or_default()
}

#[tokio::test]
async fn callback_serves_fragment_relay_page() -> anyhow::Result<()> {
    let fx = fixture("http://127.0.0.1:9")?;
    let resp = fx.server.get("/callback").await;
    resp.assert_status_ok();
    let body = resp.text();
    assert!(body.contains("<!DOCTYPE html>"));
    assert!(body.contains("window.location.hash"));
    assert!(body.contains("/token?token="));
    Ok(())
}

#[tokio::test]
async fn token_without_value_is_rejected() -> anyhow::Result<()> {
    let fx = fixture("http://127.0.0.1:9")?;
    let resp = fx.server.get("/token").await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = resp.json();
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert!(fx.ctx.provider.cached_token().is_none());
    Ok(())
}

#[tokio::test]
async fn token_is_accepted_and_cached() -> anyhow::Result<()> {
    let fx = fixture("http://127.0.0.1:9")?;
    fx.ctx.provider.invalidate();

    let resp = fx.server.get("/token").add_query_param("token", "EAAB-from-browser").add_query_param("expires_in", "5400").await;
    resp.assert_status_ok();
    assert_eq!(resp.text(), "Token received");

    assert_eq!(fx.ctx.provider.cached_token().as_deref(), Some("EAAB-from-browser"));
    assert!(!fx.ctx.provider.needs_authentication());
    let received = fx.ctx.last_received().map(|r| (r.token, r.expires_in));
    assert_eq!(received, Some(("EAAB-from-browser".to_owned(), Some(5400))));
    Ok(())
}

#[tokio::test]
async fn token_with_undefined_expiry_never_expires() -> anyhow::Result<()> {
    let fx = fixture("http://127.0.0.1:9")?;
    let resp = fx.server.get("/token").add_query_param("token", "EAAB-x").add_query_param("expires_in", "undefined").await;
    resp.assert_status_ok();
    let cred = fx.ctx.provider.credential();
    assert_eq!(cred.map(|c| c.expires_in), Some(None));
    Ok(())
}

#[tokio::test]
async fn confirm_page_renders_change_table() -> anyhow::Result<()> {
    let fx = fixture("http://127.0.0.1:9")?;
    let proposal = fx.ctx.coordinator.propose(
        ObjectKind::AdSet,
        "120200",
        changes(json!({
            "frequency_control_specs": [{ "event": "IMPRESSIONS", "interval_days": 7, "max_frequency": 3 }],
            "status": "PAUSED",
        })),
        "EAAB-tok",
        8888,
    );

    let resp = fx
        .server
        .get("/confirm-update")
        .add_query_param("adset_id", "120200")
        .add_query_param("confirmation", &proposal.id)
        .await;
    resp.assert_status_ok();
    let body = resp.text();
    assert!(body.contains("Confirm Ad Set update"));
    assert!(body.contains("<strong>120200</strong>"));
    assert!(body.contains("Cap to 3 impressions per 7 days"));
    assert!(body.contains(&proposal.id));
    Ok(())
}

#[tokio::test]
async fn confirm_page_for_unknown_confirmation_is_404() -> anyhow::Result<()> {
    let fx = fixture("http://127.0.0.1:9")?;
    let resp = fx
        .server
        .get("/confirm-update")
        .add_query_param("ad_id", "1")
        .add_query_param("confirmation", "missing")
        .await;
    resp.assert_status(StatusCode::NOT_FOUND);
    assert!(resp.text().contains("expired or was already used"));
    Ok(())
}

#[tokio::test]
async fn confirm_page_without_object_is_400() -> anyhow::Result<()> {
    let fx = fixture("http://127.0.0.1:9")?;
    fx.server.get("/confirm-update").await.assert_status(StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn confirm_page_rejects_mismatched_object() -> anyhow::Result<()> {
    let fx = fixture("http://127.0.0.1:9")?;
    let proposal =
        fx.ctx.coordinator.propose(ObjectKind::Ad, "111", changes(json!({ "status": "PAUSED" })), "EAAB-tok", 8888);
    let resp = fx
        .server
        .get("/confirm-update")
        .add_query_param("ad_id", "222")
        .add_query_param("confirmation", &proposal.id)
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn cancel_consumes_confirmation() -> anyhow::Result<()> {
    let fx = fixture("http://127.0.0.1:9")?;
    let proposal =
        fx.ctx.coordinator.propose(ObjectKind::Ad, "111", changes(json!({ "status": "PAUSED" })), "EAAB-tok", 8888);

    let resp = fx
        .server
        .get("/update-confirm")
        .add_query_param("action", "cancel")
        .add_query_param("confirmation", &proposal.id)
        .await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body, json!({ "status": "cancelled" }));

    let again = fx
        .server
        .get("/update-confirm")
        .add_query_param("action", "cancel")
        .add_query_param("confirmation", &proposal.id)
        .await;
    again.assert_status(StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn update_confirm_validates_input() -> anyhow::Result<()> {
    let fx = fixture("http://127.0.0.1:9")?;
    let bad_action = fx.server.get("/update-confirm").add_query_param("action", "delete").add_query_param("confirmation", "x").await;
    bad_action.assert_status(StatusCode::BAD_REQUEST);

    let no_id = fx.server.get("/update-confirm").add_query_param("action", "approve").await;
    no_id.assert_status(StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn approve_applies_change_set() -> anyhow::Result<()> {
    let graph = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v22.0/120200"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&graph)
        .await;

    let fx = fixture(&graph.uri())?;
    let proposal =
        fx.ctx.coordinator.propose(ObjectKind::AdSet, "120200", changes(json!({ "status": "PAUSED" })), "EAAB-tok", 8888);

    let resp = fx
        .server
        .get("/update-confirm")
        .add_query_param("action", "approve")
        .add_query_param("confirmation", &proposal.id)
        .add_query_param("changes", r#"{"status":"PAUSED"}"#)
        .await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["status"], "approved");
    assert_eq!(body["object_id"], "120200");
    Ok(())
}

#[tokio::test]
async fn verify_page_shows_escaped_error() -> anyhow::Result<()> {
    let fx = fixture("http://127.0.0.1:9")?;
    let resp = fx
        .server
        .get("/verify-update")
        .add_query_param("ad_id", "77")
        .add_query_param("error", "<b>Bid too low</b>")
        .add_query_param("errorData", r#"{"details":["bid_amount"]}"#)
        .await;
    resp.assert_status_ok();
    let body = resp.text();
    assert!(body.contains("&lt;b&gt;Bid too low&lt;/b&gt;"));
    assert!(body.contains("bid_amount"));
    assert!(body.contains("\"kind\":\"ad\""));
    Ok(())
}

#[tokio::test]
async fn verify_page_success_banner() -> anyhow::Result<()> {
    let fx = fixture("http://127.0.0.1:9")?;
    let resp = fx.server.get("/verify-update").add_query_param("adset_id", "55").await;
    resp.assert_status_ok();
    assert!(resp.text().contains("Ad Set 55 was updated."));
    Ok(())
}

#[tokio::test]
async fn adset_api_proxies_graph() -> anyhow::Result<()> {
    let graph = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v22.0/120200"))
        .and(query_param("access_token", "EAAB-tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "120200", "status": "PAUSED" })))
        .expect(1)
        .mount(&graph)
        .await;

    let fx = fixture(&graph.uri())?;
    let resp = fx.server.get("/api/adset").add_query_param("adset_id", "120200").add_query_param("token", "EAAB-tok").await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["status"], "PAUSED");
    Ok(())
}

#[tokio::test]
async fn ad_api_requires_id() -> anyhow::Result<()> {
    let fx = fixture("http://127.0.0.1:9")?;
    fx.server.get("/api/ad").await.assert_status(StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn unknown_route_is_404() -> anyhow::Result<()> {
    let fx = fixture("http://127.0.0.1:9")?;
    let resp = fx.server.get("/nope").await;
    resp.assert_status(StatusCode::NOT_FOUND);
    let body: Value = resp.json();
    assert_eq!(body["error"]["code"], "NOT_FOUND");
    Ok(())
}

#[yare::parameterized(
    frequency_cap = {
        "frequency_control_specs",
        json!([{ "event": "IMPRESSIONS", "interval_days": 7, "max_frequency": 2 }]),
        Some("Cap to 2 impressions per 7 days")
    },
    incomplete_cap = { "frequency_control_specs", json!([{ "event": "IMPRESSIONS" }]), None },
    advantage_on = {
        "targeting",
        json!({ "targeting_automation": { "advantage_audience": 1 } }),
        Some("Set Advantage+ audience to ON (may be restricted for Special Ad Categories)")
    },
    advantage_off = {
        "targeting",
        json!({ "targeting_automation": { "advantage_audience": 0 } }),
        Some("Set Advantage+ audience to OFF")
    },
    plain_targeting = { "targeting", json!({ "geo_locations": {} }), None },
    status = { "status", json!("PAUSED"), None },
)]
fn describes_changes(field: &str, value: Value, expected: Option<&str>) {
    assert_eq!(describe_change(field, &value).as_deref(), expected);
}

#[test]
fn escapes_html() {
    assert_eq!(escape_html(r#"<a href="x">'&'</a>"#), "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;");
}

#[test]
fn script_json_cannot_close_script() {
    let out = script_json(&json!({ "v": "</script><script>alert(1)" }));
    assert!(!out.contains("</script>"));
}
