// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;
use crate::credential::provider::CredentialProvider;
use crate::test_support::ConfigBuilder;

fn paused() -> ChangeSet {
    let mut cs = ChangeSet::new();
    cs.insert("status".to_owned(), json!("PAUSED"));
    cs
}

/// JSON-encode `value` `times` times.
fn encode(value: &Value, times: usize) -> String {
    let mut out = value.to_string();
    for _ in 1..times {
        out = Value::String(out).to_string();
    }
    out
}

#[yare::parameterized(
    once   = { 1 },
    twice  = { 2 },
    thrice = { 3 },
)]
fn decodes_repeated_encoding(times: usize) {
    let raw = encode(&json!({ "status": "PAUSED", "bid_amount": 150 }), times);
    let decoded = decode_change_set(&raw);
    let mut expected = paused();
    expected.insert("bid_amount".to_owned(), json!(150));
    assert_eq!(decoded, Ok(expected));
}

#[test]
fn four_encodings_is_a_decode_error() {
    let raw = encode(&json!({ "status": "PAUSED" }), 4);
    assert!(matches!(decode_change_set(&raw), Err(ConfirmError::Decode(_))));
}

#[test]
fn html_escaped_change_set_decodes() {
    let raw = "{&quot;status&quot;:&quot;PAUSED&quot;}";
    assert_eq!(decode_change_set(raw), Ok(paused()));
}

#[yare::parameterized(
    garbage = { "not json at all" },
    array   = { "[1,2,3]" },
    number  = { "42" },
    empty   = { "" },
)]
fn non_object_is_a_decode_error(raw: &str) {
    assert!(matches!(decode_change_set(raw), Err(ConfirmError::Decode(_))));
}

#[test]
fn decode_preserves_field_order() -> anyhow::Result<()> {
    let decoded = decode_change_set(r#"{"status":"ACTIVE","bid_strategy":"LOWEST_COST","bid_amount":5}"#)?;
    let keys: Vec<&str> = decoded.keys().map(String::as_str).collect();
    assert_eq!(keys, ["status", "bid_strategy", "bid_amount"]);
    Ok(())
}

#[test]
fn blame_specs_nested_list() {
    let data = json!(r#"{"blame_field_specs":[["Bid amount too low", "", "Budget too small"]]}"#);
    assert_eq!(blame_field_specs(Some(&data)), ["Bid amount too low", "Budget too small"]);
}

#[test]
fn blame_specs_flat_list() {
    let data = json!({ "blame_field_specs": ["targeting", null] });
    assert_eq!(blame_field_specs(Some(&data)), ["targeting"]);
}

#[test]
fn blame_specs_absent_or_malformed() {
    assert!(blame_field_specs(None).is_empty());
    assert!(blame_field_specs(Some(&json!("{broken"))).is_empty());
    assert!(blame_field_specs(Some(&json!({ "other": 1 }))).is_empty());
}

#[test]
fn error_result_prefers_user_message() {
    let err = GraphError::Api {
        status: 400,
        body: json!({ "error": {
            "message": "Invalid parameter",
            "code": 100,
            "error_user_msg": "Your bid is below the minimum.",
            "error_data": r#"{"blame_field_specs":[["bid_amount"]]}"#,
        }}),
    };
    let result = ExecutionResult::from_graph_error(&err).to_value();
    assert_eq!(result["status"], "error");
    assert_eq!(result["error"], "Your bid is below the minimum.");
    assert_eq!(result["detailed_errors"], json!(["bid_amount"]));
    assert_eq!(result["api_error"]["code"], 100);
    assert_eq!(result["full_response"]["error"]["code"], 100);
}

#[test]
fn error_result_falls_back_to_blame_then_message() {
    let blamed = GraphError::Api {
        status: 400,
        body: json!({ "error": {
            "message": "Invalid parameter",
            "error_data": r#"{"blame_field_specs":[["Frequency cap too high"]]}"#,
        }}),
    };
    let plain = GraphError::Api {
        status: 400,
        body: json!({ "error": { "message": "Invalid parameter" } }),
    };
    assert_eq!(ExecutionResult::from_graph_error(&blamed).to_value()["error"], "Frequency cap too high");
    assert_eq!(ExecutionResult::from_graph_error(&plain).to_value()["error"], "Invalid parameter");
}

#[test]
fn result_shapes() {
    assert_eq!(ExecutionResult::Cancelled.to_value(), json!({ "status": "cancelled" }));
    let approved = ExecutionResult::Approved { object_id: "123".into(), api_result: json!({ "success": true }) };
    assert_eq!(
        approved.to_value(),
        json!({ "status": "approved", "object_id": "123", "api_result": { "success": true } })
    );
}

#[yare::parameterized(
    approve = { "approve", Some(Action::Approve) },
    cancel  = { "cancel", Some(Action::Cancel) },
    other   = { "delete", None },
)]
fn parses_action(raw: &str, expected: Option<Action>) {
    assert_eq!(raw.parse::<Action>().ok(), expected);
}

struct Fixture {
    _dir: tempfile::TempDir,
    coordinator: ConfirmationCoordinator,
}

fn fixture(graph_uri: &str) -> anyhow::Result<Fixture> {
    let dir = tempfile::tempdir()?;
    let config = ConfigBuilder::new(dir.path()).graph_url(&format!("{graph_uri}/v22.0")).build();
    let provider = CredentialProvider::new(&config);
    let coordinator = ConfirmationCoordinator::new(Arc::new(GraphClient::new(provider)));
    Ok(Fixture { _dir: dir, coordinator })
}

#[tokio::test]
async fn propose_builds_url_on_given_port() -> anyhow::Result<()> {
    let fx = fixture("http://127.0.0.1:9")?;
    let proposal = fx.coordinator.propose(ObjectKind::AdSet, "123", paused(), "EAAB-tok", 8893);

    assert!(proposal.url.starts_with("http://localhost:8893/confirm-update?adset_id=123&token=EAAB-tok&changes="));
    assert!(proposal.url.contains("%7B%22status%22%3A%22PAUSED%22%7D"), "{}", proposal.url);
    assert!(proposal.url.ends_with(&format!("confirmation={}", proposal.id)));
    assert!(fx.coordinator.pending(&proposal.id).is_some());
    Ok(())
}

#[tokio::test]
async fn cancel_never_calls_the_api() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(0)
        .mount(&server)
        .await;

    let fx = fixture(&server.uri())?;
    let proposal = fx.coordinator.propose(ObjectKind::Ad, "456", paused(), "EAAB-tok", 8888);
    let result = fx.coordinator.execute(&proposal.id, Action::Cancel, None).await?;

    assert_eq!(result, ExecutionResult::Cancelled);
    assert_eq!(fx.coordinator.pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn approve_posts_exactly_once_and_consumes() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v22.0/123"))
        .and(body_partial_json(json!({ "status": "PAUSED", "access_token": "EAAB-tok" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let fx = fixture(&server.uri())?;
    let proposal = fx.coordinator.propose(ObjectKind::AdSet, "123", paused(), "EAAB-tok", 8888);
    let raw = encode(&json!({ "status": "PAUSED" }), 2);

    let result = fx.coordinator.execute(&proposal.id, Action::Approve, Some(&raw)).await?;
    assert_eq!(
        result.to_value(),
        json!({ "status": "approved", "object_id": "123", "api_result": { "success": true } })
    );

    let again = fx.coordinator.execute(&proposal.id, Action::Approve, Some(&raw)).await;
    assert!(matches!(again, Err(ConfirmError::UnknownConfirmation(_))));
    Ok(())
}

#[tokio::test]
async fn approve_without_raw_uses_stored_change_set() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v22.0/789"))
        .and(body_partial_json(json!({ "status": "PAUSED" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let fx = fixture(&server.uri())?;
    let proposal = fx.coordinator.propose(ObjectKind::Ad, "789", paused(), "EAAB-tok", 8888);
    let result = fx.coordinator.execute(&proposal.id, Action::Approve, None).await?;
    assert!(matches!(result, ExecutionResult::Approved { .. }), "{result:?}");
    Ok(())
}

#[tokio::test]
async fn approve_reports_api_error() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v22.0/123"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": {
            "message": "Invalid parameter",
            "code": 100,
            "error_data": r#"{"blame_field_specs":[["Bid amount is required"]]}"#,
        }})))
        .expect(1)
        .mount(&server)
        .await;

    let fx = fixture(&server.uri())?;
    let proposal = fx.coordinator.propose(ObjectKind::AdSet, "123", paused(), "EAAB-tok", 8888);
    let result = fx.coordinator.execute(&proposal.id, Action::Approve, None).await?.to_value();
    assert_eq!(result["status"], "error");
    assert_eq!(result["error"], "Bid amount is required");
    Ok(())
}

#[tokio::test]
async fn approve_with_undecodable_changes_makes_no_call() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

    let fx = fixture(&server.uri())?;
    let proposal = fx.coordinator.propose(ObjectKind::AdSet, "123", paused(), "EAAB-tok", 8888);
    let raw = encode(&json!({ "status": "PAUSED" }), 4);
    let result = fx.coordinator.execute(&proposal.id, Action::Approve, Some(&raw)).await?.to_value();
    assert_eq!(result["status"], "error");
    assert!(result["error"].as_str().is_some_and(|e| e.starts_with("Failed to decode changes JSON")));

    // Consumed even though nothing was applied.
    assert!(fx.coordinator.pending(&proposal.id).is_none());
    let retry = fx.coordinator.execute(&proposal.id, Action::Approve, None).await;
    assert!(matches!(retry, Err(ConfirmError::UnknownConfirmation(_))));
    Ok(())
}

#[tokio::test]
async fn unknown_confirmation_is_an_error() -> anyhow::Result<()> {
    let fx = fixture("http://127.0.0.1:9")?;
    let result = fx.coordinator.execute("nope", Action::Cancel, None).await;
    assert_eq!(result, Err(ConfirmError::UnknownConfirmation("nope".into())));
    Ok(())
}

#[tokio::test]
async fn abandoned_confirmations_are_pruned_on_propose() -> anyhow::Result<()> {
    let fx = fixture("http://127.0.0.1:9")?;
    let stale = fx.coordinator.propose(ObjectKind::AdSet, "123", paused(), "EAAB-tok", 8888);
    let fresh = fx.coordinator.propose(ObjectKind::Ad, "456", paused(), "EAAB-tok", 8888);
    if let Some(p) = fx.coordinator.pending.lock().get_mut(&stale.id) {
        p.created_at = epoch_secs() - PENDING_TTL_SECS - 1;
    }

    let next = fx.coordinator.propose(ObjectKind::Ad, "789", paused(), "EAAB-tok", 8888);
    assert!(fx.coordinator.pending(&stale.id).is_none());
    assert!(fx.coordinator.pending(&fresh.id).is_some());
    assert!(fx.coordinator.pending(&next.id).is_some());
    assert_eq!(fx.coordinator.pending_count(), 2);
    Ok(())
}

#[tokio::test]
async fn prune_keeps_entries_within_ttl() -> anyhow::Result<()> {
    let fx = fixture("http://127.0.0.1:9")?;
    let proposal = fx.coordinator.propose(ObjectKind::AdSet, "123", paused(), "EAAB-tok", 8888);
    let created = fx.coordinator.pending(&proposal.id).map(|p| p.created_at).unwrap_or_default();

    assert_eq!(fx.coordinator.prune_stale(created + PENDING_TTL_SECS), 0);
    assert_eq!(fx.coordinator.prune_stale(created + PENDING_TTL_SECS + 1), 1);
    assert_eq!(fx.coordinator.pending_count(), 0);
    Ok(())
}
