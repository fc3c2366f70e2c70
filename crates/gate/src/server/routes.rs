// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the callback server.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tower_http::trace::TraceLayer;

use crate::confirm::{Action, ChangeSet, ConfirmationCoordinator, ObjectKind};
use crate::credential::provider::CredentialProvider;
use crate::credential::{epoch_secs, mask_token};
use crate::error::ErrorCode;

const CALLBACK_HTML: &str = include_str!("../../web/callback.html");
const CONFIRM_HTML: &str = include_str!("../../web/confirm.html");
const VERIFY_HTML: &str = include_str!("../../web/verify.html");
const MESSAGE_HTML: &str = include_str!("../../web/message.html");

/// Token most recently relayed by the browser.
#[derive(Debug, Clone)]
pub struct ReceivedToken {
    pub token: String,
    pub expires_in: Option<u64>,
    pub received_at: u64,
}

/// Shared state visible to every handler.
pub struct CallbackContext {
    pub provider: Arc<CredentialProvider>,
    pub coordinator: Arc<ConfirmationCoordinator>,
    received: Mutex<Option<ReceivedToken>>,
}

impl CallbackContext {
    pub fn new(
        provider: Arc<CredentialProvider>,
        coordinator: Arc<ConfirmationCoordinator>,
    ) -> Arc<Self> {
        Arc::new(Self { provider, coordinator, received: Mutex::new(None) })
    }

    pub fn last_received(&self) -> Option<ReceivedToken> {
        self.received.lock().clone()
    }
}

/// Build the axum `Router` with all callback server routes.
pub fn build_router(ctx: Arc<CallbackContext>) -> Router {
    Router::new()
        // Browser token flow
        .route("/callback", get(|| async { Html(CALLBACK_HTML) }))
        .route("/token", get(receive_token))
        // Confirmation flow
        .route("/confirm-update", get(confirm_page))
        .route("/update-confirm", get(update_confirm))
        .route("/verify-update", get(verify_page))
        // Read-back for the verification page
        .route("/api/adset", get(adset_details))
        .route("/api/ad", get(ad_details))
        .fallback(|| async { ErrorCode::NotFound.to_http_response("not found") })
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    pub token: Option<String>,
    /// Raw string: the callback page forwards whatever the fragment held,
    /// including `undefined`.
    #[serde(default)]
    pub expires_in: Option<String>,
}

/// `GET /token` - accept the token relayed by the callback page.
pub async fn receive_token(
    State(ctx): State<Arc<CallbackContext>>,
    Query(q): Query<TokenQuery>,
) -> Response {
    let Some(token) = q.token.filter(|t| !t.is_empty()) else {
        return ErrorCode::BadRequest.to_http_response("missing token").into_response();
    };
    let expires_in = q.expires_in.as_deref().and_then(|s| s.trim().parse::<u64>().ok());
    tracing::info!(token = %mask_token(&token), ?expires_in, "token relayed from browser");

    *ctx.received.lock() =
        Some(ReceivedToken { token: token.clone(), expires_in, received_at: epoch_secs() });
    ctx.provider.accept_token(&token, expires_in).await;

    (StatusCode::OK, "Token received").into_response()
}

/// Object reference carried by confirmation URLs (`adset_id=` or `ad_id=`).
#[derive(Debug, Default, Deserialize)]
pub struct ObjectQuery {
    #[serde(default)]
    pub adset_id: Option<String>,
    #[serde(default)]
    pub ad_id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

impl ObjectQuery {
    fn target(&self) -> Option<(ObjectKind, &str)> {
        match (self.adset_id.as_deref(), self.ad_id.as_deref()) {
            (Some(id), _) if !id.is_empty() => Some((ObjectKind::AdSet, id)),
            (_, Some(id)) if !id.is_empty() => Some((ObjectKind::Ad, id)),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfirmQuery {
    #[serde(flatten)]
    pub object: ObjectQuery,
    #[serde(default)]
    pub confirmation: Option<String>,
}

/// `GET /confirm-update` - review page for a proposed change-set.
pub async fn confirm_page(
    State(ctx): State<Arc<CallbackContext>>,
    Query(q): Query<ConfirmQuery>,
) -> Response {
    let Some((kind, object_id)) = q.object.target() else {
        return message_page(StatusCode::BAD_REQUEST, "Invalid request", "No ad set or ad ID provided.");
    };
    let Some(pending) = q.confirmation.as_deref().and_then(|id| ctx.coordinator.pending(id)) else {
        return message_page(
            StatusCode::NOT_FOUND,
            "Confirmation expired",
            "This confirmation link has expired or was already used. Ask for the update again.",
        );
    };
    if pending.object_id != object_id || pending.kind != kind {
        return message_page(
            StatusCode::BAD_REQUEST,
            "Invalid request",
            "The confirmation does not match the requested object.",
        );
    }

    // The stored change-set is authoritative; the `changes` URL parameter is
    // only informational.
    let changes_json =
        serde_json::to_string(&pending.change_set).unwrap_or_else(|_| "{}".to_owned());
    let params = serde_json::json!({
        "id_param": kind.id_param(),
        "kind": kind.to_string(),
        "object_id": pending.object_id,
        "token": pending.auth_token,
        "changes": changes_json,
        "confirmation": pending.id,
    });

    let html = CONFIRM_HTML
        .replace("{{KIND_LABEL}}", kind.label())
        .replace("{{OBJECT_ID}}", &escape_html(&pending.object_id))
        .replace("{{PARAMS}}", &script_json(&params))
        .replace("{{ROWS}}", &change_rows(&pending.change_set));
    Html(html).into_response()
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuery {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub confirmation: Option<String>,
    #[serde(default)]
    pub changes: Option<String>,
}

/// `GET /update-confirm` - apply or discard a pending confirmation.
pub async fn update_confirm(
    State(ctx): State<Arc<CallbackContext>>,
    Query(q): Query<UpdateQuery>,
) -> Response {
    let action = match q.action.as_deref().unwrap_or_default().parse::<Action>() {
        Ok(a) => a,
        Err(e) => return e.code().to_http_response(e.to_string()).into_response(),
    };
    let Some(id) = q.confirmation.filter(|c| !c.is_empty()) else {
        return ErrorCode::BadRequest.to_http_response("missing confirmation id").into_response();
    };

    match ctx.coordinator.execute(&id, action, q.changes.as_deref()).await {
        Ok(result) => Json(result.to_value()).into_response(),
        Err(e) => e.code().to_http_response(e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(flatten)]
    pub object: ObjectQuery,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, rename = "errorData")]
    pub error_data: Option<String>,
}

/// `GET /verify-update` - result page after approve.
pub async fn verify_page(Query(q): Query<VerifyQuery>) -> Response {
    let Some((kind, object_id)) = q.object.target() else {
        return message_page(StatusCode::BAD_REQUEST, "Invalid request", "No ad set or ad ID provided.");
    };

    let banner = match q.error.as_deref().filter(|e| !e.is_empty()) {
        None => format!(
            "<div class=\"banner success\">{} {} was updated.</div>",
            kind.label(),
            escape_html(object_id)
        ),
        Some(err) => {
            let details = q
                .error_data
                .as_deref()
                .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
                .and_then(|v| serde_json::to_string_pretty(&v).ok())
                .map(|pretty| format!("<pre>{}</pre>", escape_html(&pretty)))
                .unwrap_or_default();
            format!(
                "<div class=\"banner error\"><strong>Update failed:</strong> {}</div>{details}",
                escape_html(err)
            )
        }
    };
    let params = serde_json::json!({
        "kind": kind.to_string(),
        "id_param": kind.id_param(),
        "object_id": object_id,
        "token": q.object.token.as_deref().unwrap_or_default(),
    });

    let html = VERIFY_HTML
        .replace("{{KIND_LABEL}}", kind.label())
        .replace("{{OBJECT_ID}}", &escape_html(object_id))
        .replace("{{PARAMS}}", &script_json(&params))
        .replace("{{BANNER}}", &banner);
    Html(html).into_response()
}

/// `GET /api/adset` - current ad set state.
pub async fn adset_details(
    State(ctx): State<Arc<CallbackContext>>,
    Query(q): Query<ObjectQuery>,
) -> Response {
    object_details(&ctx, ObjectKind::AdSet, q.adset_id.as_deref(), q.token.as_deref()).await
}

/// `GET /api/ad` - current ad state.
pub async fn ad_details(
    State(ctx): State<Arc<CallbackContext>>,
    Query(q): Query<ObjectQuery>,
) -> Response {
    object_details(&ctx, ObjectKind::Ad, q.ad_id.as_deref(), q.token.as_deref()).await
}

async fn object_details(
    ctx: &CallbackContext,
    kind: ObjectKind,
    object_id: Option<&str>,
    token: Option<&str>,
) -> Response {
    let Some(object_id) = object_id.filter(|id| !id.is_empty()) else {
        return ErrorCode::BadRequest
            .to_http_response(format!("missing {}", kind.id_param()))
            .into_response();
    };
    let Some(token) = ctx.provider.resolve(token).await else {
        return ErrorCode::AuthRequired.to_http_response("no access token").into_response();
    };

    let graph = ctx.coordinator.graph();
    match graph.get(object_id, &token, &[("fields", kind.detail_fields())]).await {
        Ok(value) => Json(value).into_response(),
        Err(e) => (StatusCode::BAD_GATEWAY, Json(e.to_value())).into_response(),
    }
}

fn message_page(status: StatusCode, title: &str, message: &str) -> Response {
    let html = MESSAGE_HTML
        .replace("{{TITLE}}", &escape_html(title))
        .replace("{{MESSAGE}}", &escape_html(message));
    (status, Html(html)).into_response()
}

/// Table rows (`<tr>`) describing each change.
pub fn change_rows(changes: &ChangeSet) -> String {
    changes
        .iter()
        .map(|(field, value)| {
            let shown = match value {
                Value::String(s) => s.clone(),
                Value::Array(_) | Value::Object(_) => {
                    serde_json::to_string_pretty(value).unwrap_or_default()
                }
                other => other.to_string(),
            };
            format!(
                "<tr><td>{}</td><td><pre>{}</pre></td><td>{}</td></tr>",
                escape_html(field),
                escape_html(&shown),
                escape_html(&describe_change(field, value).unwrap_or_default()),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Plain-language description for fields that are hard to read raw.
pub fn describe_change(field: &str, value: &Value) -> Option<String> {
    match field {
        "frequency_control_specs" => {
            let spec = value.as_array()?.first()?;
            let event = spec.get("event")?.as_str()?;
            let interval = spec.get("interval_days")?;
            let max = spec.get("max_frequency")?;
            Some(format!("Cap to {max} {} per {interval} days", event.to_lowercase()))
        }
        "targeting" => {
            let audience = value.get("targeting_automation")?.get("advantage_audience")?;
            if audience.as_i64() == Some(1) {
                Some(
                    "Set Advantage+ audience to ON (may be restricted for Special Ad Categories)"
                        .to_owned(),
                )
            } else {
                Some("Set Advantage+ audience to OFF".to_owned())
            }
        }
        _ => None,
    }
}

/// Escape text for HTML element content and attribute values.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Serialize `value` for embedding inside a `<script>` element.
fn script_json(value: &Value) -> String {
    value.to_string().replace("</", "<\\/")
}

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;
