// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Human-in-the-loop confirmation of mutating calls.
//!
//! A mutating tool call never touches the Graph API directly. It proposes a
//! change-set, the user reviews it on `/confirm-update`, and the approve or
//! cancel click lands in [`ConfirmationCoordinator::execute`], which consumes
//! the pending entry exactly once.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::credential::epoch_secs;
use crate::credential::oauth::urlencoded;
use crate::error::ErrorCode;
use crate::graph::{GraphClient, GraphError};

/// Ordered field name to new value mapping.
pub type ChangeSet = IndexMap<String, Value>;

/// Maximum JSON decode passes applied to a change-set from the browser.
pub const MAX_DECODE_PASSES: usize = 3;

/// Pending confirmations older than this are dropped on the next proposal.
pub const PENDING_TTL_SECS: u64 = 60 * 60;

/// Kind of object a change-set targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Ad,
    AdSet,
}

impl ObjectKind {
    /// Query parameter carrying the object id (`ad_id`, `adset_id`).
    pub fn id_param(&self) -> &'static str {
        match self {
            Self::Ad => "ad_id",
            Self::AdSet => "adset_id",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Ad => "Ad",
            Self::AdSet => "Ad Set",
        }
    }

    /// Fields fetched when showing an object's current state.
    pub fn detail_fields(&self) -> &'static str {
        match self {
            Self::Ad => {
                "id,name,adset_id,campaign_id,status,creative,created_time,updated_time,\
                 bid_amount,conversion_domain,tracking_specs,preview_shareable_link"
            }
            Self::AdSet => {
                "id,name,campaign_id,status,daily_budget,lifetime_budget,targeting,\
                 bid_amount,bid_strategy,optimization_goal,billing_event,start_time,end_time,\
                 created_time,updated_time,attribution_spec,destination_type,promoted_object,\
                 pacing_type,budget_remaining,frequency_control_specs"
            }
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ad => "ad",
            Self::AdSet => "adset",
        })
    }
}

/// What the user clicked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Approve,
    Cancel,
}

impl std::str::FromStr for Action {
    type Err = ConfirmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(Self::Approve),
            "cancel" => Ok(Self::Cancel),
            other => Err(ConfirmError::UnknownAction(other.to_owned())),
        }
    }
}

/// A proposed mutation awaiting the user's decision.
#[derive(Debug, Clone)]
pub struct PendingConfirmation {
    pub id: String,
    pub kind: ObjectKind,
    pub object_id: String,
    pub change_set: ChangeSet,
    pub auth_token: String,
    /// Proposal time as epoch seconds.
    pub created_at: u64,
}

/// Result of [`ConfirmationCoordinator::propose`].
#[derive(Debug, Clone)]
pub struct Proposal {
    pub id: String,
    pub url: String,
}

/// Outcome of executing a confirmation, returned to the browser as JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecutionResult {
    Approved {
        object_id: String,
        api_result: Value,
    },
    Cancelled,
    Error {
        error: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        detailed_errors: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        api_error: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        full_response: Option<Value>,
    },
}

impl ExecutionResult {
    fn error(msg: impl Into<String>) -> Self {
        Self::Error {
            error: msg.into(),
            detailed_errors: Vec::new(),
            api_error: None,
            full_response: None,
        }
    }

    /// Build an error result from a Graph API failure.
    ///
    /// The message prefers `error_user_msg`, then the blame-field specs from
    /// `error_data`, then the plain API message.
    pub fn from_graph_error(err: &GraphError) -> Self {
        let GraphError::Api { body, .. } = err else {
            return Self::error(err.to_string());
        };
        let Some(obj) = err.error_object() else {
            return Self::Error {
                error: err.to_string(),
                detailed_errors: Vec::new(),
                api_error: None,
                full_response: Some(body.clone()),
            };
        };

        let blame = blame_field_specs(obj.get("error_data"));
        let user_msg = obj.get("error_user_msg").and_then(Value::as_str).filter(|m| !m.is_empty());
        let message = match (user_msg, blame.is_empty()) {
            (Some(msg), _) => msg.to_owned(),
            (None, false) => blame.join("; "),
            (None, true) => err.api_message().unwrap_or("Unknown API error").to_owned(),
        };

        Self::Error {
            error: message,
            detailed_errors: blame,
            api_error: Some(Value::Object(obj.clone())),
            full_response: Some(body.clone()),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "status": "error" }))
    }
}

/// Extract human-readable blame-field messages from a Graph `error_data` field.
///
/// `error_data` arrives as a JSON-encoded string (or occasionally an object)
/// whose `blame_field_specs` is either a list of lists of messages or a flat
/// list; only the first group of a nested list is used.
pub fn blame_field_specs(error_data: Option<&Value>) -> Vec<String> {
    let parsed;
    let data = match error_data {
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(v) => {
                parsed = v;
                &parsed
            }
            Err(e) => {
                tracing::debug!(err = %e, "error_data is not JSON");
                return Vec::new();
            }
        },
        Some(v @ Value::Object(_)) => v,
        _ => return Vec::new(),
    };

    let Some(specs) = data.get("blame_field_specs").and_then(Value::as_array) else {
        return Vec::new();
    };
    let to_text = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match specs.first() {
        Some(Value::Array(group)) => {
            group.iter().filter(|v| is_truthy(v)).map(to_text).collect()
        }
        Some(_) => specs.iter().filter(|v| is_truthy(v)).map(to_text).collect(),
        None => Vec::new(),
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Errors from driving a confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmError {
    /// No pending confirmation with this id (never proposed, or already used).
    UnknownConfirmation(String),
    UnknownAction(String),
    /// The change-set could not be decoded into an object.
    Decode(String),
}

impl ConfirmError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownConfirmation(_) => ErrorCode::NotFound,
            Self::UnknownAction(_) => ErrorCode::BadRequest,
            Self::Decode(_) => ErrorCode::Decode,
        }
    }
}

impl fmt::Display for ConfirmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownConfirmation(id) => {
                write!(f, "no pending confirmation {id} (it may have already been used)")
            }
            Self::UnknownAction(action) => write!(f, "unknown action: {action:?}"),
            Self::Decode(raw) => write!(f, "Failed to decode changes JSON: {raw}"),
        }
    }
}

impl std::error::Error for ConfirmError {}

#[derive(Deserialize)]
#[serde(untagged)]
enum Layer {
    Encoded(String),
    Fields(ChangeSet),
}

/// Decode a change-set that may have been JSON-encoded up to
/// [`MAX_DECODE_PASSES`] times, with HTML entities possibly escaped.
pub fn decode_change_set(raw: &str) -> Result<ChangeSet, ConfirmError> {
    let mut current = raw.to_owned();
    for _ in 0..MAX_DECODE_PASSES {
        let layer = match serde_json::from_str::<Layer>(&current) {
            Ok(layer) => layer,
            Err(_) => {
                let unescaped = unescape_html(&current);
                match serde_json::from_str::<Layer>(&unescaped) {
                    Ok(layer) => layer,
                    Err(_) => {
                        current = unescaped;
                        continue;
                    }
                }
            }
        };
        match layer {
            Layer::Fields(fields) => return Ok(fields),
            Layer::Encoded(inner) => current = inner,
        }
    }
    Err(ConfirmError::Decode(raw.to_owned()))
}

fn unescape_html(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&#x22;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Holds pending confirmations and applies or discards them.
pub struct ConfirmationCoordinator {
    graph: Arc<GraphClient>,
    pending: Mutex<HashMap<String, PendingConfirmation>>,
}

impl ConfirmationCoordinator {
    pub fn new(graph: Arc<GraphClient>) -> Self {
        Self { graph, pending: Mutex::new(HashMap::new()) }
    }

    pub fn graph(&self) -> &Arc<GraphClient> {
        &self.graph
    }

    /// Store a pending confirmation and build its review URL on `port`.
    ///
    /// The caller must have the callback server running on `port`.
    pub fn propose(
        &self,
        kind: ObjectKind,
        object_id: &str,
        change_set: ChangeSet,
        token: &str,
        port: u16,
    ) -> Proposal {
        let now = epoch_secs();
        self.prune_stale(now);
        let id = uuid::Uuid::new_v4().to_string();
        let changes = serde_json::to_string(&change_set).unwrap_or_else(|_| "{}".to_owned());
        let url = format!(
            "http://localhost:{port}/confirm-update?{}",
            urlencoded(&[
                (kind.id_param(), object_id),
                ("token", token),
                ("changes", &changes),
                ("confirmation", &id),
            ])
        );

        tracing::info!(
            confirmation = %id,
            %kind,
            object_id,
            fields = ?change_set.keys().collect::<Vec<_>>(),
            "proposed update awaiting confirmation"
        );
        self.pending.lock().insert(
            id.clone(),
            PendingConfirmation {
                id: id.clone(),
                kind,
                object_id: object_id.to_owned(),
                change_set,
                auth_token: token.to_owned(),
                created_at: now,
            },
        );
        Proposal { id, url }
    }

    /// Snapshot of a pending confirmation.
    pub fn pending(&self, id: &str) -> Option<PendingConfirmation> {
        self.pending.lock().get(id).cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drop pending confirmations proposed more than [`PENDING_TTL_SECS`]
    /// before `now`. Returns how many were dropped.
    fn prune_stale(&self, now: u64) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, p| now.saturating_sub(p.created_at) <= PENDING_TTL_SECS);
        let dropped = before - pending.len();
        if dropped > 0 {
            tracing::info!(dropped, "discarded abandoned confirmations");
        }
        dropped
    }

    /// Apply or discard a pending confirmation, consuming it.
    ///
    /// On approve, `raw_changes` (as echoed back by the browser) is decoded and
    /// applied when present; otherwise the stored change-set is used. Exactly
    /// one POST is issued. Cancel never calls the Graph API.
    pub async fn execute(
        &self,
        id: &str,
        action: Action,
        raw_changes: Option<&str>,
    ) -> Result<ExecutionResult, ConfirmError> {
        let pending = self
            .pending
            .lock()
            .remove(id)
            .ok_or_else(|| ConfirmError::UnknownConfirmation(id.to_owned()))?;

        if action == Action::Cancel {
            tracing::info!(confirmation = %id, object_id = %pending.object_id, "update cancelled");
            return Ok(ExecutionResult::Cancelled);
        }

        let changes = match raw_changes.filter(|raw| !raw.is_empty()) {
            Some(raw) => match decode_change_set(raw) {
                Ok(changes) => changes,
                Err(e) => {
                    tracing::warn!(confirmation = %id, err = %e, "undecodable change-set");
                    return Ok(ExecutionResult::error(e.to_string()));
                }
            },
            None => pending.change_set.clone(),
        };
        if changes != pending.change_set {
            tracing::warn!(confirmation = %id, "browser change-set differs from the proposal");
        }

        tracing::info!(
            confirmation = %id,
            kind = %pending.kind,
            object_id = %pending.object_id,
            "applying confirmed update"
        );
        let result = match self.graph.post(&pending.object_id, &pending.auth_token, &changes).await
        {
            Ok(Value::Null) => ExecutionResult::error("Empty response from Meta API"),
            Ok(api_result) => {
                ExecutionResult::Approved { object_id: pending.object_id.clone(), api_result }
            }
            Err(e) => {
                tracing::error!(object_id = %pending.object_id, err = %e, "update rejected");
                ExecutionResult::from_graph_error(&e)
            }
        };
        Ok(result)
    }
}

#[cfg(test)]
#[path = "confirm_tests.rs"]
mod tests;
