// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tool-call interceptor.
//!
//! [`Gate::invoke`] wraps every read operation: it resolves a token, runs the
//! operation, and turns missing or rejected credentials into an
//! "authentication required" outcome carrying a login link built against the
//! callback server's current port. Mutations go through [`Gate::propose_update`]
//! and never reach the Graph API until the user approves them in the browser.

use std::future::Future;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::GateConfig;
use crate::confirm::{ChangeSet, ConfirmationCoordinator, ObjectKind};
use crate::credential::provider::{CredentialProvider, LoginLink};
use crate::error::{ErrorCode, ErrorResponse};
use crate::graph::{GraphClient, GraphError};
use crate::server::{CallbackContext, CallbackServer, ServerSettings};

const INSTRUCTIONS_FOR_LLM: &str =
    "You must present this link as clickable Markdown to the user using the markdown_link format provided.";

/// Why a tool call needs the user to log in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthReason {
    /// No token could be resolved.
    Missing,
    /// The Graph API rejected the token and it was invalidated.
    Rejected,
}

/// Result of an intercepted tool call.
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Ok(Value),
    AuthRequired { reason: AuthReason, link: LoginLink },
    Error(ErrorResponse),
}

impl ToolOutcome {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(code.to_response(message))
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// JSON returned to the tool host.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Ok(value) => value.clone(),
            Self::Error(err) => err.to_value(),
            Self::AuthRequired { reason, link } => {
                let url = link.url();
                let (description, action, markdown) = match reason {
                    AuthReason::Missing => (
                        "Authentication required to use Meta Ads API",
                        "Please authenticate first",
                        format!("[Click here to authenticate with Meta Ads API]({url})"),
                    ),
                    AuthReason::Rejected => (
                        "Session expired or token invalid. Please re-authenticate with Meta Ads API",
                        "Please re-authenticate",
                        format!("[Click here to re-authenticate with Meta Ads API]({url})"),
                    ),
                };
                let server_status = match link {
                    LoginLink::Local { port, .. } => format!("Callback server running on port {port}"),
                    LoginLink::Broker { .. } => "Login is handled by the token broker".to_owned(),
                };
                ErrorCode::AuthRequired
                    .with_details(
                        "Authentication Required",
                        json!({
                            "description": description,
                            "action_required": action,
                            "login_url": url,
                            "markdown_link": markdown,
                            "server_status": server_status,
                            "instructions_for_llm": INSTRUCTIONS_FOR_LLM,
                            "note": "After authenticating, the token will be automatically saved.",
                        }),
                    )
                    .to_value()
            }
        }
    }
}

/// Shared components behind every tool call.
pub struct Gate {
    provider: Arc<CredentialProvider>,
    graph: Arc<GraphClient>,
    coordinator: Arc<ConfirmationCoordinator>,
    server: Arc<CallbackServer>,
}

impl Gate {
    /// Wire the provider, Graph client, coordinator and (stopped) callback server.
    pub fn new(config: &GateConfig) -> Arc<Self> {
        let provider = CredentialProvider::new(config);
        let graph = Arc::new(GraphClient::new(Arc::clone(&provider)));
        let coordinator = Arc::new(ConfirmationCoordinator::new(Arc::clone(&graph)));
        let context = CallbackContext::new(Arc::clone(&provider), Arc::clone(&coordinator));
        let server = CallbackServer::new(ServerSettings::from_config(config), context);
        Arc::new(Self { provider, graph, coordinator, server })
    }

    pub fn provider(&self) -> &Arc<CredentialProvider> {
        &self.provider
    }

    pub fn graph(&self) -> &Arc<GraphClient> {
        &self.graph
    }

    pub fn coordinator(&self) -> &Arc<ConfirmationCoordinator> {
        &self.coordinator
    }

    pub fn server(&self) -> &Arc<CallbackServer> {
        &self.server
    }

    /// Run `op` with a resolved token.
    ///
    /// Never waits for the browser: with no token the outcome is
    /// [`ToolOutcome::AuthRequired`] right away.
    pub async fn invoke<F, Fut>(&self, explicit_token: Option<&str>, op: F) -> ToolOutcome
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Value, GraphError>>,
    {
        let Some(token) = self.provider.resolve(explicit_token).await else {
            return self.auth_required(AuthReason::Missing).await;
        };
        match op(token).await {
            Ok(value) => ToolOutcome::Ok(value),
            Err(e) => self.graph_failure(e).await,
        }
    }

    /// Stage a mutation for browser confirmation and return the review link.
    pub async fn propose_update(
        &self,
        kind: ObjectKind,
        object_id: &str,
        changes: ChangeSet,
        explicit_token: Option<&str>,
    ) -> ToolOutcome {
        if object_id.is_empty() {
            return ToolOutcome::error(
                ErrorCode::BadRequest,
                format!("No {} ID provided", kind.label().to_lowercase()),
            );
        }
        if changes.is_empty() {
            return ToolOutcome::error(ErrorCode::BadRequest, "No update parameters provided");
        }
        let Some(token) = self.provider.resolve(explicit_token).await else {
            return self.auth_required(AuthReason::Missing).await;
        };

        let current = match self.graph.get(object_id, &token, &[("fields", kind.detail_fields())]).await
        {
            Ok(value) => value,
            Err(e) if e.is_auth_error() => return self.auth_required(AuthReason::Rejected).await,
            Err(e) => e.to_value(),
        };

        let port = match self.server.ensure_running().await {
            Ok(port) => port,
            Err(e) => {
                tracing::error!(err = %e, "callback server unavailable");
                return ToolOutcome::error(
                    ErrorCode::Internal,
                    format!("Failed to start callback server: {e:#}"),
                );
            }
        };
        let proposal = self.coordinator.propose(kind, object_id, changes.clone(), &token, port);
        let noun = kind.label().to_lowercase();

        ToolOutcome::Ok(json!({
            "message": format!("Please confirm the {noun} update"),
            "confirmation_url": proposal.url,
            "markdown_link": format!("[Click here to confirm {noun} update]({})", proposal.url),
            "confirmation_id": proposal.id,
            "current_details": current,
            "proposed_changes": changes,
            "instructions_for_llm": INSTRUCTIONS_FOR_LLM,
            "note": "No changes are made until the user approves them in the browser.",
        }))
    }

    async fn graph_failure(&self, err: GraphError) -> ToolOutcome {
        if err.is_app_id_error() {
            return ToolOutcome::Error(ErrorCode::Config.with_details(
                "Meta API rejected the app ID; check META_APP_ID",
                err.to_value(),
            ));
        }
        if err.is_auth_error() {
            // GraphClient has already invalidated the credential.
            return self.auth_required(AuthReason::Rejected).await;
        }
        let code = match err {
            GraphError::Api { .. } => ErrorCode::ApiError,
            GraphError::Transport(_) => ErrorCode::Transport,
        };
        ToolOutcome::Error(code.with_details(format!("Error calling Meta API: {err}"), err.to_value()))
    }

    /// Build the "authentication required" outcome, starting the callback
    /// server when the local flow needs it.
    pub async fn auth_required(&self, reason: AuthReason) -> ToolOutcome {
        if !self.provider.broker_mode() && self.provider.app_id().is_none() {
            return ToolOutcome::Error(ErrorCode::Config.with_details(
                "Meta App ID is not configured",
                json!({
                    "description": "Set META_APP_ID (or pass --app-id) to enable browser login, or provide META_ACCESS_TOKEN.",
                    "action_required": "Configure an app ID",
                }),
            ));
        }
        match self.provider.login_link(&self.server).await {
            Ok(link) => {
                tracing::info!(?reason, url = %link.url(), "authentication required");
                ToolOutcome::AuthRequired { reason, link }
            }
            Err(e) => {
                tracing::error!(err = %e, "failed to build login link");
                ToolOutcome::error(ErrorCode::Internal, format!("Failed to create login link: {e:#}"))
            }
        }
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
