// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tool catalogue: thin request glue over the Graph API.
//!
//! Reads run through [`Gate::invoke`]; updates are staged with
//! [`Gate::propose_update`] and applied only after browser confirmation.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::confirm::{ChangeSet, ObjectKind};
use crate::credential::mask_token;
use crate::credential::provider::{AuthStatus, LoginLink};
use crate::error::ErrorCode;
use crate::gate::{Gate, ToolOutcome};
use crate::graph::{GraphClient, GraphError};

const ACCOUNT_LIST_FIELDS: &str = "id,name,account_id,account_status,amount_spent,balance,\
     currency,age,business_city,business_country_code";
const ACCOUNT_FIELDS: &str = "id,name,account_id,account_status,amount_spent,balance,currency,\
     age,funding_source_details,business_city,business_country_code,timezone_name,owner";
const CAMPAIGN_LIST_FIELDS: &str = "id,name,objective,status,daily_budget,lifetime_budget,\
     buying_type,start_time,stop_time,created_time,updated_time,bid_strategy";
const CAMPAIGN_FIELDS: &str = "id,name,objective,status,daily_budget,lifetime_budget,\
     buying_type,start_time,stop_time,created_time,updated_time,bid_strategy,\
     special_ad_categories,special_ad_category_country,budget_remaining,configured_status";
const ADSET_LIST_FIELDS: &str = "id,name,campaign_id,status,daily_budget,lifetime_budget,\
     targeting,bid_amount,bid_strategy,optimization_goal,billing_event,start_time,end_time,\
     created_time,updated_time";
const AD_LIST_FIELDS: &str = "id,name,adset_id,campaign_id,status,creative,created_time,\
     updated_time,bid_amount,conversion_domain,tracking_specs";
const INSIGHT_FIELDS: &str = "account_id,account_name,campaign_id,campaign_name,adset_id,\
     adset_name,ad_id,ad_name,impressions,clicks,spend,cpc,cpm,ctr,reach,frequency,actions,\
     conversions,unique_clicks,cost_per_action_type";

const TOKEN_PROPERTY: &str = "Graph API access token (optional; the cached token is used when omitted)";

/// Name, description and JSON schema of every tool, as listed to the host.
pub fn definitions() -> Vec<Value> {
    let token = json!({ "type": "string", "description": TOKEN_PROPERTY });
    let account = json!({ "type": "string", "description": "Ad account ID (act_XXXXXXXXX); defaults to the first account" });
    let limit = json!({ "type": "integer", "description": "Maximum number of results", "default": 10 });
    let tool = |name: &str, description: &str, properties: Value, required: &[&str]| {
        json!({
            "name": name,
            "description": description,
            "inputSchema": { "type": "object", "properties": properties, "required": required },
        })
    };

    vec![
        tool(
            "authenticate",
            "Get a login link for Meta Ads, or report the current token when already authenticated.",
            json!({
                "access_token": token,
                "force_refresh": { "type": "boolean", "description": "Start a new login even when a token is cached" },
            }),
            &[],
        ),
        tool(
            "get_ad_accounts",
            "List ad accounts accessible by a user.",
            json!({
                "access_token": token,
                "user_id": { "type": "string", "description": "User ID, or \"me\"", "default": "me" },
                "limit": limit,
            }),
            &[],
        ),
        tool(
            "get_account_info",
            "Get details of an ad account.",
            json!({ "access_token": token, "account_id": account }),
            &[],
        ),
        tool(
            "get_campaigns",
            "List campaigns of an ad account.",
            json!({
                "access_token": token,
                "account_id": account,
                "limit": limit,
                "status_filter": { "type": "string", "description": "Effective status filter (ACTIVE, PAUSED, ...)" },
            }),
            &[],
        ),
        tool(
            "get_campaign_details",
            "Get details of a campaign.",
            json!({ "access_token": token, "campaign_id": { "type": "string" } }),
            &["campaign_id"],
        ),
        tool(
            "get_adsets",
            "List ad sets of an ad account, optionally for one campaign.",
            json!({
                "access_token": token,
                "account_id": account,
                "limit": limit,
                "campaign_id": { "type": "string", "description": "Only ad sets of this campaign" },
            }),
            &[],
        ),
        tool(
            "get_adset_details",
            "Get details of an ad set, including frequency caps.",
            json!({ "access_token": token, "adset_id": { "type": "string" } }),
            &["adset_id"],
        ),
        tool(
            "get_ads",
            "List ads of an ad account, optionally filtered by campaign or ad set.",
            json!({
                "access_token": token,
                "account_id": account,
                "limit": limit,
                "campaign_id": { "type": "string" },
                "adset_id": { "type": "string" },
            }),
            &[],
        ),
        tool(
            "get_ad_details",
            "Get details of an ad.",
            json!({ "access_token": token, "ad_id": { "type": "string" } }),
            &["ad_id"],
        ),
        tool(
            "get_insights",
            "Get performance insights for a campaign, ad set, ad or account.",
            json!({
                "access_token": token,
                "object_id": { "type": "string" },
                "time_range": {
                    "description": "Preset (last_7d, this_month, maximum, ...) or {\"since\",\"until\"} dates",
                    "default": "maximum",
                },
                "breakdown": { "type": "string", "description": "Breakdown dimension (age, gender, country, ...)" },
                "level": { "type": "string", "enum": ["ad", "adset", "campaign", "account"], "default": "ad" },
            }),
            &["object_id"],
        ),
        tool(
            "update_adset",
            "Propose an ad set update. Returns a confirmation link; nothing changes until the user approves it.",
            json!({
                "access_token": token,
                "adset_id": { "type": "string" },
                "status": { "type": "string" },
                "bid_strategy": { "type": "string" },
                "bid_amount": { "type": "integer", "description": "In the account currency's minor unit" },
                "frequency_control_specs": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "event": { "type": "string" },
                            "interval_days": { "type": "integer" },
                            "max_frequency": { "type": "integer" },
                        },
                    },
                },
                "targeting": { "type": "object" },
            }),
            &["adset_id"],
        ),
        tool(
            "update_ad",
            "Propose an ad update. Returns a confirmation link; nothing changes until the user approves it.",
            json!({
                "access_token": token,
                "ad_id": { "type": "string" },
                "status": { "type": "string" },
                "bid_amount": { "type": "integer" },
            }),
            &["ad_id"],
        ),
    ]
}

/// Run tool `name` with JSON `args`.
pub async fn call(gate: &Gate, name: &str, args: Value) -> ToolOutcome {
    tracing::debug!(tool = name, "tool call");
    match name {
        "authenticate" => with_args(args, |a| authenticate(gate, a)).await,
        "get_ad_accounts" => with_args(args, |a| get_ad_accounts(gate, a)).await,
        "get_account_info" => with_args(args, |a| get_account_info(gate, a)).await,
        "get_campaigns" => with_args(args, |a| get_campaigns(gate, a)).await,
        "get_campaign_details" => {
            with_args(args, |a: ObjectArgs| object_details(gate, a, "campaign_id", CAMPAIGN_FIELDS)).await
        }
        "get_adsets" => with_args(args, |a| get_adsets(gate, a)).await,
        "get_adset_details" => with_args(args, |a: ObjectArgs| {
            object_details(gate, a, "adset_id", ObjectKind::AdSet.detail_fields())
        })
        .await,
        "get_ads" => with_args(args, |a| get_ads(gate, a)).await,
        "get_ad_details" => with_args(args, |a: ObjectArgs| {
            object_details(gate, a, "ad_id", ObjectKind::Ad.detail_fields())
        })
        .await,
        "get_insights" => with_args(args, |a| get_insights(gate, a)).await,
        "update_adset" => with_args(args, |a| update_adset(gate, a)).await,
        "update_ad" => with_args(args, |a| update_ad(gate, a)).await,
        other => ToolOutcome::error(ErrorCode::NotFound, format!("unknown tool: {other}")),
    }
}

async fn with_args<T, F, Fut>(args: Value, run: F) -> ToolOutcome
where
    T: DeserializeOwned,
    F: FnOnce(T) -> Fut,
    Fut: std::future::Future<Output = ToolOutcome>,
{
    let args = if args.is_null() { json!({}) } else { args };
    match serde_json::from_value::<T>(args) {
        Ok(parsed) => run(parsed).await,
        Err(e) => ToolOutcome::error(ErrorCode::BadRequest, format!("invalid arguments: {e}")),
    }
}

fn default_limit() -> u32 {
    10
}

fn default_user() -> String {
    "me".to_owned()
}

#[derive(Debug, Deserialize)]
struct AuthArgs {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    force_refresh: bool,
}

async fn authenticate(gate: &Gate, args: AuthArgs) -> ToolOutcome {
    let provider = gate.provider();
    if !args.force_refresh {
        if let Some(token) = args.access_token.as_deref().filter(|t| !t.is_empty()) {
            return ToolOutcome::Ok(json!({
                "message": "Using the supplied access token",
                "token_preview": mask_token(token),
            }));
        }
    }

    match provider.authenticate(gate.server(), args.force_refresh).await {
        Ok(AuthStatus::Ready(token)) => {
            let cred = provider.credential().filter(|c| c.access_token == token);
            let source = if provider.has_env_override() {
                "environment"
            } else if provider.broker_mode() {
                "broker"
            } else {
                "cache"
            };
            ToolOutcome::Ok(json!({
                "message": "Already authenticated",
                "token_status": "Valid token",
                "token_preview": mask_token(&token),
                "source": source,
                "created_at": cred.as_ref().map(|c| c.created_at),
                "expires_in": cred.as_ref().and_then(|c| c.expires_in),
                "expires_at": cred.as_ref().and_then(|c| c.expires_at.clone()),
            }))
        }
        Ok(AuthStatus::Pending(link)) => {
            let url = link.url();
            let server_status = match link {
                LoginLink::Local { port, .. } => format!("Callback server running on port {port}"),
                LoginLink::Broker { .. } => "Login is handled by the token broker".to_owned(),
            };
            ToolOutcome::Ok(json!({
                "login_url": url,
                "token_status": "No token",
                "server_status": server_status,
                "markdown_link": format!("[Click here to authenticate with Meta Ads]({url})"),
                "message": "IMPORTANT: Please use the Markdown link format in your response to allow the user to click it.",
                "note": "After authenticating, the token will be automatically saved.",
            }))
        }
        Err(e) if !provider.broker_mode() && provider.app_id().is_none() => {
            ToolOutcome::Error(ErrorCode::Config.with_details(
                "Meta App ID is not configured",
                json!({ "description": e.to_string(), "action_required": "Set META_APP_ID" }),
            ))
        }
        Err(e) => ToolOutcome::error(ErrorCode::Internal, format!("Failed to start login: {e:#}")),
    }
}

#[derive(Debug, Deserialize)]
struct AccountsArgs {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default = "default_user")]
    user_id: String,
    #[serde(default = "default_limit")]
    limit: u32,
}

async fn get_ad_accounts(gate: &Gate, args: AccountsArgs) -> ToolOutcome {
    let graph = Arc::clone(gate.graph());
    gate.invoke(args.access_token.as_deref(), |token| async move {
        let limit = args.limit.to_string();
        graph
            .get(
                &format!("{}/adaccounts", args.user_id),
                &token,
                &[("fields", ACCOUNT_LIST_FIELDS), ("limit", &limit)],
            )
            .await
    })
    .await
}

/// Normalise an account id to the `act_` form the Graph API expects.
fn account_ref(id: &str) -> String {
    if id.starts_with("act_") {
        id.to_owned()
    } else {
        format!("act_{id}")
    }
}

/// The caller's account, or the first account of the token's user.
async fn resolve_account(
    graph: &GraphClient,
    token: &str,
    account_id: Option<&str>,
) -> Result<Option<String>, GraphError> {
    if let Some(id) = account_id.filter(|id| !id.is_empty()) {
        return Ok(Some(account_ref(id)));
    }
    let accounts = graph.get("me/adaccounts", token, &[("fields", "id"), ("limit", "1")]).await?;
    Ok(accounts
        .get("data")
        .and_then(Value::as_array)
        .and_then(|data| data.first())
        .and_then(|first| first.get("id"))
        .and_then(Value::as_str)
        .map(account_ref))
}

fn no_account() -> Value {
    json!({ "error": "No account ID specified and no accounts found for user" })
}

#[derive(Debug, Deserialize)]
struct AccountArgs {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    account_id: Option<String>,
}

async fn get_account_info(gate: &Gate, args: AccountArgs) -> ToolOutcome {
    let graph = Arc::clone(gate.graph());
    gate.invoke(args.access_token.as_deref(), |token| async move {
        let Some(account) = resolve_account(&graph, &token, args.account_id.as_deref()).await?
        else {
            return Ok(no_account());
        };
        graph.get(&account, &token, &[("fields", ACCOUNT_FIELDS)]).await
    })
    .await
}

#[derive(Debug, Deserialize)]
struct CampaignsArgs {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    account_id: Option<String>,
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    status_filter: Option<String>,
}

async fn get_campaigns(gate: &Gate, args: CampaignsArgs) -> ToolOutcome {
    let graph = Arc::clone(gate.graph());
    gate.invoke(args.access_token.as_deref(), |token| async move {
        let Some(account) = resolve_account(&graph, &token, args.account_id.as_deref()).await?
        else {
            return Ok(no_account());
        };
        let limit = args.limit.to_string();
        let mut params = vec![("fields", CAMPAIGN_LIST_FIELDS), ("limit", limit.as_str())];
        let status = args
            .status_filter
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| json!([s]).to_string());
        if let Some(ref status) = status {
            params.push(("effective_status", status.as_str()));
        }
        graph.get(&format!("{account}/campaigns"), &token, &params).await
    })
    .await
}

#[derive(Debug, Deserialize)]
struct AdSetsArgs {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    account_id: Option<String>,
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    campaign_id: Option<String>,
}

async fn get_adsets(gate: &Gate, args: AdSetsArgs) -> ToolOutcome {
    let graph = Arc::clone(gate.graph());
    gate.invoke(args.access_token.as_deref(), |token| async move {
        let limit = args.limit.to_string();
        let params = [("fields", ADSET_LIST_FIELDS), ("limit", limit.as_str())];
        // A campaign's ad sets live under the campaign edge.
        if let Some(campaign) = args.campaign_id.as_deref().filter(|c| !c.is_empty()) {
            return graph.get(&format!("{campaign}/adsets"), &token, &params).await;
        }
        let Some(account) = resolve_account(&graph, &token, args.account_id.as_deref()).await?
        else {
            return Ok(no_account());
        };
        graph.get(&format!("{account}/adsets"), &token, &params).await
    })
    .await
}

#[derive(Debug, Deserialize)]
struct AdsArgs {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    account_id: Option<String>,
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    campaign_id: Option<String>,
    #[serde(default)]
    adset_id: Option<String>,
}

async fn get_ads(gate: &Gate, args: AdsArgs) -> ToolOutcome {
    let graph = Arc::clone(gate.graph());
    gate.invoke(args.access_token.as_deref(), |token| async move {
        let limit = args.limit.to_string();
        let params = [("fields", AD_LIST_FIELDS), ("limit", limit.as_str())];
        let parent = match (args.adset_id.as_deref(), args.campaign_id.as_deref()) {
            (Some(adset), _) if !adset.is_empty() => adset.to_owned(),
            (_, Some(campaign)) if !campaign.is_empty() => campaign.to_owned(),
            _ => match resolve_account(&graph, &token, args.account_id.as_deref()).await? {
                Some(account) => account,
                None => return Ok(no_account()),
            },
        };
        graph.get(&format!("{parent}/ads"), &token, &params).await
    })
    .await
}

/// Arguments of the single-object detail tools.
#[derive(Debug, Deserialize)]
struct ObjectArgs {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    campaign_id: Option<String>,
    #[serde(default)]
    adset_id: Option<String>,
    #[serde(default)]
    ad_id: Option<String>,
}

impl ObjectArgs {
    fn id(&self, param: &str) -> Option<&str> {
        let id = match param {
            "campaign_id" => self.campaign_id.as_deref(),
            "adset_id" => self.adset_id.as_deref(),
            "ad_id" => self.ad_id.as_deref(),
            _ => None,
        };
        id.filter(|id| !id.is_empty())
    }
}

async fn object_details(
    gate: &Gate,
    args: ObjectArgs,
    id_param: &str,
    fields: &'static str,
) -> ToolOutcome {
    let Some(object_id) = args.id(id_param).map(str::to_owned) else {
        let noun = id_param.trim_end_matches("_id").replace("adset", "ad set");
        return ToolOutcome::error(ErrorCode::BadRequest, format!("No {noun} ID provided"));
    };
    let graph = Arc::clone(gate.graph());
    gate.invoke(args.access_token.as_deref(), |token| async move {
        graph.get(&object_id, &token, &[("fields", fields)]).await
    })
    .await
}

#[derive(Debug, Deserialize)]
struct InsightsArgs {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    object_id: Option<String>,
    #[serde(default)]
    time_range: Option<Value>,
    #[serde(default)]
    breakdown: Option<String>,
    #[serde(default)]
    level: Option<String>,
}

async fn get_insights(gate: &Gate, args: InsightsArgs) -> ToolOutcome {
    let Some(object_id) = args.object_id.clone().filter(|id| !id.is_empty()) else {
        return ToolOutcome::error(ErrorCode::BadRequest, "No object ID provided");
    };
    let range = match args.time_range {
        None => ("date_preset", "maximum".to_owned()),
        Some(Value::String(ref preset)) => ("date_preset", preset.clone()),
        Some(Value::Object(ref map)) if map.contains_key("since") && map.contains_key("until") => {
            ("time_range", Value::Object(map.clone()).to_string())
        }
        Some(_) => {
            return ToolOutcome::error(
                ErrorCode::BadRequest,
                "Custom time_range must contain both 'since' and 'until' keys in YYYY-MM-DD format",
            );
        }
    };
    let level = args.level.clone().unwrap_or_else(|| "ad".to_owned());
    let breakdown = args.breakdown.clone().filter(|b| !b.is_empty());

    let graph = Arc::clone(gate.graph());
    gate.invoke(args.access_token.as_deref(), |token| async move {
        let mut params = vec![("fields", INSIGHT_FIELDS), ("level", level.as_str()), (range.0, range.1.as_str())];
        if let Some(ref breakdown) = breakdown {
            params.push(("breakdowns", breakdown.as_str()));
        }
        graph.get(&format!("{object_id}/insights"), &token, &params).await
    })
    .await
}

#[derive(Debug, Deserialize)]
struct UpdateAdSetArgs {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    adset_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    bid_strategy: Option<String>,
    #[serde(default)]
    bid_amount: Option<i64>,
    #[serde(default)]
    frequency_control_specs: Option<Vec<Value>>,
    #[serde(default)]
    targeting: Option<Value>,
}

async fn update_adset(gate: &Gate, args: UpdateAdSetArgs) -> ToolOutcome {
    let mut changes = ChangeSet::new();
    if let Some(strategy) = args.bid_strategy.filter(|s| !s.is_empty()) {
        changes.insert("bid_strategy".to_owned(), json!(strategy));
    }
    if let Some(amount) = args.bid_amount {
        changes.insert("bid_amount".to_owned(), json!(amount));
    }
    if let Some(specs) = args.frequency_control_specs.filter(|s| !s.is_empty()) {
        changes.insert("frequency_control_specs".to_owned(), Value::Array(specs));
    }
    if let Some(targeting) = args.targeting.filter(|t| !t.is_null()) {
        changes.insert("targeting".to_owned(), targeting);
    }
    if let Some(status) = args.status.filter(|s| !s.is_empty()) {
        changes.insert("status".to_owned(), json!(status));
    }
    gate.propose_update(ObjectKind::AdSet, &args.adset_id, changes, args.access_token.as_deref())
        .await
}

#[derive(Debug, Deserialize)]
struct UpdateAdArgs {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    ad_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    bid_amount: Option<i64>,
}

async fn update_ad(gate: &Gate, args: UpdateAdArgs) -> ToolOutcome {
    let mut changes = ChangeSet::new();
    if let Some(status) = args.status.filter(|s| !s.is_empty()) {
        changes.insert("status".to_owned(), json!(status));
    }
    if let Some(amount) = args.bid_amount {
        changes.insert("bid_amount".to_owned(), json!(amount));
    }
    gate.propose_update(ObjectKind::Ad, &args.ad_id, changes, args.access_token.as_deref()).await
}

#[cfg(test)]
#[path = "tools_tests.rs"]
mod tests;
