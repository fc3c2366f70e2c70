// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential handling: the cached bearer token, its expiry rules, and the
//! provider that decides which token a tool call should use.
//!
//! A [`Credential`] is created when the browser flow hands a token to the
//! callback server, when a short-lived token is exchanged for a long-lived
//! one, or when the token broker returns one. It is persisted to a per-user
//! cache file and destroyed on invalidation.

pub mod broker;
pub mod exchange;
pub mod oauth;
pub mod persist;
pub mod provider;

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A bearer token plus the metadata needed to decide whether it is still usable.
///
/// Expiry comes in two shapes: `expires_in` (seconds valid from `created_at`,
/// local OAuth flow) or `expires_at` (absolute ISO-8601 timestamp, broker
/// flow). With neither, the token never expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "CredentialRecord")]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Issuance time as epoch seconds.
    pub created_at: u64,
    /// `expires_in` as found on disk when it was not a second count.
    #[serde(skip)]
    pub malformed_expires_in: Option<String>,
}

/// On-disk shape of a [`Credential`], tolerant of how other writers encoded
/// `expires_in` (numeric strings, integral floats).
#[derive(Deserialize)]
struct CredentialRecord {
    access_token: String,
    #[serde(default)]
    expires_in: Option<Value>,
    #[serde(default)]
    expires_at: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default = "epoch_secs")]
    created_at: u64,
}

impl From<CredentialRecord> for Credential {
    fn from(record: CredentialRecord) -> Self {
        let (expires_in, malformed_expires_in) =
            match record.expires_in.as_ref().map(lenient_secs).unwrap_or(Ok(None)) {
                Ok(secs) => (secs, None),
                Err(raw) => (None, Some(raw)),
            };
        Self {
            access_token: record.access_token,
            expires_in,
            expires_at: record.expires_at,
            user_id: record.user_id,
            token_type: record.token_type,
            created_at: record.created_at,
            malformed_expires_in,
        }
    }
}

/// Read a second count from a JSON number or numeric string.
///
/// `null` and the empty string mean "no lifetime". Negative, fractional or
/// non-numeric values come back as `Err` with the raw text.
fn lenient_secs(value: &Value) -> Result<Option<u64>, String> {
    fn from_f64(f: f64) -> Option<u64> {
        (f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64).then_some(f as u64)
    }
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().and_then(from_f64))
            .map(Some)
            .ok_or_else(|| n.to_string()),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => {
            let t = s.trim();
            t.parse::<u64>()
                .ok()
                .or_else(|| t.parse::<f64>().ok().and_then(from_f64))
                .map(Some)
                .ok_or_else(|| s.clone())
        }
        other => Err(other.to_string()),
    }
}

/// Resolved expiry of a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Never,
    /// Epoch seconds after which the token is expired.
    At(u64),
    /// `expires_at` or `expires_in` is present but could not be parsed.
    Unparsable,
}

impl Credential {
    /// Credential from the local OAuth flow (relative expiry).
    pub fn issued(access_token: impl Into<String>, expires_in: Option<u64>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_in,
            expires_at: None,
            user_id: None,
            token_type: None,
            created_at: epoch_secs(),
            malformed_expires_in: None,
        }
    }

    /// Credential handed out by the token broker (absolute expiry).
    pub fn brokered(
        access_token: impl Into<String>,
        expires_at: Option<String>,
        token_type: Option<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            expires_in: None,
            expires_at,
            user_id: None,
            token_type,
            created_at: epoch_secs(),
            malformed_expires_in: None,
        }
    }

    pub fn expiry(&self) -> Expiry {
        if let Some(ref raw) = self.expires_at {
            return match parse_timestamp(raw) {
                Some(at) => Expiry::At(at),
                None => Expiry::Unparsable,
            };
        }
        if self.malformed_expires_in.is_some() {
            return Expiry::Unparsable;
        }
        match self.expires_in {
            // Zero means the provider did not report a lifetime.
            None | Some(0) => Expiry::Never,
            Some(secs) => Expiry::At(self.created_at.saturating_add(secs)),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(epoch_secs())
    }

    /// Whether the credential is expired at `now` (epoch seconds).
    ///
    /// An unparsable `expires_at` or `expires_in` counts as not expired; the
    /// parse failure is logged so a bad cache entry is visible without
    /// forcing re-auth loops.
    pub fn is_expired_at(&self, now: u64) -> bool {
        match self.expiry() {
            Expiry::Never => false,
            Expiry::At(at) => now > at,
            Expiry::Unparsable => {
                tracing::warn!(
                    expires_at = ?self.expires_at,
                    expires_in = ?self.malformed_expires_in,
                    "unparsable token expiry, treating token as valid"
                );
                false
            }
        }
    }

    /// Seconds until expiry, if the credential has a known expiry in the future.
    pub fn remaining_secs(&self) -> Option<u64> {
        match self.expiry() {
            Expiry::At(at) => at.checked_sub(epoch_secs()),
            Expiry::Never | Expiry::Unparsable => None,
        }
    }
}

/// Parse an ISO-8601 timestamp into epoch seconds.
///
/// Accepts RFC 3339 (`2030-01-01T00:00:00Z`, `...+00:00`, fractional seconds)
/// and offset-less forms, which are taken as UTC.
fn parse_timestamp(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return u64::try_from(dt.timestamp()).ok();
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()?;
    u64::try_from(naive.and_utc().timestamp()).ok()
}

/// Which authentication mode a cache file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Local,
    Broker,
}

impl CacheKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Local => "token_cache.json",
            Self::Broker => "broker_token_cache.json",
        }
    }
}

/// Path of the token cache file for `kind` inside `dir`.
pub fn cache_path(dir: &Path, kind: CacheKind) -> PathBuf {
    dir.join(kind.file_name())
}

/// Shorten a token for logs and previews.
pub fn mask_token(token: &str) -> String {
    match token.char_indices().nth(10) {
        Some((idx, _)) => format!("{}...", &token[..idx]),
        None => "***".to_owned(),
    }
}

pub fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;
