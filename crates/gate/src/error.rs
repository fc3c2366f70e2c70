// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes surfaced to tool callers and browser pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    AuthRequired,
    BadRequest,
    Config,
    NotFound,
    ApiError,
    Transport,
    Decode,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::AuthRequired => 401,
            Self::BadRequest | Self::Decode => 400,
            Self::NotFound => 404,
            Self::ApiError | Self::Transport => 502,
            Self::Config | Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::BadRequest => "BAD_REQUEST",
            Self::Config => "CONFIG",
            Self::NotFound => "NOT_FOUND",
            Self::ApiError => "API_ERROR",
            Self::Transport => "TRANSPORT",
            Self::Decode => "DECODE",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into(), details: None }
    }

    pub fn with_details(
        &self,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> ErrorResponse {
        let mut body = self.to_error_body(message);
        body.details = Some(details);
        ErrorResponse { error: body }
    }

    pub fn to_response(&self, message: impl Into<String>) -> ErrorResponse {
        ErrorResponse { error: self.to_error_body(message) }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_response(message)))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

impl ErrorResponse {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({ "error": { "code": "INTERNAL", "message": "unserializable error" } })
        })
    }
}

/// Error body with machine-readable code, human-readable message and
/// optional structured details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
