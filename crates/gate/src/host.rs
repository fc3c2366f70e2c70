// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stdio tool host: newline-delimited JSON-RPC 2.0.
//!
//! Supports `initialize`, `tools/list` and `tools/call`. Notifications (no
//! `id`) are accepted and never answered. Logs go to stderr; stdout carries
//! only protocol frames.

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::gate::Gate;
use crate::tools;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

/// Serve requests from `reader` until EOF, writing responses to `writer`.
pub async fn serve<R, W>(gate: &Gate, reader: R, mut writer: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Value>(line) {
            Ok(msg) => handle(gate, msg).await,
            Err(e) => {
                tracing::warn!(err = %e, "unparsable request");
                Some(error_response(Value::Null, PARSE_ERROR, format!("parse error: {e}")))
            }
        };
        if let Some(response) = response {
            let mut frame = serde_json::to_vec(&response)?;
            frame.push(b'\n');
            writer.write_all(&frame).await?;
            writer.flush().await?;
        }
    }
    tracing::info!("stdin closed, stopping tool host");
    Ok(())
}

/// Handle one JSON-RPC message. Returns `None` for notifications.
pub async fn handle(gate: &Gate, msg: Value) -> Option<Value> {
    let id = msg.get("id").cloned().filter(|id| !id.is_null());
    let Some(method) = msg.get("method").and_then(Value::as_str) else {
        return Some(error_response(id.unwrap_or(Value::Null), INVALID_REQUEST, "missing method"));
    };
    let Some(id) = id else {
        tracing::debug!(method, "notification");
        return None;
    };
    let params = msg.get("params").cloned().unwrap_or_else(|| json!({}));

    let result = match method {
        "initialize" => json!({
            "protocolVersion": params
                .get("protocolVersion")
                .and_then(Value::as_str)
                .unwrap_or(PROTOCOL_VERSION),
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": { "name": "adsgate", "version": env!("CARGO_PKG_VERSION") },
        }),
        "ping" => json!({}),
        "tools/list" => json!({ "tools": tools::definitions() }),
        "tools/call" => {
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return Some(error_response(id, INVALID_PARAMS, "missing tool name"));
            };
            let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
            let outcome = tools::call(gate, name, arguments).await;
            let text = serde_json::to_string_pretty(&outcome.to_value())
                .unwrap_or_else(|_| "{}".to_owned());
            json!({
                "content": [{ "type": "text", "text": text }],
                "isError": !outcome.is_ok(),
            })
        }
        other => {
            return Some(error_response(id, METHOD_NOT_FOUND, format!("method not found: {other}")));
        }
    };
    Some(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

fn error_response(id: Value, code: i64, message: impl Into<String>) -> Value {
    let message: String = message.into();
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

/// Serve on the process's stdin and stdout.
pub async fn serve_stdio(gate: &Gate) -> anyhow::Result<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    serve(gate, stdin, tokio::io::stdout()).await
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
