//! Newline-delimited JSON-RPC 2.0 for the MCP stdio transport.

use crate::error::ToolError;
use crate::tools::{ToolReply, Tools, schema};
use p4mcp_core::policy::audit::{AuditEvent, AuditResult};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::time::Instant;

pub const PROTOCOL_VERSION: &str = "2025-06-18";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Deserialize)]
pub struct JsonRpcReq {
    pub id: Option<JsonValue>,
    pub method: Option<String>,
    pub params: Option<JsonValue>,
}

pub fn jsonrpc_ok(id: Option<JsonValue>, result: JsonValue) -> JsonValue {
    json!({
        "jsonrpc": "2.0",
        "id": id.unwrap_or(JsonValue::Null),
        "result": result
    })
}

pub fn jsonrpc_err(id: Option<JsonValue>, code: i64, message: &str) -> JsonValue {
    json!({
        "jsonrpc": "2.0",
        "id": id.unwrap_or(JsonValue::Null),
        "error": { "code": code, "message": message }
    })
}

/// MCP tool result: pretty JSON for humans, the same value structured.
pub fn tool_result(reply: &ToolReply) -> JsonValue {
    let text = serde_json::to_string_pretty(&reply.payload).unwrap_or_else(|_| reply.payload.to_string());
    json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": reply.payload,
        "isError": reply.is_error
    })
}

fn initialize_result() -> JsonValue {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": { "name": "p4-mcp", "version": env!("CARGO_PKG_VERSION") },
        "instructions": "Perforce tools. Write and delete tools are refused unless the server runs with P4_READONLY_MODE=false / P4_DISABLE_DELETE=false."
    })
}

/// Parse one input line. `Err` carries the response for unparseable input.
pub fn parse_line(line: &str) -> Result<JsonRpcReq, JsonValue> {
    serde_json::from_str::<JsonRpcReq>(line).map_err(|_| jsonrpc_err(None, PARSE_ERROR, "parse error"))
}

/// Whether the request should run off the read loop.
pub fn is_tool_call(req: &JsonRpcReq) -> bool {
    req.method.as_deref() == Some("tools/call")
}

/// Answer one request. Notifications (no id) get no response.
pub async fn handle(tools: &Tools, req: JsonRpcReq) -> Option<JsonValue> {
    let Some(method) = req.method.as_deref() else {
        return req
            .id
            .map(|id| jsonrpc_err(Some(id), INVALID_REQUEST, "missing method"));
    };
    let id = req.id.clone();
    if method.starts_with("notifications/") {
        return None;
    }

    let resp = match method {
        "initialize" => jsonrpc_ok(id, initialize_result()),
        "ping" => jsonrpc_ok(id, json!({})),
        "tools/list" => jsonrpc_ok(id, schema::tool_list_result()),
        "tools/call" => {
            let params = req.params.unwrap_or(JsonValue::Null);
            let Some(name) = params.get("name").and_then(|v| v.as_str()) else {
                return Some(jsonrpc_err(id, INVALID_PARAMS, "missing tool name"));
            };
            if !schema::TOOL_NAMES.contains(&name) {
                return Some(jsonrpc_err(id, METHOD_NOT_FOUND, "unknown tool"));
            }
            let args = params.get("arguments").cloned().unwrap_or(JsonValue::Null);
            let reply = call_tool(tools, name, args).await;
            jsonrpc_ok(id, tool_result(&reply))
        }
        _ => jsonrpc_err(id, METHOD_NOT_FOUND, "method not found"),
    };
    Some(resp)
}

/// Rate limit, dispatch and audit one tool call.
pub async fn call_tool(tools: &Tools, name: &str, args: JsonValue) -> ToolReply {
    let policy = tools.policy();
    let started = Instant::now();

    let decision = policy.check_rate_limit(name);
    if !decision.allowed {
        let err = ToolError::RateLimited {
            tool: name.to_string(),
            blocked_until: decision.blocked_until.unwrap_or(decision.reset_at),
        };
        let reply = ToolReply::from_error(&err);
        policy.record(AuditEvent {
            tool: name.to_string(),
            user: None,
            args,
            result: AuditResult::Blocked,
            error_code: Some(err.code().as_str().to_string()),
            duration_ms: started.elapsed().as_millis() as u64,
        });
        return reply;
    }

    let reply = tools.call(name, args.clone()).await;
    policy.record(AuditEvent {
        tool: name.to_string(),
        user: reply.user.clone(),
        args,
        result: if reply.is_error {
            AuditResult::Error
        } else {
            AuditResult::Success
        },
        error_code: reply.error_code.map(|c| c.as_str().to_string()),
        duration_ms: started.elapsed().as_millis() as u64,
    });
    reply
}
