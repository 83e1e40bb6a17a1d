//! JSON-RPC client for the streamable-HTTP tool endpoint.
//!
//! Connections are opened per listing / per call and dropped afterwards; the
//! endpoint may answer a POST with a plain JSON body or an SSE-framed one,
//! and both are accepted. Session affinity uses the `mcp-session-id` header.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{json, Map, Value};
use tracing::debug;

use confab_core::AuthContext;

use crate::{ToolError, ToolResult};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
const SESSION_HEADER: &str = "mcp-session-id";
const CLIENT_NAME: &str = "confab";

pub struct McpClient {
    http: reqwest::Client,
    endpoint: String,
    session_id: Option<String>,
    next_request_id: u64,
}

impl McpClient {
    /// Opens a connection: builds the HTTP client with the caller's identity
    /// headers attached, then performs the `initialize` handshake.
    pub async fn connect(
        endpoint: &str,
        timeout: Duration,
        auth: &AuthContext,
    ) -> ToolResult<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in auth.header_pairs() {
            if let (Ok(name), Ok(value)) =
                (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value))
            {
                headers.insert(name, value);
            }
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        let mut client = Self {
            http,
            endpoint: endpoint.to_string(),
            session_id: None,
            next_request_id: 1,
        };

        let init = client
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": CLIENT_NAME, "version": env!("CARGO_PKG_VERSION") },
                }),
            )
            .await?;
        debug!(
            event_name = "mcp.client.initialized",
            endpoint = %client.endpoint,
            server_version = %init
                .pointer("/serverInfo/version")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown"),
            "tool endpoint handshake complete"
        );

        client.notify("notifications/initialized", json!({})).await?;
        Ok(client)
    }

    /// Fetches the full tool catalog, following pagination cursors. Returns
    /// the raw descriptor objects; the adapter gives them shape.
    pub async fn list_tools(&mut self) -> ToolResult<Vec<Value>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let result = self.request("tools/list", params).await?;

            if let Some(page) = result.get("tools").and_then(Value::as_array) {
                tools.extend(page.iter().cloned());
            }

            match result.get("nextCursor").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => cursor = Some(next.to_string()),
                _ => break,
            }
        }

        Ok(tools)
    }

    /// Forwards one tool call by name and returns the endpoint's result
    /// value. Endpoint-reported execution failures surface as errors.
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> ToolResult<Value> {
        let result = self
            .request(
                "tools/call",
                json!({ "name": name, "arguments": Value::Object(arguments) }),
            )
            .await?;
        extract_call_result(name, result)
    }

    async fn request(&mut self, method: &str, params: Value) -> ToolResult<Value> {
        let id = self.next_request_id;
        self.next_request_id += 1;

        let payload = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        let body = self.post(&payload).await?;
        let envelope = parse_rpc_body(&body)?;
        unwrap_envelope(envelope)
    }

    async fn notify(&mut self, method: &str, params: Value) -> ToolResult<()> {
        let payload = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        self.post(&payload).await.map(drop)
    }

    async fn post(&mut self, payload: &Value) -> ToolResult<String> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .header("accept", "application/json, text/event-stream")
            .json(payload);
        if let Some(session) = &self.session_id {
            request = request.header(SESSION_HEADER, session.clone());
        }

        let response = request.send().await?;
        if let Some(session) =
            response.headers().get(SESSION_HEADER).and_then(|value| value.to_str().ok())
        {
            self.session_id = Some(session.to_string());
        }

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ToolError::Protocol(format!(
                "endpoint returned {status}: {}",
                truncate(&body, 200)
            )));
        }
        Ok(body)
    }
}

/// Decodes a response body that is either a JSON document or an SSE stream
/// whose `data:` lines carry JSON documents (the last one wins).
fn parse_rpc_body(body: &str) -> ToolResult<Value> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    let mut last_data: Option<Value> = None;
    for line in trimmed.lines() {
        if let Some(data) = line.strip_prefix("data:") {
            if let Ok(value) = serde_json::from_str::<Value>(data.trim()) {
                last_data = Some(value);
            }
        }
    }

    last_data.ok_or_else(|| {
        ToolError::Protocol(format!("unparseable response body: {}", truncate(body, 200)))
    })
}

/// Splits a JSON-RPC envelope into its result, mapping `error` members to
/// protocol errors.
fn unwrap_envelope(envelope: Value) -> ToolResult<Value> {
    if let Some(error) = envelope.get("error") {
        let message = error.get("message").and_then(Value::as_str).unwrap_or("unknown error");
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        return Err(ToolError::Protocol(format!("rpc error {code}: {message}")));
    }
    Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
}

/// Shapes a `tools/call` result: structured content is preferred (a sole
/// `result` member is unwrapped), text content is joined otherwise, and an
/// `isError` marker becomes an invocation failure.
fn extract_call_result(name: &str, result: Value) -> ToolResult<Value> {
    let text = joined_text_content(&result);

    if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
        let message = if text.is_empty() { "unspecified tool failure".to_string() } else { text };
        return Err(ToolError::Invocation { tool: name.to_string(), message });
    }

    if let Some(structured) = result.get("structuredContent") {
        if let Some(object) = structured.as_object() {
            if object.len() == 1 {
                if let Some(inner) = object.get("result") {
                    return Ok(inner.clone());
                }
            }
        }
        return Ok(structured.clone());
    }

    Ok(Value::String(text))
}

fn joined_text_content(result: &Value) -> String {
    result
        .get("content")
        .and_then(Value::as_array)
        .map(|content| {
            content
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let prefix: String = text.chars().take(max_chars).collect();
        format!("{prefix}…")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{extract_call_result, parse_rpc_body, unwrap_envelope};
    use crate::ToolError;

    #[test]
    fn plain_json_bodies_parse_directly() {
        let value = parse_rpc_body(r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#)
            .expect("plain json should parse");
        assert_eq!(value["id"], json!(1));
    }

    #[test]
    fn sse_bodies_yield_the_last_data_line() {
        let body = concat!(
            "event: message\n",
            "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"partial\":true}}\n",
            "\n",
            "event: message\n",
            "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"partial\":false}}\n",
        );
        let value = parse_rpc_body(body).expect("sse body should parse");
        assert_eq!(value["result"]["partial"], json!(false));
    }

    #[test]
    fn unparseable_bodies_are_protocol_errors() {
        let error = parse_rpc_body("<html>502 bad gateway</html>").expect_err("must fail");
        assert!(matches!(error, ToolError::Protocol(_)));
    }

    #[test]
    fn envelope_errors_surface_code_and_message() {
        let error = unwrap_envelope(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "error": { "code": -32602, "message": "unknown tool" }
        }))
        .expect_err("error member must fail");

        let rendered = error.to_string();
        assert!(rendered.contains("-32602"));
        assert!(rendered.contains("unknown tool"));
    }

    #[test]
    fn call_results_prefer_unwrapped_structured_content() {
        let value = extract_call_result(
            "get_queue",
            json!({
                "content": [{ "type": "text", "text": "Queue contents:\n  - widget (ID: w-1)" }],
                "structuredContent": { "result": "Queue contents:\n  - widget (ID: w-1)" }
            }),
        )
        .expect("call result should extract");

        assert_eq!(value, json!("Queue contents:\n  - widget (ID: w-1)"));
    }

    #[test]
    fn call_results_fall_back_to_joined_text() {
        let value = extract_call_result(
            "get_queue",
            json!({
                "content": [
                    { "type": "text", "text": "line one" },
                    { "type": "image", "data": "…" },
                    { "type": "text", "text": "line two" }
                ]
            }),
        )
        .expect("call result should extract");

        assert_eq!(value, json!("line one\nline two"));
    }

    #[test]
    fn endpoint_reported_failures_become_invocation_errors() {
        let error = extract_call_result(
            "add_to_queue",
            json!({
                "isError": true,
                "content": [{ "type": "text", "text": "entity_id is required" }]
            }),
        )
        .expect_err("isError must fail");

        assert!(matches!(
            error,
            ToolError::Invocation { ref tool, ref message }
                if tool == "add_to_queue" && message.contains("entity_id is required")
        ));
    }
}
