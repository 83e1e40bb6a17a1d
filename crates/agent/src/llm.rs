//! Default agent runner: OpenAI-compatible chat completions with a bounded
//! tool-call loop.
//!
//! The model sees every adapter activity as a function tool whose
//! description is the synthesized activity documentation. Requested calls
//! are dispatched through the `ToolInvoker` seam under the host retry
//! policy; their results are fed back until the model answers in plain text
//! or the iteration budget runs out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use confab_core::config::LlmConfig;
use confab_core::{run_with_retry, AuthContext, RetryPolicy, Role, Turn, TurnContent};
use confab_mcp::{ActivityArgs, ActivitySpec, ToolInvoker};

use crate::runner::{AgentConfig, AgentRunner, RunnerError, RunnerOutput};

const MAX_TOOL_ITERATIONS: usize = 8;

pub struct OpenAiRunner {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    tools: Arc<dyn ToolInvoker>,
    retry: RetryPolicy,
}

impl OpenAiRunner {
    pub fn new(
        config: &LlmConfig,
        tools: Arc<dyn ToolInvoker>,
        retry: RetryPolicy,
    ) -> Result<Self, RunnerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| RunnerError::Model(error.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            tools,
            retry,
        })
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[WireMessage],
        tools: &[WireTool],
    ) -> Result<WireMessage, RunnerError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request_body = ChatRequest {
            model,
            messages,
            tools: if tools.is_empty() { None } else { Some(tools) },
        };
        let mut request = self.http.post(&url).json(&request_body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response =
            request.send().await.map_err(|error| RunnerError::Model(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(200).collect();
            return Err(RunnerError::Model(format!("model endpoint returned {status}: {preview}")));
        }

        let completion: ChatResponse =
            response.json().await.map_err(|error| RunnerError::Model(error.to_string()))?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or(RunnerError::NoOutput)
    }

    async fn dispatch(
        &self,
        call: &WireToolCall,
        auth: &AuthContext,
    ) -> Result<Value, RunnerError> {
        let name = call.function.name.as_str();
        let arguments: Map<String, Value> = if call.function.arguments.trim().is_empty() {
            Map::new()
        } else {
            serde_json::from_str(&call.function.arguments).map_err(|error| {
                RunnerError::Model(format!(
                    "model produced invalid arguments for tool `{name}`: {error}"
                ))
            })?
        };

        let value = run_with_retry(&self.retry, |attempt| {
            let arguments = arguments.clone();
            async move {
                if attempt > 1 {
                    debug!(
                        event_name = "tool.retry",
                        tool = %name,
                        attempt,
                        "retrying tool invocation"
                    );
                }
                self.tools.invoke(name, ActivityArgs::Named(arguments), auth).await
            }
        })
        .await?;

        Ok(value)
    }
}

#[async_trait]
impl AgentRunner for OpenAiRunner {
    async fn run(
        &self,
        config: &AgentConfig,
        history: Vec<Turn>,
        auth: &AuthContext,
    ) -> Result<RunnerOutput, RunnerError> {
        let specs = self.tools.tool_specs()?;
        let tool_defs = tool_definitions(&specs);

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(WireMessage::text("system", config.instructions.clone()));
        messages.extend(history.iter().map(wire_message));

        let mut flattened = history;

        for _iteration in 1..=MAX_TOOL_ITERATIONS {
            let reply = self.chat(&config.model, &messages, &tool_defs).await?;
            let tool_calls = reply.tool_calls.clone().unwrap_or_default();

            if tool_calls.is_empty() {
                let content = reply.content.unwrap_or_default();
                if content.trim().is_empty() {
                    return Err(RunnerError::NoOutput);
                }
                flattened.push(Turn::assistant(content.clone()));
                return Ok(RunnerOutput { final_output: content, history: flattened });
            }

            messages.push(reply.clone());
            for call in &tool_calls {
                let value = self.dispatch(call, auth).await?;
                let rendered = render_tool_result(&value);
                // Tool traffic is scaffolding: recorded as developer turns so
                // retention strips it from the conversation record.
                flattened.push(Turn::developer(format!(
                    "[tool {}] {rendered}",
                    call.function.name
                )));
                messages.push(WireMessage::tool_result(call.id.clone(), rendered));
            }
        }

        Err(RunnerError::IterationBudget(MAX_TOOL_ITERATIONS))
    }
}

/// Declares the adapter's activities as function tools, documentation
/// included, so the model sees the same synthesized docs a human would.
fn tool_definitions(specs: &[ActivitySpec]) -> Vec<WireTool> {
    specs
        .iter()
        .map(|spec| WireTool {
            kind: "function",
            function: WireFunctionDef {
                name: spec.name.clone(),
                description: spec.doc.clone(),
                parameters: spec.input_schema.clone(),
            },
        })
        .collect()
}

fn wire_message(turn: &Turn) -> WireMessage {
    // Developer scaffolding rides on the system role; the internal role
    // distinction exists only for retention.
    let role = match turn.role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Developer => "system",
    };
    let content = match &turn.content {
        TurnContent::Text(text) => text.clone(),
        TurnContent::Segments(segments) => segments
            .iter()
            .map(|segment| segment.text.as_str())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
    };
    WireMessage::text(role, content)
}

fn render_tool_result(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [WireTool]>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn text(role: &str, content: String) -> Self {
        Self { role: role.to_string(), content: Some(content), tool_calls: None, tool_call_id: None }
    }

    fn tool_result(tool_call_id: String, content: String) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: Some(tool_call_id),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "default_call_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn default_call_kind() -> String {
    "function".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded argument object, as the wire format specifies.
    arguments: String,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef,
}

#[derive(Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: WireMessage,
}
