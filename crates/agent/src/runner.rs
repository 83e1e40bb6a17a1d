use async_trait::async_trait;
use thiserror::Error;

use confab_core::{AuthContext, Turn};
use confab_mcp::ToolError;

/// Static configuration of the reasoning agent.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub name: String,
    pub instructions: String,
    pub model: String,
}

impl AgentConfig {
    pub fn with_model(model: impl Into<String>) -> Self {
        Self { model: model.into(), ..Self::default() }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "Conversation Agent".to_string(),
            instructions: "You are a helpful assistant for a conversation. \
                           Respond to user messages."
                .to_string(),
            model: "gpt-oss:20b".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("model request failed: {0}")]
    Model(String),
    /// A tool invocation failed after the host's retry budget was exhausted.
    #[error("tool dispatch failed: {0}")]
    Tool(#[from] ToolError),
    #[error("model produced no final output")]
    NoOutput,
    #[error("tool loop exceeded {0} iterations without a final response")]
    IterationBudget(usize),
}

/// What a run produces: the assistant's final text and the flattened turn
/// list (input turns plus everything the run appended, scaffolding included;
/// the orchestrator applies retention afterwards).
#[derive(Clone, Debug)]
pub struct RunnerOutput {
    pub final_output: String,
    pub history: Vec<Turn>,
}

/// The boundary to the reasoning loop. The orchestrator invokes it with the
/// retained history plus transient prompt turns and consumes the result; it
/// never depends on what happens inside.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(
        &self,
        config: &AgentConfig,
        history: Vec<Turn>,
        auth: &AuthContext,
    ) -> Result<RunnerOutput, RunnerError>;
}
