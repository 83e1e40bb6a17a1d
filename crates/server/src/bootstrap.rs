use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use confab_agent::{AgentConfig, ConversationRegistry, OpenAiRunner, RunnerError};
use confab_core::config::AppConfig;
use confab_mcp::{ToolAdapter, ToolError, ToolInvoker};

use crate::routes::AppState;

pub struct Application {
    pub config: AppConfig,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("tool catalog initialization failed: {0}")]
    ToolCatalog(#[source] ToolError),
    #[error("agent runner initialization failed: {0}")]
    Runner(#[source] RunnerError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    // The catalog is fetched exactly once here; conversation instances only
    // ever read the cached registry.
    let adapter = Arc::new(ToolAdapter::from_config(&config.mcp));
    let tool_count = adapter.initialize().await.map_err(BootstrapError::ToolCatalog)?;
    info!(
        event_name = "system.bootstrap.tool_catalog_cached",
        correlation_id = "bootstrap",
        tool_count,
        "tool catalog cached"
    );

    let runner = OpenAiRunner::new(
        &config.llm,
        Arc::clone(&adapter) as Arc<dyn ToolInvoker>,
        config.retry.policy(),
    )
    .map_err(BootstrapError::Runner)?;

    let registry = Arc::new(ConversationRegistry::new(
        (&config.conversation).into(),
        AgentConfig::with_model(&config.llm.model),
        Arc::new(runner),
    ));

    info!(
        event_name = "system.bootstrap.complete",
        correlation_id = "bootstrap",
        model = %config.llm.model,
        "application bootstrap complete"
    );

    Ok(Application { state: AppState { registry, adapter }, config })
}
