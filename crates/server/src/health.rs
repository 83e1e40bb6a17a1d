use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::routes::AppState;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub tools: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let tools = tool_catalog_check(&state);
    let ready = tools.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "confab-server runtime initialized".to_string(),
        },
        tools,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn tool_catalog_check(state: &AppState) -> HealthCheck {
    match state.adapter.specs() {
        Ok(specs) => HealthCheck {
            status: "ready",
            detail: format!("{} tools cached from the endpoint catalog", specs.len()),
        },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("tool catalog unavailable: {error}") }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{extract::State, http::StatusCode, Json};

    use confab_agent::{AgentConfig, ConversationRegistry, ConversationSettings};
    use confab_core::{AuthContext, Turn};
    use confab_mcp::ToolAdapter;

    use crate::health::{health, HealthCheck};
    use crate::routes::AppState;

    struct NoopRunner;

    #[async_trait::async_trait]
    impl confab_agent::AgentRunner for NoopRunner {
        async fn run(
            &self,
            _config: &AgentConfig,
            history: Vec<Turn>,
            _auth: &AuthContext,
        ) -> Result<confab_agent::RunnerOutput, confab_agent::RunnerError> {
            Ok(confab_agent::RunnerOutput { final_output: String::new(), history })
        }
    }

    #[tokio::test]
    async fn health_is_degraded_until_the_tool_catalog_is_cached() {
        let registry = Arc::new(ConversationRegistry::new(
            ConversationSettings::default(),
            AgentConfig::default(),
            Arc::new(NoopRunner),
        ));
        let adapter =
            Arc::new(ToolAdapter::new("http://localhost:8002/mcp", Duration::from_secs(1)));

        let (status, Json(payload)) = health(State(AppState { registry, adapter })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(
            payload.service,
            HealthCheck {
                status: "ready",
                detail: "confab-server runtime initialized".to_string()
            }
        );
        assert_eq!(payload.tools.status, "degraded");
    }
}
