use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub mcp: McpConfig,
    pub llm: LlmConfig,
    pub conversation: ConversationConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct McpConfig {
    /// Streamable-HTTP endpoint of the tool server, e.g. `http://localhost:8002/mcp`.
    pub address: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ConversationConfig {
    /// Upper bound on retained history length; oldest turns are evicted.
    pub max_history_turns: usize,
    /// Retained length at which the instance checkpoints itself forward.
    pub continue_after_turns: usize,
}

#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub initial_backoff_ms: u64,
    pub backoff_coefficient: f64,
    pub max_backoff_ms: u64,
    pub max_attempts: u32,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            backoff_coefficient: self.backoff_coefficient,
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            max_attempts: self.max_attempts,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_model: Option<String>,
    pub mcp_address: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig { bind_address: "127.0.0.1".to_string(), port: 8003 },
            mcp: McpConfig {
                address: "http://localhost:8002/mcp".to_string(),
                timeout_secs: 10,
            },
            llm: LlmConfig {
                api_key: None,
                base_url: "http://localhost:11434/v1".to_string(),
                model: "gpt-oss:20b".to_string(),
                timeout_secs: 90,
            },
            conversation: ConversationConfig { max_history_turns: 50, continue_after_turns: 40 },
            retry: RetryConfig {
                initial_backoff_ms: 1_000,
                backoff_coefficient: 2.0,
                max_backoff_ms: 10_000,
                max_attempts: 5,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("confab.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
        }

        if let Some(mcp) = patch.mcp {
            if let Some(address) = mcp.address {
                self.mcp.address = address;
            }
            if let Some(timeout_secs) = mcp.timeout_secs {
                self.mcp.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(api_key_value) = llm.api_key {
                self.llm.api_key = Some(api_key_value.into());
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(conversation) = patch.conversation {
            if let Some(max_history_turns) = conversation.max_history_turns {
                self.conversation.max_history_turns = max_history_turns;
            }
            if let Some(continue_after_turns) = conversation.continue_after_turns {
                self.conversation.continue_after_turns = continue_after_turns;
            }
        }

        if let Some(retry) = patch.retry {
            if let Some(initial_backoff_ms) = retry.initial_backoff_ms {
                self.retry.initial_backoff_ms = initial_backoff_ms;
            }
            if let Some(backoff_coefficient) = retry.backoff_coefficient {
                self.retry.backoff_coefficient = backoff_coefficient;
            }
            if let Some(max_backoff_ms) = retry.max_backoff_ms {
                self.retry.max_backoff_ms = max_backoff_ms;
            }
            if let Some(max_attempts) = retry.max_attempts {
                self.retry.max_attempts = max_attempts;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CONFAB_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CONFAB_SERVER_PORT") {
            self.server.port = parse_u16("CONFAB_SERVER_PORT", &value)?;
        }

        if let Some(value) = read_env("CONFAB_MCP_ADDRESS") {
            self.mcp.address = value;
        }
        if let Some(value) = read_env("CONFAB_MCP_TIMEOUT_SECS") {
            self.mcp.timeout_secs = parse_u64("CONFAB_MCP_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CONFAB_LLM_API_KEY") {
            self.llm.api_key = Some(value.into());
        }
        if let Some(value) = read_env("CONFAB_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("CONFAB_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CONFAB_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CONFAB_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CONFAB_CONVERSATION_MAX_HISTORY_TURNS") {
            self.conversation.max_history_turns =
                parse_usize("CONFAB_CONVERSATION_MAX_HISTORY_TURNS", &value)?;
        }
        if let Some(value) = read_env("CONFAB_CONVERSATION_CONTINUE_AFTER_TURNS") {
            self.conversation.continue_after_turns =
                parse_usize("CONFAB_CONVERSATION_CONTINUE_AFTER_TURNS", &value)?;
        }

        if let Some(value) = read_env("CONFAB_RETRY_INITIAL_BACKOFF_MS") {
            self.retry.initial_backoff_ms = parse_u64("CONFAB_RETRY_INITIAL_BACKOFF_MS", &value)?;
        }
        if let Some(value) = read_env("CONFAB_RETRY_BACKOFF_COEFFICIENT") {
            self.retry.backoff_coefficient =
                parse_f64("CONFAB_RETRY_BACKOFF_COEFFICIENT", &value)?;
        }
        if let Some(value) = read_env("CONFAB_RETRY_MAX_BACKOFF_MS") {
            self.retry.max_backoff_ms = parse_u64("CONFAB_RETRY_MAX_BACKOFF_MS", &value)?;
        }
        if let Some(value) = read_env("CONFAB_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_u32("CONFAB_RETRY_MAX_ATTEMPTS", &value)?;
        }

        let log_level = read_env("CONFAB_LOGGING_LEVEL").or_else(|| read_env("CONFAB_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CONFAB_LOGGING_FORMAT").or_else(|| read_env("CONFAB_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(mcp_address) = overrides.mcp_address {
            self.mcp.address = mcp_address;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_server(&self.server)?;
        validate_mcp(&self.mcp)?;
        validate_llm(&self.llm)?;
        validate_conversation(&self.conversation)?;
        validate_retry(&self.retry)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("confab.toml"), PathBuf::from("config/confab.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }
    Ok(())
}

fn validate_mcp(mcp: &McpConfig) -> Result<(), ConfigError> {
    if !mcp.address.starts_with("http://") && !mcp.address.starts_with("https://") {
        return Err(ConfigError::Validation(
            "mcp.address must start with http:// or https://".to_string(),
        ));
    }
    if mcp.timeout_secs == 0 || mcp.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "mcp.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if !llm.base_url.starts_with("http://") && !llm.base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }
    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }
    if llm.timeout_secs == 0 || llm.timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=600".to_string(),
        ));
    }
    Ok(())
}

fn validate_conversation(conversation: &ConversationConfig) -> Result<(), ConfigError> {
    if conversation.max_history_turns < 2 {
        return Err(ConfigError::Validation(
            "conversation.max_history_turns must hold at least one exchange (>= 2)".to_string(),
        ));
    }
    if conversation.continue_after_turns < 2 {
        return Err(ConfigError::Validation(
            "conversation.continue_after_turns must be >= 2".to_string(),
        ));
    }
    if conversation.continue_after_turns > conversation.max_history_turns {
        return Err(ConfigError::Validation(
            "conversation.continue_after_turns must not exceed conversation.max_history_turns"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_retry(retry: &RetryConfig) -> Result<(), ConfigError> {
    if retry.initial_backoff_ms == 0 {
        return Err(ConfigError::Validation(
            "retry.initial_backoff_ms must be greater than zero".to_string(),
        ));
    }
    if retry.backoff_coefficient < 1.0 {
        return Err(ConfigError::Validation(
            "retry.backoff_coefficient must be >= 1.0".to_string(),
        ));
    }
    if retry.max_backoff_ms < retry.initial_backoff_ms {
        return Err(ConfigError::Validation(
            "retry.max_backoff_ms must be >= retry.initial_backoff_ms".to_string(),
        ));
    }
    if retry.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "retry.max_attempts must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    server: Option<ServerPatch>,
    mcp: Option<McpPatch>,
    llm: Option<LlmPatch>,
    conversation: Option<ConversationPatch>,
    retry: Option<RetryPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct McpPatch {
    address: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    max_history_turns: Option<usize>,
    continue_after_turns: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RetryPatch {
    initial_backoff_ms: Option<u64>,
    backoff_coefficient: Option<f64>,
    max_backoff_ms: Option<u64>,
    max_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_validate_and_mirror_the_local_stack() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.server.port == 8003, "default api port should be 8003")?;
        ensure(
            config.mcp.address == "http://localhost:8002/mcp",
            "default mcp address should point at the local tool server",
        )?;
        ensure(config.conversation.max_history_turns == 50, "default retention should be 50")?;
        ensure(config.retry.max_attempts == 5, "default retry budget should be 5 attempts")?;
        Ok(())
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_CONFAB_LLM_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("confab.toml");
            fs::write(
                &path,
                r#"
[llm]
api_key = "${TEST_CONFAB_LLM_KEY}"
model = "llama3.2:3b"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let api_key = config.llm.api_key.as_ref().map(|key| key.expose_secret().to_string());
            ensure(
                api_key.as_deref() == Some("sk-from-env"),
                "api key should be loaded from environment",
            )?;
            ensure(config.llm.model == "llama3.2:3b", "model should come from the file")?;
            Ok(())
        })();

        clear_vars(&["TEST_CONFAB_LLM_KEY"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONFAB_MCP_ADDRESS", "http://from-env:8002/mcp");
        env::set_var("CONFAB_LOG_LEVEL", "warn");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("confab.toml");
            fs::write(
                &path,
                r#"
[mcp]
address = "http://from-file:8002/mcp"

[logging]
level = "error"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.mcp.address == "http://from-env:8002/mcp",
                "env mcp address should win over file and defaults",
            )?;
            ensure(config.logging.level == "debug", "explicit override should win over env")?;
            Ok(())
        })();

        clear_vars(&["CONFAB_MCP_ADDRESS", "CONFAB_LOG_LEVEL"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONFAB_CONVERSATION_MAX_HISTORY_TURNS", "10");
        env::set_var("CONFAB_CONVERSATION_CONTINUE_AFTER_TURNS", "20");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message)
                    if message.contains("continue_after_turns")
            );
            ensure(has_message, "validation failure should mention continue_after_turns")
        })();

        clear_vars(&[
            "CONFAB_CONVERSATION_MAX_HISTORY_TURNS",
            "CONFAB_CONVERSATION_CONTINUE_AFTER_TURNS",
        ]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONFAB_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["CONFAB_LLM_API_KEY"]);
        result
    }
}
