//! Descriptor → activity transformation and the process-wide registry.
//!
//! Every externally described tool becomes an `Activity`: an invocable unit
//! of work with an ordered, typed parameter list and synthesized
//! documentation. The registry is populated exactly once at startup and is
//! read-only afterwards, so conversation instances may share it freely.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use confab_core::config::McpConfig;
use confab_core::AuthContext;

use crate::client::McpClient;
use crate::schema::{coerce, ParamType};
use crate::{ToolError, ToolResult};

/// A schema-described external capability, as enumerated by the endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Option<Value>,
}

impl ToolDescriptor {
    /// Parses one raw catalog entry. Entries without a name are malformed
    /// and yield `None`; a missing input schema means a zero-argument tool.
    pub fn from_value(value: &Value) -> Option<Self> {
        let name = value.get("name")?.as_str()?.to_string();
        let description =
            value.get("description").and_then(Value::as_str).unwrap_or_default().to_string();
        let input_schema =
            value.get("inputSchema").cloned().unwrap_or_else(|| Value::Object(Map::new()));
        let output_schema = value.get("outputSchema").cloned();

        Some(Self { name, description, input_schema, output_schema })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub title: String,
    pub description: String,
    pub ty: ParamType,
}

impl ParamSpec {
    pub fn doc_line(&self) -> String {
        format!("{} ({}): {}", self.name, self.ty.display_name(), self.description)
    }
}

/// The typed shape of one activity: ordered parameters, a result descriptor,
/// and the synthesized documentation handed to the reasoning loop.
#[derive(Clone, Debug, PartialEq)]
pub struct ActivitySpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub result: ParamSpec,
    pub doc: String,
    /// Raw input schema, kept for declaring the tool to the model.
    pub input_schema: Value,
}

impl ActivitySpec {
    pub fn from_descriptor(descriptor: &ToolDescriptor) -> Self {
        let required: Vec<&str> = descriptor
            .input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        // Property order is the declared order; positional binding relies on it.
        let params: Vec<ParamSpec> = descriptor
            .input_schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|properties| {
                properties
                    .iter()
                    .map(|(name, property)| {
                        let kind = property
                            .get("type")
                            .and_then(Value::as_str)
                            .and_then(coerce);
                        // A type outside the coercion table degrades to an
                        // untyped optional, even when the schema marks it
                        // required.
                        let required = kind.is_some() && required.contains(&name.as_str());
                        ParamSpec {
                            name: name.clone(),
                            title: property
                                .get("title")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            description: property
                                .get("description")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            ty: ParamType::new(kind, required),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let result = result_spec(descriptor.output_schema.as_ref());
        let doc = synthesize_doc(&descriptor.description, &params, &result);

        Self {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            params,
            result,
            doc,
            input_schema: descriptor.input_schema.clone(),
        }
    }
}

/// Result descriptor from the tool's declared output schema. The endpoint
/// wraps scalar returns in a `result` property; that wrapper is looked
/// through. Tools without an output schema degrade to an untyped optional.
fn result_spec(output_schema: Option<&Value>) -> ParamSpec {
    let ty = match output_schema {
        Some(schema) => {
            let node = schema.pointer("/properties/result").unwrap_or(schema);
            ParamType::new(node.get("type").and_then(Value::as_str).and_then(coerce), true)
        }
        None => ParamType::new(None, false),
    };

    ParamSpec {
        name: "result".to_string(),
        title: "Result".to_string(),
        description: "The result of the tool execution".to_string(),
        ty,
    }
}

fn synthesize_doc(description: &str, params: &[ParamSpec], result: &ParamSpec) -> String {
    let mut doc = String::new();
    doc.push_str(description.trim());
    doc.push_str("\n\nArgs:\n");
    for param in params {
        doc.push_str(&param.doc_line());
        doc.push('\n');
    }
    doc.push_str("\nReturns:\n");
    doc.push_str(&result.doc_line());
    doc
}

/// Arguments for one activity invocation: positional values bound in
/// declared parameter order, or keyword values bound by name.
#[derive(Clone, Debug)]
pub enum ActivityArgs {
    Positional(Vec<Value>),
    Named(Map<String, Value>),
}

impl ActivityArgs {
    pub fn bind(self, spec: &ActivitySpec) -> ToolResult<Map<String, Value>> {
        let bound = match self {
            Self::Positional(values) => {
                if values.len() > spec.params.len() {
                    return Err(ToolError::InvalidArguments {
                        tool: spec.name.clone(),
                        message: format!(
                            "expected at most {} positional arguments, got {}",
                            spec.params.len(),
                            values.len()
                        ),
                    });
                }
                spec.params
                    .iter()
                    .zip(values)
                    .map(|(param, value)| (param.name.clone(), value))
                    .collect()
            }
            Self::Named(map) => {
                if let Some(unknown) =
                    map.keys().find(|key| !spec.params.iter().any(|param| &param.name == *key))
                {
                    return Err(ToolError::InvalidArguments {
                        tool: spec.name.clone(),
                        message: format!("unknown keyword argument `{unknown}`"),
                    });
                }
                map
            }
        };

        if let Some(missing) =
            spec.params.iter().find(|param| param.ty.required && !bound.contains_key(&param.name))
        {
            return Err(ToolError::InvalidArguments {
                tool: spec.name.clone(),
                message: format!("missing required argument `{}`", missing.name),
            });
        }

        Ok(bound)
    }
}

#[derive(Clone)]
struct Connector {
    endpoint: String,
    timeout: Duration,
}

impl Connector {
    async fn open(&self, auth: &AuthContext) -> ToolResult<McpClient> {
        McpClient::connect(&self.endpoint, self.timeout, auth).await
    }
}

/// One invocable, documented tool wrapper. Each invocation opens a fresh
/// connection and forwards the caller's identity headers.
pub struct Activity {
    spec: ActivitySpec,
    connector: Connector,
}

impl Activity {
    pub fn spec(&self) -> &ActivitySpec {
        &self.spec
    }

    pub async fn invoke(&self, args: ActivityArgs, auth: &AuthContext) -> ToolResult<Value> {
        let arguments = args.bind(&self.spec)?;
        debug!(
            event_name = "tool.invoke",
            tool = %self.spec.name,
            argument_count = arguments.len(),
            "forwarding tool call to endpoint"
        );

        let mut client = self.connector.open(auth).await?;
        client.call_tool(&self.spec.name, arguments).await
    }
}

struct Registry {
    order: Vec<String>,
    by_name: HashMap<String, Arc<Activity>>,
}

/// Name → activity registry. `initialize` fetches the catalog exactly once;
/// using the adapter before that is an error, and the cache is never
/// refreshed (a stale catalog requires a restart).
pub struct ToolAdapter {
    connector: Connector,
    registry: OnceLock<Registry>,
}

impl ToolAdapter {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            connector: Connector { endpoint: endpoint.into(), timeout },
            registry: OnceLock::new(),
        }
    }

    pub fn from_config(config: &McpConfig) -> Self {
        Self::new(config.address.clone(), Duration::from_secs(config.timeout_secs))
    }

    /// Fetches and caches the tool catalog. Idempotent: a populated registry
    /// is left untouched.
    pub async fn initialize(&self) -> ToolResult<usize> {
        if let Some(registry) = self.registry.get() {
            return Ok(registry.order.len());
        }

        let mut client = self.connector.open(&AuthContext::default()).await?;
        let raw_descriptors = client.list_tools().await?;

        let mut order = Vec::new();
        let mut by_name = HashMap::new();
        for raw in &raw_descriptors {
            let Some(descriptor) = ToolDescriptor::from_value(raw) else {
                warn!(
                    event_name = "tool.catalog_malformed_entry",
                    "skipping catalog entry without a name"
                );
                continue;
            };
            let spec = ActivitySpec::from_descriptor(&descriptor);
            order.push(spec.name.clone());
            by_name.insert(
                spec.name.clone(),
                Arc::new(Activity { spec, connector: self.connector.clone() }),
            );
        }

        info!(
            event_name = "tool.catalog_cached",
            tool_count = order.len(),
            endpoint = %self.connector.endpoint,
            "tool catalog fetched and cached for the process lifetime"
        );

        let count = order.len();
        let _ = self.registry.set(Registry { order, by_name });
        Ok(count)
    }

    pub fn is_initialized(&self) -> bool {
        self.registry.get().is_some()
    }

    pub fn activity(&self, name: &str) -> ToolResult<Arc<Activity>> {
        let registry = self.registry.get().ok_or(ToolError::NotInitialized)?;
        registry.by_name.get(name).cloned().ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    /// Activity specs in catalog order.
    pub fn specs(&self) -> ToolResult<Vec<ActivitySpec>> {
        let registry = self.registry.get().ok_or(ToolError::NotInitialized)?;
        Ok(registry
            .order
            .iter()
            .filter_map(|name| registry.by_name.get(name))
            .map(|activity| activity.spec.clone())
            .collect())
    }
}

/// Dispatch seam between the reasoning loop and the tool layer. The adapter
/// is the production implementation; tests substitute scripted ones.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    fn tool_specs(&self) -> ToolResult<Vec<ActivitySpec>>;

    async fn invoke(
        &self,
        name: &str,
        args: ActivityArgs,
        auth: &AuthContext,
    ) -> ToolResult<Value>;
}

#[async_trait]
impl ToolInvoker for ToolAdapter {
    fn tool_specs(&self) -> ToolResult<Vec<ActivitySpec>> {
        self.specs()
    }

    async fn invoke(
        &self,
        name: &str,
        args: ActivityArgs,
        auth: &AuthContext,
    ) -> ToolResult<Value> {
        self.activity(name)?.invoke(args, auth).await
    }
}
