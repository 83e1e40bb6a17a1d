//! Confab MCP (Model Context Protocol) tool adapter
//!
//! This crate bridges an externally enumerated MCP tool catalog into typed,
//! documented, invocable activities for the agent runner.
//!
//! ## Architecture
//!
//! - `schema`: pure coercion from schema primitive type names to value kinds
//! - `client`: JSON-RPC wire client for the streamable-HTTP tool endpoint,
//!   opened per listing / per call
//! - `adapter`: descriptor → activity transformation, documentation
//!   synthesis, and the process-wide read-only registry
//!
//! The catalog is fetched exactly once at worker startup and cached for the
//! process lifetime; a stale catalog requires a restart.

pub mod adapter;
pub mod client;
pub mod schema;

pub use adapter::{
    ActivityArgs, ActivitySpec, ParamSpec, ToolAdapter, ToolDescriptor, ToolInvoker,
};
pub use client::McpClient;
pub use schema::{coerce, ParamType, ValueKind};

use thiserror::Error;

/// Errors specific to tool adapter operations
#[derive(Error, Debug)]
pub enum ToolError {
    /// The adapter was used before `initialize()` populated the registry.
    #[error("tool adapter is not initialized; the catalog is fetched once at startup")]
    NotInitialized,

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for tool `{tool}`: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("tool endpoint request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tool endpoint protocol error: {0}")]
    Protocol(String),

    /// The endpoint executed the tool and reported a failure.
    #[error("tool `{tool}` failed: {message}")]
    Invocation { tool: String, message: String },
}

/// Result type for tool adapter operations
pub type ToolResult<T> = Result<T, ToolError>;
