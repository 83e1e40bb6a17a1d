//! Conversation orchestration - the durable state machine and its runner
//!
//! This crate owns the hard half of the system:
//!
//! 1. **Conversation Orchestrator** (`conversation`, `registry`) - one
//!    single-writer run loop per user identity, a single-slot pending-message
//!    buffer, deterministic history trimming, and checkpoint/continuation so
//!    retained state stays bounded across a long-lived process.
//! 2. **Agent Runner Contract** (`runner`) - the fixed boundary to the
//!    reasoning loop: history + tools + auth context in, final output +
//!    flattened history out. The orchestrator never looks inside it.
//! 3. **Default runner** (`llm`) - an OpenAI-compatible chat-completions
//!    implementation with a bounded tool-call loop over the MCP adapter.
//!
//! # Safety principle
//!
//! Conversation state is mutated from exactly one task. Outside callers talk
//! to it through a handle: `submit` parks on a oneshot until the loop reaches
//! a terminal outcome, `history` reads the last committed watch snapshot.

pub mod conversation;
pub mod llm;
pub mod registry;
pub mod runner;

pub use conversation::{spawn_conversation, ConversationHandle, ConversationSettings};
pub use llm::OpenAiRunner;
pub use registry::ConversationRegistry;
pub use runner::{AgentConfig, AgentRunner, RunnerError, RunnerOutput};
