use serde::{Deserialize, Serialize};

use crate::domain::auth::AuthContext;
use crate::domain::turn::Turn;

/// Durable identity key for one user's conversation instance. Deterministic
/// so that every caller addresses the same instance.
pub fn conversation_id(user_id: &str) -> String {
    format!("conversation_{user_id}")
}

/// A message submitted by a user, with the identity that submitted it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    #[serde(default)]
    pub auth: AuthContext,
}

impl Message {
    pub fn new(text: impl Into<String>, auth: AuthContext) -> Self {
        Self { text: text.into(), auth }
    }
}

/// Restart payload for a conversation instance. A checkpoint hands the
/// trimmed history back to a fresh run of the same identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationArgs {
    pub user_id: String,
    #[serde(default)]
    pub history: Vec<Turn>,
}

impl ConversationArgs {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), history: Vec::new() }
    }

    pub fn with_history(user_id: impl Into<String>, history: Vec<Turn>) -> Self {
        Self { user_id: user_id.into(), history }
    }
}

/// The terminal outcome of one accepted message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationResult {
    /// A response to relay to the user.
    pub message: String,
}
