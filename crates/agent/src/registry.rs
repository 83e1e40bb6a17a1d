//! Process-wide map of live conversation instances.
//!
//! Identities are independent: each gets its own run-loop task and they
//! execute in full parallelism. Submitting against an identity that is not
//! running implicitly creates it; reads never do.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use confab_core::{
    conversation_id, ConversationArgs, ConversationError, ConversationResult, Message, Turn,
};

use crate::conversation::{spawn_conversation, ConversationHandle, ConversationSettings};
use crate::runner::{AgentConfig, AgentRunner};

pub struct ConversationRegistry {
    settings: ConversationSettings,
    agent: AgentConfig,
    runner: Arc<dyn AgentRunner>,
    conversations: RwLock<HashMap<String, ConversationHandle>>,
}

impl ConversationRegistry {
    pub fn new(
        settings: ConversationSettings,
        agent: AgentConfig,
        runner: Arc<dyn AgentRunner>,
    ) -> Self {
        Self { settings, agent, runner, conversations: RwLock::new(HashMap::new()) }
    }

    /// Returns the live handle for a user, starting the instance on first
    /// use.
    pub async fn handle(&self, user_id: &str) -> ConversationHandle {
        let id = conversation_id(user_id);

        if let Some(handle) = self.conversations.read().await.get(&id) {
            return handle.clone();
        }

        let mut conversations = self.conversations.write().await;
        if let Some(handle) = conversations.get(&id) {
            return handle.clone();
        }

        info!(
            event_name = "conversation.instance_started",
            conversation_id = %id,
            user_id = %user_id,
            "starting conversation instance"
        );
        let handle = spawn_conversation(
            ConversationArgs::new(user_id),
            self.settings,
            self.agent.clone(),
            Arc::clone(&self.runner),
        );
        conversations.insert(id, handle.clone());
        handle
    }

    /// Submits a message to the user's instance, creating it if needed.
    pub async fn submit(
        &self,
        user_id: &str,
        message: Message,
    ) -> Result<ConversationResult, ConversationError> {
        self.handle(user_id).await.submit(message).await
    }

    /// Last committed history for a user. An identity that has never
    /// processed a message reads as empty and is not created.
    pub async fn history(&self, user_id: &str) -> Vec<Turn> {
        let id = conversation_id(user_id);
        match self.conversations.read().await.get(&id) {
            Some(handle) => handle.history(),
            None => Vec::new(),
        }
    }

    pub async fn active_count(&self) -> usize {
        self.conversations.read().await.len()
    }
}
