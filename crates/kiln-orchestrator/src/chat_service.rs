use std::sync::Arc;

use kiln_ai::{LlmClient, Message};
use kiln_memory::{ConversationRole, ConversationStore};
use serde::Serialize;

use crate::prompts::{history_messages, CHAT_SYSTEM_PROMPT};
use crate::provider::{complete_text, CompletionSettings};
use crate::{
    require_non_empty, OrchestratorError, ReplySource, DEFAULT_HISTORY_WINDOW,
    OFFLINE_FALLBACK_REPLY,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Public struct `ChatReply` used across Kiln components.
pub struct ChatReply {
    pub text: String,
    pub source: ReplySource,
    /// Messages stored for the key after this turn.
    pub history_len: usize,
}

#[derive(Clone)]
/// One conversational turn against stored history.
pub struct ChatService {
    store: Arc<ConversationStore>,
    client: Option<Arc<dyn LlmClient>>,
    settings: CompletionSettings,
    history_window: usize,
    system_prompt: String,
}

impl ChatService {
    pub fn new(store: Arc<ConversationStore>, client: Option<Arc<dyn LlmClient>>) -> Self {
        Self {
            store,
            client,
            settings: CompletionSettings::default(),
            history_window: DEFAULT_HISTORY_WINDOW,
            system_prompt: CHAT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_settings(mut self, settings: CompletionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_history_window(mut self, history_window: usize) -> Self {
        self.history_window = history_window;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// Answers `message` for `key` and records both turns on success.
    ///
    /// Provider failures record nothing so a retry does not duplicate the user turn.
    pub async fn chat(&self, key: &str, message: &str) -> Result<ChatReply, OrchestratorError> {
        require_non_empty("conversation key", key)?;
        require_non_empty("message", message)?;

        let Some(client) = self.client.as_ref() else {
            tracing::warn!(key, "no completion provider configured; returning fallback reply");
            return Ok(ChatReply {
                text: OFFLINE_FALLBACK_REPLY.to_string(),
                source: ReplySource::Fallback,
                history_len: self.store.load(key).await.messages.len(),
            });
        };

        let history = self.store.recent_context(key, self.history_window).await;
        let mut messages = history_messages(&history);
        messages.push(Message::user(message));
        let text = complete_text(
            client.as_ref(),
            &self.system_prompt,
            &messages,
            &self.settings,
        )
        .await
        .map_err(OrchestratorError::provider)?;

        self.store
            .append(key, ConversationRole::User, message, None)
            .await;
        let record = self
            .store
            .append(key, ConversationRole::Assistant, text.as_str(), None)
            .await;
        Ok(ChatReply {
            text,
            source: ReplySource::Provider,
            history_len: record.messages.len(),
        })
    }
}
