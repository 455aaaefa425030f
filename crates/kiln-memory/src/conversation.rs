//! Conversation record types and their on-disk document form.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
/// Speaker of one stored turn.
pub enum ConversationRole {
    User,
    Assistant,
}

impl ConversationRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// One persisted chat message.
pub struct StoredMessage {
    pub role: ConversationRole,
    pub content: String,
    /// RFC 3339 time the message was recorded.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl StoredMessage {
    pub fn new(role: ConversationRole, content: impl Into<String>, metadata: Option<Value>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: kiln_core::current_rfc3339_timestamp(),
            metadata,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
/// Bounded message history for one conversation key.
pub struct ConversationRecord {
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
    #[serde(default)]
    pub last_updated: Option<String>,
    /// User turns ever recorded for the key; trimming does not reduce it.
    #[serde(default)]
    pub total_conversations: u64,
}

impl ConversationRecord {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Appends `message`, then drops the oldest entries beyond `cap`.
    pub fn push(&mut self, message: StoredMessage, cap: usize) {
        if message.role == ConversationRole::User {
            self.total_conversations = self.total_conversations.saturating_add(1);
        }
        self.last_updated = Some(message.timestamp.clone());
        self.messages.push(message);
        self.trim_to(cap);
    }

    pub fn trim_to(&mut self, cap: usize) {
        let cap = cap.max(1);
        if self.messages.len() > cap {
            let overflow = self.messages.len() - cap;
            self.messages.drain(..overflow);
        }
    }

    /// Last `n` messages in conversational order.
    pub fn tail(&self, n: usize) -> &[StoredMessage] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
/// Whole persisted document: conversation key to record.
pub struct ConversationDocument {
    pub records: BTreeMap<String, ConversationRecord>,
}

impl ConversationDocument {
    pub fn record(&self, key: &str) -> Option<&ConversationRecord> {
        self.records.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{ConversationDocument, ConversationRecord, ConversationRole, StoredMessage};

    fn message(role: ConversationRole, content: &str) -> StoredMessage {
        StoredMessage::new(role, content, None)
    }

    #[test]
    fn unit_push_trims_oldest_and_counts_user_turns() {
        let mut record = ConversationRecord::default();
        for index in 0..5 {
            record.push(message(ConversationRole::User, &format!("q{index}")), 3);
            record.push(message(ConversationRole::Assistant, &format!("a{index}")), 3);
        }
        let contents = record
            .messages
            .iter()
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>();
        assert_eq!(contents, vec!["a3", "q4", "a4"]);
        assert_eq!(record.total_conversations, 5);
        assert!(record.last_updated.is_some());
    }

    #[test]
    fn unit_tail_clamps_to_available_messages() {
        let mut record = ConversationRecord::default();
        record.push(message(ConversationRole::User, "only"), 10);
        assert_eq!(record.tail(5).len(), 1);
        assert!(record.tail(0).is_empty());
    }

    #[test]
    fn unit_document_serializes_as_plain_key_map_with_camel_case_fields() {
        let mut document = ConversationDocument::default();
        let mut record = ConversationRecord::default();
        record.push(message(ConversationRole::User, "hi"), 10);
        document.records.insert("owner/repo".to_string(), record);

        let value = serde_json::to_value(&document).expect("serialize");
        let entry = &value["owner/repo"];
        assert_eq!(entry["totalConversations"], 1);
        assert!(entry["lastUpdated"].is_string());
        assert_eq!(entry["messages"][0]["role"], "user");
        assert!(entry["messages"][0].get("metadata").is_none());
    }
}
