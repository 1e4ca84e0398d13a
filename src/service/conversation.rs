//! Conversation persistence contract and context formatting

use async_trait::async_trait;

use crate::model::{ConversationMessage, MessageRole};

/// Messages loaded when building prior-turn context
pub const CONTEXT_WINDOW: usize = 6;
/// Messages actually passed on as context
pub const CONTEXT_MESSAGES: usize = 4;
const TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("Conversation not found: {0}")]
    NotFound(String),

    #[error("Conversation storage failed: {0}")]
    Storage(String),
}

impl From<crate::db::DbError> for StoreError {
    fn from(err: crate::db::DbError) -> Self {
        match err {
            crate::db::DbError::NotFound(id) => StoreError::NotFound(id),
            other => StoreError::Storage(other.to_string()),
        }
    }
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Most recent messages, oldest first
    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, StoreError>;

    /// Append a message, returning its id
    async fn save_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<String, StoreError>;

    /// Prior-turn context for the pipeline, if the conversation has any messages
    async fn context(&self, conversation_id: &str) -> Result<Option<String>, StoreError> {
        let messages = self.recent_messages(conversation_id, CONTEXT_WINDOW).await?;
        Ok(format_context(&messages, CONTEXT_MESSAGES))
    }
}

/// Render the last `keep` messages as `role: content` lines
pub fn format_context(messages: &[ConversationMessage], keep: usize) -> Option<String> {
    if messages.is_empty() || keep == 0 {
        return None;
    }
    let start = messages.len().saturating_sub(keep);
    Some(
        messages[start..]
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

/// Conversation title derived from its first message
pub fn conversation_title(first_message: &str) -> String {
    let collapsed = first_message
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if collapsed.chars().count() <= TITLE_MAX_CHARS {
        return collapsed;
    }
    let head: String = collapsed.chars().take(TITLE_MAX_CHARS - 3).collect();
    format!("{}...", head.trim_end())
}
