//! Database models for conversations and messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::DbError;
use crate::model::{Conversation, ConversationMessage, MessageRole};

/// Database representation of a conversation with its message count
#[derive(Debug, Clone, FromRow)]
pub struct ConversationRow {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: i64,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Conversation {
            id: row.id,
            title: row.title,
            created_at: row.created_at,
            updated_at: row.updated_at,
            message_count: row.message_count,
        }
    }
}

/// Database representation of a message
#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl MessageRow {
    /// Convert database row to domain model
    pub fn into_domain(self) -> Result<ConversationMessage, DbError> {
        let role = MessageRole::parse(&self.role).ok_or_else(|| {
            let message = format!("Unknown message role '{}' on {}", self.role, self.id);
            DbError::Serialization(message)
        })?;

        Ok(ConversationMessage {
            id: self.id,
            conversation_id: self.conversation_id,
            role,
            content: self.content,
            created_at: self.created_at,
        })
    }
}

/// Query parameters for listing conversations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListConversationsQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    /// Case-insensitive match on titles and message content
    pub search: Option<String>,
}

/// Paginated response for conversations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedConversations {
    pub conversations: Vec<Conversation>,
    pub page: u32,
    pub page_size: u32,
    pub total_count: i64,
    pub total_pages: u32,
}
