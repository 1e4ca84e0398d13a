//! Repository for conversation database operations

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use super::DbError;
use super::models::{ConversationRow, ListConversationsQuery, MessageRow, PaginatedConversations};
use crate::model::{Conversation, ConversationMessage, MessageRole};
use crate::service::conversation::{ConversationStore, StoreError, conversation_title};

const DEFAULT_PAGE_SIZE: u32 = 20;

const CONVERSATION_COLUMNS: &str = r#"
    c.id, c.title, c.created_at, c.updated_at,
    (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id) AS message_count
"#;

/// Escape LIKE wildcards and wrap the term for a substring match
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Repository for conversations and their messages
#[derive(Clone)]
pub struct ConversationRepository {
    pool: PgPool,
}

impl ConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a conversation titled after its first message
    pub async fn create(&self, first_message: &str) -> Result<Conversation, DbError> {
        let id = Uuid::new_v4().to_string();
        let title = conversation_title(first_message);
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO conversations (id, title, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            "#,
        )
        .bind(&id)
        .bind(&title)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::info!(conversation_id = %id, "Created conversation");

        Ok(Conversation {
            id,
            title,
            created_at: now,
            updated_at: now,
            message_count: 0,
        })
    }

    /// Check if a conversation exists by ID
    pub async fn exists(&self, id: &str) -> Result<bool, DbError> {
        let result: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM conversations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(result.is_some())
    }

    /// Get a conversation by ID
    pub async fn get(&self, id: &str) -> Result<Conversation, DbError> {
        let row: ConversationRow = sqlx::query_as(&format!(
            "SELECT {} FROM conversations c WHERE c.id = $1",
            CONVERSATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(id.to_string()))?;

        Ok(row.into())
    }

    /// A page of a conversation's messages, oldest first
    pub async fn messages(
        &self,
        id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ConversationMessage>, DbError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, conversation_id, role, content, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(id)
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MessageRow::into_domain).collect()
    }

    /// The latest `limit` messages, oldest first
    pub async fn recent_messages(
        &self,
        id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, DbError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, conversation_id, role, content, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .rev()
            .map(MessageRow::into_domain)
            .collect()
    }

    /// Append a message and touch the conversation in one transaction
    pub async fn save_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<String, DbError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE conversations SET updated_at = $2 WHERE id = $1")
            .bind(conversation_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(DbError::NotFound(conversation_id.to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, role, content, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(role.as_str())
        .bind(content)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            conversation_id = %conversation_id,
            message_id = %id,
            role = %role,
            "Saved message"
        );
        Ok(id)
    }

    /// Delete a conversation and its messages
    /// Returns true if the conversation was deleted, false if it didn't exist
    pub async fn delete(&self, id: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            tracing::info!(conversation_id = %id, "Deleted conversation");
        }

        Ok(deleted)
    }

    /// List conversations, most recently updated first, optionally filtered by text
    pub async fn list(
        &self,
        query: ListConversationsQuery,
    ) -> Result<PaginatedConversations, DbError> {
        let page = query.page.unwrap_or(1).max(1);
        let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 100);
        let offset = page_offset(page, page_size);

        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(like_pattern);

        let where_clause = if search.is_some() {
            r#"WHERE c.title ILIKE $1 ESCAPE '\'
               OR EXISTS (SELECT 1 FROM messages m WHERE m.conversation_id = c.id AND m.content ILIKE $1 ESCAPE '\')"#
        } else {
            ""
        };

        // Get total count
        let count_query = format!("SELECT COUNT(*) FROM conversations c {}", where_clause);
        let total_count: i64 = {
            let mut q = sqlx::query_scalar(&count_query);
            if let Some(ref pattern) = search {
                q = q.bind(pattern);
            }
            q.fetch_one(&self.pool).await?
        };

        let select_query = format!(
            r#"
            SELECT {}
            FROM conversations c
            {}
            ORDER BY c.updated_at DESC
            LIMIT {} OFFSET {}
            "#,
            CONVERSATION_COLUMNS, where_clause, page_size, offset
        );
        let rows: Vec<ConversationRow> = {
            let mut q = sqlx::query_as(&select_query);
            if let Some(ref pattern) = search {
                q = q.bind(pattern);
            }
            q.fetch_all(&self.pool).await?
        };

        let total_pages = ((total_count as f64) / (page_size as f64)).ceil() as u32;

        Ok(PaginatedConversations {
            conversations: rows.into_iter().map(Conversation::from).collect(),
            page,
            page_size,
            total_count,
            total_pages,
        })
    }
}

/// Rows skipped before `page`, saturating for out-of-range pages
fn page_offset(page: u32, page_size: u32) -> u64 {
    u64::from(page.saturating_sub(1)) * u64::from(page_size)
}

#[async_trait]
impl ConversationStore for ConversationRepository {
    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, StoreError> {
        let messages = ConversationRepository::recent_messages(self, conversation_id, limit).await?;
        Ok(messages)
    }

    async fn save_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<String, StoreError> {
        let id = ConversationRepository::save_message(self, conversation_id, role, content).await?;
        Ok(id)
    }
}
