//! REST API endpoints for conversations

use actix_web::{HttpResponse, delete, get, post, web};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::api::error::{ApiError, ErrorResponse};
use crate::db::models::ListConversationsQuery;
use crate::db::repository::ConversationRepository;
use crate::model::{Conversation, ConversationMessage};

const DEFAULT_TITLE: &str = "New Conversation";
const DEFAULT_MESSAGE_LIMIT: u32 = 50;
const MAX_MESSAGE_LIMIT: u32 = 500;

/// Query parameters for listing conversations
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListConversationsParams {
    /// Page number (1-indexed, default: 1)
    pub page: Option<u32>,
    /// Page size (default: 20, max: 100)
    pub limit: Option<u32>,
}

/// Query parameters for searching conversations
#[derive(Debug, Deserialize, IntoParams)]
pub struct SearchConversationsParams {
    /// Text matched against titles and message content
    pub q: String,
    /// Page number (1-indexed, default: 1)
    pub page: Option<u32>,
    /// Page size (default: 20, max: 100)
    pub limit: Option<u32>,
}

/// Query parameters for paging a conversation's messages
#[derive(Debug, Deserialize, IntoParams)]
pub struct MessagePageParams {
    /// Messages to return (default: 50)
    pub limit: Option<u32>,
    /// Messages to skip (default: 0)
    pub offset: Option<u32>,
}

/// Query parameters for creating a conversation
#[derive(Debug, Deserialize, IntoParams)]
pub struct CreateConversationParams {
    /// Conversation title (default: "New Conversation")
    pub title: Option<String>,
}

/// Paginated response for conversations
#[derive(Debug, Serialize, ToSchema)]
pub struct ConversationListResponse {
    pub conversations: Vec<Conversation>,
    pub page: u32,
    pub limit: u32,
    pub total_count: i64,
    pub total_pages: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessagePagination {
    pub limit: u32,
    pub offset: u32,
    pub total: i64,
}

/// A conversation with a page of its messages
#[derive(Debug, Serialize, ToSchema)]
pub struct ConversationDetailResponse {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub messages: Vec<ConversationMessage>,
    pub pagination: MessagePagination,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteConversationResponse {
    pub message: String,
}

async fn list_page(
    repository: &ConversationRepository,
    page: Option<u32>,
    limit: Option<u32>,
    search: Option<String>,
) -> Result<ConversationListResponse, ApiError> {
    let paginated = repository
        .list(ListConversationsQuery {
            page,
            page_size: limit,
            search,
        })
        .await?;

    Ok(ConversationListResponse {
        conversations: paginated.conversations,
        page: paginated.page,
        limit: paginated.page_size,
        total_count: paginated.total_count,
        total_pages: paginated.total_pages,
    })
}

/// List conversations, most recently updated first
#[utoipa::path(
    get,
    path = "/api/conversations",
    params(ListConversationsParams),
    responses(
        (status = 200, description = "Conversations retrieved successfully", body = ConversationListResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "conversations"
)]
#[get("/api/conversations")]
pub async fn list_conversations(
    repository: web::Data<ConversationRepository>,
    query: web::Query<ListConversationsParams>,
) -> Result<HttpResponse, ApiError> {
    let response = list_page(&repository, query.page, query.limit, None).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Search conversations by title and message content
#[utoipa::path(
    get,
    path = "/api/conversations/search",
    params(SearchConversationsParams),
    responses(
        (status = 200, description = "Matching conversations", body = ConversationListResponse),
        (status = 400, description = "Empty search text", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "conversations"
)]
#[get("/api/conversations/search")]
pub async fn search_conversations(
    repository: web::Data<ConversationRepository>,
    query: web::Query<SearchConversationsParams>,
) -> Result<HttpResponse, ApiError> {
    let query = query.into_inner();
    if query.q.trim().is_empty() {
        return Err(ApiError::BadRequest("q must not be empty".to_string()));
    }

    let response = list_page(&repository, query.page, query.limit, Some(query.q)).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Get a conversation with its messages
#[utoipa::path(
    get,
    path = "/api/conversations/{id}",
    params(
        ("id" = String, Path, description = "Conversation ID"),
        MessagePageParams
    ),
    responses(
        (status = 200, description = "Conversation retrieved successfully", body = ConversationDetailResponse),
        (status = 404, description = "Conversation not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "conversations"
)]
#[get("/api/conversations/{id}")]
pub async fn get_conversation(
    repository: web::Data<ConversationRepository>,
    path: web::Path<String>,
    query: web::Query<MessagePageParams>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let limit = query
        .limit
        .unwrap_or(DEFAULT_MESSAGE_LIMIT)
        .clamp(1, MAX_MESSAGE_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let conversation = repository.get(&id).await?;
    let messages = repository.messages(&id, limit, offset).await?;
    let total = conversation.message_count;

    Ok(HttpResponse::Ok().json(ConversationDetailResponse {
        conversation,
        messages,
        pagination: MessagePagination {
            limit,
            offset,
            total,
        },
    }))
}

/// Create an empty conversation
#[utoipa::path(
    post,
    path = "/api/conversations",
    params(CreateConversationParams),
    responses(
        (status = 201, description = "Conversation created", body = Conversation),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "conversations"
)]
#[post("/api/conversations")]
pub async fn create_conversation(
    repository: web::Data<ConversationRepository>,
    query: web::Query<CreateConversationParams>,
) -> Result<HttpResponse, ApiError> {
    let title = query
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TITLE);

    let conversation = repository.create(title).await?;
    Ok(HttpResponse::Created().json(conversation))
}

/// Delete a conversation and all its messages
#[utoipa::path(
    delete,
    path = "/api/conversations/{id}",
    params(
        ("id" = String, Path, description = "Conversation ID")
    ),
    responses(
        (status = 200, description = "Conversation deleted", body = DeleteConversationResponse),
        (status = 404, description = "Conversation not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "conversations"
)]
#[delete("/api/conversations/{id}")]
pub async fn delete_conversation(
    repository: web::Data<ConversationRepository>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();

    if !repository.delete(&id).await? {
        return Err(ApiError::ConversationNotFound(id));
    }

    Ok(HttpResponse::Ok().json(DeleteConversationResponse {
        message: format!("Conversation {} deleted successfully", id),
    }))
}

/// Configure conversation routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_conversations)
        .service(search_conversations)
        .service(create_conversation)
        .service(get_conversation)
        .service(delete_conversation);
}
