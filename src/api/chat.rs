//! Question answering endpoint with streaming and collected responses

use actix_web::{HttpResponse, post, web};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::api::error::ApiError;
use crate::db::repository::ConversationRepository;
use crate::model::events::{ClaimView, SourceCitation};
use crate::model::{MessageRole, PipelineEvent};
use crate::service::PipelineCoordinator;
use crate::service::pipeline::PipelineRequest;

fn default_true() -> bool {
    true
}

/// Request body for `/api/ask`
#[derive(Debug, Deserialize, ToSchema)]
pub struct ChatRequest {
    /// User message/question
    pub message: String,
    /// Enable claim verification
    #[serde(default = "default_true")]
    pub enable_cva: bool,
    /// Existing conversation ID; a new conversation is created when absent
    pub conversation_id: Option<String>,
    /// Stream server-sent events instead of returning one JSON document
    #[serde(default = "default_true")]
    pub stream: bool,
}

/// Collected response for non-streaming requests
#[derive(Debug, Serialize, ToSchema)]
pub struct ChatResponse {
    pub response: String,
    pub conversation_id: String,
    pub message_id: String,
    pub sources: Vec<SourceCitation>,
    /// Only present when claim verification was enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<Vec<ClaimView>>,
    #[schema(value_type = Object)]
    pub metadata: Map<String, Value>,
}

/// Render one event as an SSE `data:` frame, tagging start and done with the conversation
fn sse_frame(event: &PipelineEvent, conversation_id: &str) -> web::Bytes {
    let mut value = serde_json::to_value(event).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "message": e.to_string(), "fallback": false })
    });
    if matches!(event, PipelineEvent::Start { .. } | PipelineEvent::Done) {
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "conversation_id".to_string(),
                Value::String(conversation_id.to_string()),
            );
        }
    }
    web::Bytes::from(format!("data: {}\n\n", value))
}

/// Fold a finished run's events into a single response
fn collect_response(
    events: Vec<PipelineEvent>,
    conversation_id: String,
    message_id: String,
    enable_cva: bool,
) -> ChatResponse {
    let mut response = String::new();
    let mut sources = Vec::new();
    let mut claims = Vec::new();
    let mut metadata = Map::new();

    for event in events {
        match event {
            PipelineEvent::Token { content } => response.push_str(&content),
            PipelineEvent::Sources { sources: s } => sources = s,
            PipelineEvent::Verification(report) => {
                claims = report.claims;
                metadata.insert(
                    "cva_summary".to_string(),
                    serde_json::to_value(&report.cva_summary).unwrap_or_default(),
                );
            }
            PipelineEvent::VerificationError { message } => {
                metadata.insert("cva_error".to_string(), Value::String(message));
            }
            PipelineEvent::Error { message, fallback } => {
                metadata.insert("error".to_string(), Value::String(message));
                metadata.insert("fallback".to_string(), Value::Bool(fallback));
            }
            PipelineEvent::Start { .. } | PipelineEvent::Done => {}
        }
    }

    ChatResponse {
        response,
        conversation_id,
        message_id,
        sources,
        claims: enable_cva.then_some(claims),
        metadata,
    }
}

/// Ask a question
///
/// Runs search, retrieval and generation, verifying claims in the background.
/// Streams `text/event-stream` frames unless `stream` is false.
#[utoipa::path(
    post,
    path = "/api/ask",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Answer stream (text/event-stream) or collected answer", body = ChatResponse),
        (status = 400, description = "Empty message", body = crate::api::error::ErrorResponse),
        (status = 404, description = "Conversation not found", body = crate::api::error::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::api::error::ErrorResponse)
    ),
    tag = "chat"
)]
#[post("/api/ask")]
pub async fn ask(
    coordinator: web::Data<PipelineCoordinator>,
    repository: web::Data<ConversationRepository>,
    body: web::Json<ChatRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = body.into_inner();
    let message = request.message.trim().to_string();
    if message.is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }

    let conversation_id = match request.conversation_id {
        Some(id) => {
            if !repository.exists(&id).await? {
                return Err(ApiError::ConversationNotFound(id));
            }
            id
        }
        None => repository.create(&message).await?.id,
    };

    repository
        .save_message(&conversation_id, MessageRole::User, &message)
        .await?;

    tracing::info!(
        conversation_id = %conversation_id,
        enable_cva = request.enable_cva,
        stream = request.stream,
        "Processing chat request"
    );

    let passage_limit = coordinator.config().default_passage_limit;
    let pipeline_request = PipelineRequest::new(message, passage_limit)
        .with_verification(request.enable_cva)
        .for_conversation(conversation_id.clone());
    let run = coordinator.process_chat(pipeline_request);

    if request.stream {
        let frames = run.map(move |event| {
            Ok::<_, std::convert::Infallible>(sse_frame(&event, &conversation_id))
        });
        return Ok(HttpResponse::Ok()
            .content_type("text/event-stream")
            .insert_header(("Cache-Control", "no-cache"))
            .insert_header(("X-Accel-Buffering", "no"))
            .streaming(frames));
    }

    let message_id = run.message_id().to_string();
    let events: Vec<PipelineEvent> = run.collect().await;
    Ok(HttpResponse::Ok().json(collect_response(
        events,
        conversation_id,
        message_id,
        request.enable_cva,
    )))
}

/// Configure chat routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(ask);
}
