//! OpenAPI specification endpoints

use actix_web::{HttpResponse, Responder, get};
use utoipa::OpenApi;

use crate::api::{chat, conversations, error, health};
use crate::model::events::{ClaimView, EvidenceReference, SourceCitation, VerificationSummary};
use crate::model::{Conversation, ConversationMessage, MessageRole};
use crate::service::pipeline::PipelineHealth;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "askflow",
        description = "Streaming web answers with background claim verification"
    ),
    paths(
        chat::ask,
        conversations::list_conversations,
        conversations::search_conversations,
        conversations::get_conversation,
        conversations::create_conversation,
        conversations::delete_conversation,
        health::liveness,
        health::readiness,
    ),
    components(schemas(
        chat::ChatRequest,
        chat::ChatResponse,
        SourceCitation,
        ClaimView,
        EvidenceReference,
        VerificationSummary,
        Conversation,
        ConversationMessage,
        MessageRole,
        conversations::ConversationListResponse,
        conversations::ConversationDetailResponse,
        conversations::MessagePagination,
        conversations::DeleteConversationResponse,
        health::HealthStatus,
        health::ReadinessStatus,
        health::DependencyHealth,
        PipelineHealth,
        error::ErrorResponse,
    )),
    tags(
        (name = "chat", description = "Question answering"),
        (name = "conversations", description = "Conversation history"),
        (name = "health", description = "Liveness and readiness checks")
    )
)]
pub struct ApiDoc;

/// Serve OpenAPI JSON specification
#[get("/openapi.json")]
pub async fn openapi_json() -> impl Responder {
    HttpResponse::Ok().json(ApiDoc::openapi())
}

/// Serve OpenAPI YAML specification
#[get("/openapi.yaml")]
pub async fn openapi_yaml() -> impl Responder {
    match ApiDoc::openapi().to_yaml() {
        Ok(yaml) => HttpResponse::Ok().content_type("text/yaml").body(yaml),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render OpenAPI YAML");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Configure OpenAPI routes
pub fn configure(cfg: &mut actix_web::web::ServiceConfig) {
    cfg.service(openapi_json).service(openapi_yaml);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_endpoints() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();

        assert!(paths.iter().any(|p| p.as_str() == "/api/ask"));
        assert!(paths.iter().any(|p| p.as_str() == "/api/conversations/{id}"));
        assert!(paths.iter().any(|p| p.as_str() == "/health/ready"));
    }
}
