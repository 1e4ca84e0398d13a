//! Health check endpoints for Kubernetes liveness and readiness checks

use std::time::Duration;

use actix_web::{HttpResponse, Responder, get, web};
use serde::Serialize;
use sqlx::PgPool;
use utoipa::ToSchema;

use crate::service::PipelineCoordinator;
use crate::service::pipeline::PipelineHealth;

/// Upper bound on the collaborator checks of one readiness request
const PIPELINE_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
}

#[derive(Serialize, ToSchema)]
pub struct ReadinessStatus {
    pub status: String,
    pub version: String,
    pub dependencies: DependencyHealth,
}

#[derive(Serialize, ToSchema)]
pub struct DependencyHealth {
    pub database: String,
    /// Absent when the checks did not finish in time
    pub pipeline: Option<PipelineHealth>,
}

/// Liveness endpoint
///
/// Always returns 200 OK if the service is running.
/// Used by Kubernetes to determine if the pod should be restarted.
#[utoipa::path(
    get,
    path = "/health/live",
    responses(
        (status = 200, description = "Service is alive", body = HealthStatus)
    ),
    tag = "health"
)]
#[get("/health/live")]
pub async fn liveness() -> impl Responder {
    HttpResponse::Ok().json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness endpoint
///
/// Returns 200 OK when the database answers and every pipeline collaborator
/// reports ready.
#[utoipa::path(
    get,
    path = "/health/ready",
    responses(
        (status = 200, description = "Service is ready", body = ReadinessStatus),
        (status = 503, description = "Service is not ready", body = ReadinessStatus)
    ),
    tag = "health"
)]
#[get("/health/ready")]
pub async fn readiness(
    db_pool: web::Data<PgPool>,
    coordinator: web::Data<PipelineCoordinator>,
) -> impl Responder {
    let (db_result, pipeline) = tokio::join!(
        crate::db::ping(db_pool.get_ref()),
        tokio::time::timeout(PIPELINE_CHECK_TIMEOUT, coordinator.health()),
    );

    let db_status = match db_result {
        Ok(()) => {
            tracing::debug!("Database health check passed");
            "healthy"
        }
        Err(e) => {
            tracing::error!(error = %e, "Database health check failed");
            "unhealthy"
        }
    };

    let pipeline = match pipeline {
        Ok(health) => {
            if !health.is_ready() {
                tracing::warn!(health = ?health, "Pipeline collaborators not ready");
            }
            Some(health)
        }
        Err(_) => {
            tracing::warn!(
                timeout_ms = PIPELINE_CHECK_TIMEOUT.as_millis(),
                "Pipeline health checks timed out"
            );
            None
        }
    };

    let all_healthy = db_status == "healthy" && pipeline.as_ref().is_some_and(|p| p.is_ready());

    let status = ReadinessStatus {
        status: if all_healthy { "ready" } else { "not_ready" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dependencies: DependencyHealth {
            database: db_status.to_string(),
            pipeline,
        },
    };

    if all_healthy {
        HttpResponse::Ok().json(status)
    } else {
        HttpResponse::ServiceUnavailable().json(status)
    }
}

/// Configure health check routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(liveness).service(readiness);
}
