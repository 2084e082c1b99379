//! Health and status handlers

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use reachmail_core::QueueMetrics;
use serde::Serialize;
use tracing::error;

use crate::response::{ok, ApiEnvelope, ApiError};
use crate::AppState;

/// Liveness response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// System status: store probe plus queue depth
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub database: ComponentStatus,
    pub queue: QueueMetrics,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub status: &'static str,
}

/// Liveness probe
///
/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
    })
}

/// Store health plus queue metrics
///
/// GET /api/status
pub async fn system_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiEnvelope<StatusResponse>>, ApiError> {
    let database = match state.db_pool.health_check().await {
        Ok(()) => ComponentStatus { status: "healthy" },
        Err(e) => {
            error!(error = %e, "Database health probe failed");
            ComponentStatus {
                status: "unhealthy",
            }
        }
    };

    let queue = state.queue.metrics().await.map_err(|e| {
        error!(error = %e, "Failed to read queue metrics");
        ApiError::internal("Failed to read queue metrics")
    })?;

    Ok(ok(StatusResponse {
        database,
        queue,
        timestamp: Utc::now(),
    }))
}
