//! Dispatch listing handlers

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use reachmail_common::types::DispatchStatus;
use reachmail_storage::DispatchRepository;
use tracing::error;

use super::campaigns::{parse_user_id, DispatchResponse, UserScopedQuery};
use crate::response::{ok, ApiEnvelope, ApiError};
use crate::AppState;

/// Statuses shown by the scheduled view: still waiting for a send
const SCHEDULED_STATUSES: &[DispatchStatus] = &[
    DispatchStatus::Pending,
    DispatchStatus::Scheduled,
    DispatchStatus::RateLimited,
];

/// Statuses shown by the sent view: the send already happened or gave up
const SENT_STATUSES: &[DispatchStatus] = &[DispatchStatus::Sent, DispatchStatus::Failed];

async fn list_with_statuses(
    state: &AppState,
    query: &UserScopedQuery,
    statuses: &[DispatchStatus],
) -> Result<Json<ApiEnvelope<Vec<DispatchResponse>>>, ApiError> {
    let user_id = parse_user_id(&query.user_id)?;

    let repo = DispatchRepository::new(state.db_pool.pool().clone());
    let rows = repo
        .list_by_user_with_statuses(user_id, statuses, query.limit, query.offset)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to list dispatches");
            ApiError::internal("Failed to list dispatches")
        })?;

    Ok(ok(rows.into_iter().map(DispatchResponse::from).collect()))
}

/// List a user's upcoming dispatches
///
/// GET /api/dispatches/scheduled?userId=...
pub async fn list_scheduled(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserScopedQuery>,
) -> Result<Json<ApiEnvelope<Vec<DispatchResponse>>>, ApiError> {
    list_with_statuses(&state, &query, SCHEDULED_STATUSES).await
}

/// List a user's settled dispatches
///
/// GET /api/dispatches/sent?userId=...
pub async fn list_sent(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserScopedQuery>,
) -> Result<Json<ApiEnvelope<Vec<DispatchResponse>>>, ApiError> {
    list_with_statuses(&state, &query, SENT_STATUSES).await
}
