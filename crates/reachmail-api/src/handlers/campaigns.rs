//! Campaign handlers

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use reachmail_core::CreateCampaignRequest;
use reachmail_storage::{
    CampaignRepository, DispatchRepository, DispatchStatusCounts, MailCampaign, MailDispatch,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::response::{created, ok, ApiEnvelope, ApiError};
use crate::AppState;

/// Request body for creating a campaign
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignBody {
    pub user_id: String,
    pub subject: String,
    pub body: String,
    pub recipient_emails: Vec<String>,
    pub start_time: String,
    pub delay_between_ms: Option<i64>,
    pub hourly_limit: Option<i64>,
}

/// Campaign response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subject: String,
    pub body: String,
    pub start_time: DateTime<Utc>,
    pub delay_between_ms: i64,
    pub hourly_limit: Option<i64>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<MailCampaign> for CampaignResponse {
    fn from(c: MailCampaign) -> Self {
        Self {
            id: c.id,
            user_id: c.user_id,
            subject: c.subject,
            body: c.body,
            start_time: c.start_time,
            delay_between_ms: c.delay_between_ms,
            hourly_limit: c.hourly_limit,
            status: c.status,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// Dispatch response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub recipient_email: String,
    pub subject: String,
    pub scheduled_time: DateTime<Utc>,
    pub sent_time: Option<DateTime<Utc>>,
    pub status: String,
    pub error_message: Option<String>,
    pub sender_email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<MailDispatch> for DispatchResponse {
    fn from(d: MailDispatch) -> Self {
        Self {
            id: d.id,
            campaign_id: d.campaign_id,
            recipient_email: d.recipient_email,
            subject: d.subject,
            scheduled_time: d.scheduled_time,
            sent_time: d.sent_time,
            status: d.status,
            error_message: d.error_message,
            sender_email: d.sender_email,
            created_at: d.created_at,
        }
    }
}

/// Response for campaign creation
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignResponse {
    pub campaign: CampaignResponse,
    pub dispatch_count: usize,
    pub total_emails: usize,
    pub failed: usize,
}

/// Campaign with its dispatch counts
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignListEntry {
    #[serde(flatten)]
    pub campaign: CampaignResponse,
    pub counts: DispatchStatusCounts,
}

/// Query parameters for user-scoped listings
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserScopedQuery {
    pub user_id: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

pub(crate) fn default_limit() -> i64 {
    50
}

pub(crate) fn parse_user_id(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::bad_request("userId must be a UUID")
            .with_details(serde_json::json!({ "field": "userId" }))
    })
}

fn parse_start_time(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| {
            ApiError::bad_request("startTime must be an ISO-8601 instant")
                .with_details(serde_json::json!({ "field": "startTime" }))
        })
}

/// Create a campaign and schedule its dispatches
///
/// POST /api/campaigns
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateCampaignBody>,
) -> Result<(StatusCode, Json<ApiEnvelope<CreateCampaignResponse>>), ApiError> {
    let user_id = parse_user_id(&body.user_id)?;
    let start_time = parse_start_time(&body.start_time)?;

    let receipt = state
        .scheduler
        .create_campaign(CreateCampaignRequest {
            user_id,
            subject: body.subject,
            body: body.body,
            recipient_emails: body.recipient_emails,
            start_time,
            delay_between_ms: body.delay_between_ms,
            hourly_limit: body.hourly_limit,
        })
        .await?;

    Ok(created(CreateCampaignResponse {
        campaign: receipt.campaign.into(),
        dispatch_count: receipt.dispatch_count,
        total_emails: receipt.total_emails,
        failed: receipt.failed,
    }))
}

/// List a user's campaigns with dispatch counts
///
/// GET /api/campaigns?userId=...
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserScopedQuery>,
) -> Result<Json<ApiEnvelope<Vec<CampaignListEntry>>>, ApiError> {
    let user_id = parse_user_id(&query.user_id)?;

    let campaigns = CampaignRepository::new(state.db_pool.pool().clone());
    let dispatches = DispatchRepository::new(state.db_pool.pool().clone());

    let rows = campaigns
        .list_by_user(user_id, None, query.limit, query.offset)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to list campaigns");
            ApiError::internal("Failed to list campaigns")
        })?;

    let mut entries = Vec::with_capacity(rows.len());
    for campaign in rows {
        let counts = dispatches.status_counts(campaign.id).await.map_err(|e| {
            error!(error = %e, "Failed to count dispatches");
            ApiError::internal("Failed to list campaigns")
        })?;
        entries.push(CampaignListEntry {
            campaign: campaign.into(),
            counts,
        });
    }

    Ok(ok(entries))
}

/// Pagination for campaign-scoped dispatch listings
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

/// List the dispatches of one campaign
///
/// GET /api/campaigns/:id/dispatches
pub async fn list_campaign_dispatches(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> Result<Json<ApiEnvelope<serde_json::Value>>, ApiError> {
    let campaigns = CampaignRepository::new(state.db_pool.pool().clone());
    let dispatches = DispatchRepository::new(state.db_pool.pool().clone());

    let campaign = campaigns
        .get(campaign_id)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to load campaign");
            ApiError::internal("Failed to list dispatches")
        })?
        .ok_or_else(|| ApiError::not_found("Campaign not found"))?;

    let rows = dispatches
        .list_by_campaign(campaign_id, page.limit, page.offset)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to list dispatches");
            ApiError::internal("Failed to list dispatches")
        })?;

    let counts = dispatches.status_counts(campaign_id).await.map_err(|e| {
        error!(error = %e, "Failed to count dispatches");
        ApiError::internal("Failed to list dispatches")
    })?;

    let campaign: CampaignResponse = campaign.into();
    let rows: Vec<DispatchResponse> = rows.into_iter().map(DispatchResponse::from).collect();

    Ok(ok(serde_json::json!({
        "campaign": campaign,
        "dispatches": rows,
        "counts": counts,
    })))
}
