//! Database models

use chrono::{DateTime, Utc};
use reachmail_common::types::{CampaignId, DispatchId, SenderAccountId, UserId};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub google_id: String,
    pub email: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Campaign model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MailCampaign {
    pub id: CampaignId,
    pub user_id: UserId,
    pub subject: String,
    pub body: String,
    pub start_time: DateTime<Utc>,
    pub delay_between_ms: i64,
    /// Per-sender hourly ceiling override; None falls back to configuration
    pub hourly_limit: Option<i64>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Dispatch model - one email to one recipient within one campaign
///
/// Subject and body are denormalized snapshots so in-flight tasks are
/// immune to later campaign edits.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MailDispatch {
    pub id: DispatchId,
    pub campaign_id: CampaignId,
    pub recipient_email: String,
    pub subject: String,
    pub body: String,
    pub scheduled_time: DateTime<Utc>,
    pub sent_time: Option<DateTime<Utc>>,
    pub status: String,
    pub error_message: Option<String>,
    /// Transport message id recorded after acceptance
    pub sender_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sender account model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SenderAccount {
    pub id: SenderAccountId,
    pub email: String,
    pub password: String,
    pub smtp_host: String,
    pub smtp_port: i32,
    pub is_active: bool,
}

/// Create campaign input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaign {
    pub user_id: UserId,
    pub subject: String,
    pub body: String,
    pub start_time: DateTime<Utc>,
    pub delay_between_ms: i64,
    pub hourly_limit: Option<i64>,
}

/// Create dispatch input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDispatch {
    pub campaign_id: CampaignId,
    pub recipient_email: String,
    pub subject: String,
    pub body: String,
    pub scheduled_time: DateTime<Utc>,
}

/// Dispatch counts by status for a campaign
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchStatusCounts {
    pub pending: i64,
    pub scheduled: i64,
    pub sending: i64,
    pub sent: i64,
    pub failed: i64,
    pub rate_limited: i64,
}

impl DispatchStatusCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.scheduled + self.sending + self.sent + self.failed + self.rate_limited
    }

    /// Dispatches that still have work ahead of them
    pub fn open(&self) -> i64 {
        self.pending + self.scheduled + self.sending + self.rate_limited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_counts_open() {
        let counts = DispatchStatusCounts {
            pending: 1,
            scheduled: 2,
            sending: 1,
            sent: 5,
            failed: 1,
            rate_limited: 3,
        };
        assert_eq!(counts.total(), 13);
        assert_eq!(counts.open(), 7);
    }
}
