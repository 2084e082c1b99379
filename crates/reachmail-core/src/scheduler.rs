//! Campaign scheduler - ingress
//!
//! Turns one campaign request into one dispatch row and one delayed task
//! per recipient. Recipients are iterated one by one on purpose: the
//! `(campaign_id, recipient_email)` uniqueness constraint is the
//! authoritative dedup mechanism, and a per-row violation must not abort
//! the rest of the batch.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use reachmail_common::types::{is_valid_recipient, CampaignStatus};
use reachmail_storage::{
    CampaignRepository, CreateCampaign, CreateDispatch, DatabasePool, DispatchInsert,
    DispatchRepository, MailCampaign,
};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::queue::{TaskPayload, TaskQueue};

/// Accepted clock skew on start times
const START_TIME_SKEW_SECS: i64 = 60;

/// Maximum subject length in characters
const MAX_SUBJECT_CHARS: usize = 500;

/// Scheduler errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("{field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("No new dispatches")]
    NoNewDispatches,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Queue error: {0}")]
    Queue(String),
}

fn invalid(field: &'static str, message: impl Into<String>) -> ScheduleError {
    ScheduleError::Validation {
        field,
        message: message.into(),
    }
}

/// Campaign creation request
#[derive(Debug, Clone)]
pub struct CreateCampaignRequest {
    pub user_id: Uuid,
    pub subject: String,
    pub body: String,
    pub recipient_emails: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub delay_between_ms: Option<i64>,
    pub hourly_limit: Option<i64>,
}

/// What the ingress hands back to the caller
#[derive(Debug)]
pub struct CampaignReceipt {
    pub campaign: MailCampaign,
    /// Dispatches created and enqueued
    pub dispatch_count: usize,
    /// Unique recipients after dedup
    pub total_emails: usize,
    /// Recipients skipped on the uniqueness constraint
    pub failed: usize,
}

/// Defaults applied when the request leaves fields unset
#[derive(Debug, Clone)]
pub struct SchedulerDefaults {
    pub delay_between_ms: i64,
    pub hourly_limit: i64,
}

/// Campaign scheduler
pub struct CampaignScheduler {
    campaigns: CampaignRepository,
    dispatches: DispatchRepository,
    queue: Arc<dyn TaskQueue>,
    defaults: SchedulerDefaults,
}

impl CampaignScheduler {
    pub fn new(db: &DatabasePool, queue: Arc<dyn TaskQueue>, defaults: SchedulerDefaults) -> Self {
        let pool = db.pool().clone();
        Self {
            campaigns: CampaignRepository::new(pool.clone()),
            dispatches: DispatchRepository::new(pool),
            queue,
            defaults,
        }
    }

    /// Create a campaign and enqueue one delayed task per recipient
    pub async fn create_campaign(
        &self,
        req: CreateCampaignRequest,
    ) -> Result<CampaignReceipt, ScheduleError> {
        let now = Utc::now();
        validate_request(&req, now)?;

        let recipients = dedup_recipients(&req.recipient_emails);
        let delay_between_ms = req.delay_between_ms.unwrap_or(self.defaults.delay_between_ms);
        let hourly_limit = req.hourly_limit.unwrap_or(self.defaults.hourly_limit);

        let mut campaign = self
            .campaigns
            .create(CreateCampaign {
                user_id: req.user_id,
                subject: req.subject.clone(),
                body: req.body.clone(),
                start_time: req.start_time,
                delay_between_ms,
                hourly_limit: Some(hourly_limit),
            })
            .await?;

        let base_delay = base_delay(req.start_time, now);

        let mut created = 0usize;
        let mut skipped = 0usize;

        for (index, recipient) in recipients.iter().enumerate() {
            let delay = dispatch_delay(base_delay, index, delay_between_ms);
            let scheduled_at = now + delay;

            let insert = self
                .dispatches
                .create(CreateDispatch {
                    campaign_id: campaign.id,
                    recipient_email: recipient.clone(),
                    subject: req.subject.clone(),
                    body: req.body.clone(),
                    scheduled_time: scheduled_at,
                })
                .await?;

            match insert {
                DispatchInsert::Created(dispatch) => {
                    let payload = TaskPayload {
                        dispatch_id: dispatch.id,
                        campaign_id: campaign.id,
                        recipient_email: recipient.clone(),
                        subject: req.subject.clone(),
                        body: req.body.clone(),
                        scheduled_at,
                        sender_id: None,
                    };

                    self.queue
                        .enqueue(&payload, delay.to_std().unwrap_or_default())
                        .await
                        .map_err(|e| ScheduleError::Queue(e.to_string()))?;

                    created += 1;
                    if created == 1 {
                        // In progress from the first enqueued dispatch
                        if let Some(updated) = self
                            .campaigns
                            .update_status(campaign.id, CampaignStatus::InProgress)
                            .await?
                        {
                            campaign = updated;
                        }
                    }
                }
                DispatchInsert::Duplicate => {
                    warn!(
                        campaign_id = %campaign.id,
                        recipient = %recipient,
                        "Skipping recipient already dispatched for this campaign"
                    );
                    skipped += 1;
                }
            }
        }

        if created == 0 {
            return Err(ScheduleError::NoNewDispatches);
        }

        info!(
            campaign_id = %campaign.id,
            created,
            skipped,
            start_time = %req.start_time,
            "Campaign scheduled"
        );

        Ok(CampaignReceipt {
            campaign,
            dispatch_count: created,
            total_emails: recipients.len(),
            failed: skipped,
        })
    }
}

fn validate_request(req: &CreateCampaignRequest, now: DateTime<Utc>) -> Result<(), ScheduleError> {
    if req.subject.trim().is_empty() {
        return Err(invalid("subject", "Subject is required"));
    }
    if req.subject.chars().count() > MAX_SUBJECT_CHARS {
        return Err(invalid(
            "subject",
            format!("Subject must be at most {} characters", MAX_SUBJECT_CHARS),
        ));
    }
    if req.body.trim().is_empty() {
        return Err(invalid("body", "Body is required"));
    }
    if req.recipient_emails.is_empty() {
        return Err(invalid("recipientEmails", "At least one recipient is required"));
    }
    for recipient in &req.recipient_emails {
        if !is_valid_recipient(recipient) {
            return Err(invalid(
                "recipientEmails",
                format!("Invalid recipient email: {}", recipient),
            ));
        }
    }
    if req.start_time < now - Duration::seconds(START_TIME_SKEW_SECS) {
        return Err(invalid("startTime", "Start time cannot be in the past"));
    }
    if let Some(delay) = req.delay_between_ms {
        if delay < 0 {
            return Err(invalid("delayBetweenMs", "delayBetweenMs must be >= 0"));
        }
    }
    if let Some(limit) = req.hourly_limit {
        if limit < 1 {
            return Err(invalid("hourlyLimit", "hourlyLimit must be >= 1"));
        }
    }
    Ok(())
}

/// Dedup as a set, preserving first-seen order
fn dedup_recipients(recipients: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    recipients
        .iter()
        .filter(|r| seen.insert(r.as_str()))
        .cloned()
        .collect()
}

/// Delay until the campaign start, floored at zero
fn base_delay(start_time: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (start_time - now).max(Duration::zero())
}

/// Delay for the i-th recipient: base plus i spacings
fn dispatch_delay(base: Duration, index: usize, delay_between_ms: i64) -> Duration {
    base + Duration::milliseconds(index as i64 * delay_between_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(recipients: &[&str], start_offset_secs: i64) -> CreateCampaignRequest {
        CreateCampaignRequest {
            user_id: Uuid::new_v4(),
            subject: "Launch".to_string(),
            body: "Hello there".to_string(),
            recipient_emails: recipients.iter().map(|r| r.to_string()).collect(),
            start_time: Utc::now() + Duration::seconds(start_offset_secs),
            delay_between_ms: Some(2000),
            hourly_limit: None,
        }
    }

    #[test]
    fn accepts_valid_request() {
        let req = request(&["a@x.io", "b@x.io"], 60);
        assert!(validate_request(&req, Utc::now()).is_ok());
    }

    #[test]
    fn rejects_stale_start_time() {
        let req = request(&["a@x.io"], -120);
        let err = validate_request(&req, Utc::now()).unwrap_err();
        assert!(matches!(err, ScheduleError::Validation { field: "startTime", .. }));
    }

    #[test]
    fn tolerates_clock_skew() {
        // 30 s in the past is within the skew allowance
        let req = request(&["a@x.io"], -30);
        assert!(validate_request(&req, Utc::now()).is_ok());
    }

    #[test]
    fn rejects_bad_recipient() {
        let req = request(&["a@x.io", "not-an-email"], 60);
        let err = validate_request(&req, Utc::now()).unwrap_err();
        assert!(matches!(err, ScheduleError::Validation { field: "recipientEmails", .. }));
    }

    #[test]
    fn rejects_empty_subject_and_body() {
        let mut req = request(&["a@x.io"], 60);
        req.subject = "  ".to_string();
        assert!(validate_request(&req, Utc::now()).is_err());

        let mut req = request(&["a@x.io"], 60);
        req.body = String::new();
        assert!(validate_request(&req, Utc::now()).is_err());
    }

    #[test]
    fn rejects_oversized_subject() {
        let mut req = request(&["a@x.io"], 60);
        req.subject = "x".repeat(501);
        assert!(matches!(
            validate_request(&req, Utc::now()).unwrap_err(),
            ScheduleError::Validation { field: "subject", .. }
        ));
    }

    #[test]
    fn rejects_negative_knobs() {
        let mut req = request(&["a@x.io"], 60);
        req.delay_between_ms = Some(-1);
        assert!(validate_request(&req, Utc::now()).is_err());

        let mut req = request(&["a@x.io"], 60);
        req.hourly_limit = Some(0);
        assert!(validate_request(&req, Utc::now()).is_err());
    }

    #[test]
    fn dedup_preserves_first_seen_order() {
        let recipients = vec![
            "a@x.io".to_string(),
            "b@x.io".to_string(),
            "a@x.io".to_string(),
            "c@x.io".to_string(),
            "b@x.io".to_string(),
        ];
        assert_eq!(dedup_recipients(&recipients), vec!["a@x.io", "b@x.io", "c@x.io"]);
    }

    #[test]
    fn base_delay_floors_at_zero() {
        let now = Utc::now();
        assert_eq!(base_delay(now - Duration::seconds(30), now), Duration::zero());
        assert_eq!(
            base_delay(now + Duration::seconds(60), now),
            Duration::seconds(60)
        );
    }

    #[test]
    fn dispatch_delays_step_by_spacing() {
        let base = Duration::seconds(60);
        assert_eq!(dispatch_delay(base, 0, 2000), Duration::seconds(60));
        assert_eq!(
            dispatch_delay(base, 1, 2000),
            Duration::seconds(60) + Duration::milliseconds(2000)
        );
        assert_eq!(
            dispatch_delay(base, 5, 2000),
            Duration::seconds(60) + Duration::milliseconds(10_000)
        );
    }
}
