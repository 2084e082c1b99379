//! Dispatch repository
//!
//! `(campaign_id, recipient_email)` is unique; the constraint is the
//! authoritative recipient dedup mechanism, so `create` reports duplicate
//! violations as a distinct outcome instead of an error.

use chrono::{DateTime, Utc};
use reachmail_common::types::{DispatchStatus, UserId};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{CreateDispatch, DispatchStatusCounts, MailDispatch};

/// Outcome of a dispatch insert
#[derive(Debug)]
pub enum DispatchInsert {
    Created(MailDispatch),
    /// The `(campaign_id, recipient_email)` pair already exists
    Duplicate,
}

/// Dispatch repository
#[derive(Clone)]
pub struct DispatchRepository {
    pool: PgPool,
}

impl DispatchRepository {
    /// Create a new dispatch repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a dispatch in the scheduled state
    pub async fn create(&self, input: CreateDispatch) -> Result<DispatchInsert, sqlx::Error> {
        let id = Uuid::new_v4();

        let result = sqlx::query_as::<_, MailDispatch>(
            r#"
            INSERT INTO mail_dispatches (
                id, campaign_id, recipient_email, subject, body,
                scheduled_time, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'scheduled')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.campaign_id)
        .bind(&input.recipient_email)
        .bind(&input.subject)
        .bind(&input.body)
        .bind(input.scheduled_time)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(dispatch) => Ok(DispatchInsert::Created(dispatch)),
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
                Ok(DispatchInsert::Duplicate)
            }
            Err(e) => Err(e),
        }
    }

    /// Get a dispatch by ID
    pub async fn get(&self, id: Uuid) -> Result<Option<MailDispatch>, sqlx::Error> {
        sqlx::query_as::<_, MailDispatch>("SELECT * FROM mail_dispatches WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// List dispatches for a campaign in scheduled order
    pub async fn list_by_campaign(
        &self,
        campaign_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MailDispatch>, sqlx::Error> {
        sqlx::query_as::<_, MailDispatch>(
            r#"
            SELECT * FROM mail_dispatches
            WHERE campaign_id = $1
            ORDER BY scheduled_time ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(campaign_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    /// List a user's dispatches filtered to a status set
    pub async fn list_by_user_with_statuses(
        &self,
        user_id: UserId,
        statuses: &[DispatchStatus],
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MailDispatch>, sqlx::Error> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();

        sqlx::query_as::<_, MailDispatch>(
            r#"
            SELECT d.* FROM mail_dispatches d
            JOIN mail_campaigns c ON c.id = d.campaign_id
            WHERE c.user_id = $1 AND d.status = ANY($2)
            ORDER BY d.scheduled_time ASC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(&statuses)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    /// Mark a dispatch as sending unless it already reached a terminal state
    pub async fn mark_sending(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE mail_dispatches SET
                status = 'sending',
                updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('sent', 'failed')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark a dispatch as sent, recording the transport message id
    pub async fn mark_sent(&self, id: Uuid, message_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE mail_dispatches SET
                status = 'sent',
                sent_time = NOW(),
                sender_email = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mark a dispatch as failed with the transport error
    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE mail_dispatches SET
                status = 'failed',
                error_message = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Park a dispatch until the next rate-limit window opens
    pub async fn mark_rate_limited(
        &self,
        id: Uuid,
        resume_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE mail_dispatches SET
                status = 'rate_limited',
                scheduled_time = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(resume_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Count dispatches that still have work ahead of them
    pub async fn count_open_by_campaign(&self, campaign_id: Uuid) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM mail_dispatches
            WHERE campaign_id = $1
              AND status IN ('pending', 'scheduled', 'sending', 'rate_limited')
            "#,
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0)
    }

    /// Get count by status for a campaign
    pub async fn status_counts(
        &self,
        campaign_id: Uuid,
    ) -> Result<DispatchStatusCounts, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') as pending,
                COUNT(*) FILTER (WHERE status = 'scheduled') as scheduled,
                COUNT(*) FILTER (WHERE status = 'sending') as sending,
                COUNT(*) FILTER (WHERE status = 'sent') as sent,
                COUNT(*) FILTER (WHERE status = 'failed') as failed,
                COUNT(*) FILTER (WHERE status = 'rate_limited') as rate_limited
            FROM mail_dispatches
            WHERE campaign_id = $1
            "#,
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(DispatchStatusCounts {
            pending: row.get::<Option<i64>, _>("pending").unwrap_or(0),
            scheduled: row.get::<Option<i64>, _>("scheduled").unwrap_or(0),
            sending: row.get::<Option<i64>, _>("sending").unwrap_or(0),
            sent: row.get::<Option<i64>, _>("sent").unwrap_or(0),
            failed: row.get::<Option<i64>, _>("failed").unwrap_or(0),
            rate_limited: row.get::<Option<i64>, _>("rate_limited").unwrap_or(0),
        })
    }
}
