//! Campaign repository

use reachmail_common::types::{CampaignStatus, UserId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{CreateCampaign, MailCampaign};

/// Campaign repository
#[derive(Clone)]
pub struct CampaignRepository {
    pool: PgPool,
}

impl CampaignRepository {
    /// Create a new campaign repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new campaign in the scheduled state
    pub async fn create(&self, input: CreateCampaign) -> Result<MailCampaign, sqlx::Error> {
        let id = Uuid::new_v4();

        sqlx::query_as::<_, MailCampaign>(
            r#"
            INSERT INTO mail_campaigns (
                id, user_id, subject, body, start_time, delay_between_ms,
                hourly_limit, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'scheduled')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.user_id)
        .bind(&input.subject)
        .bind(&input.body)
        .bind(input.start_time)
        .bind(input.delay_between_ms)
        .bind(input.hourly_limit)
        .fetch_one(&self.pool)
        .await
    }

    /// Get a campaign by ID
    pub async fn get(&self, id: Uuid) -> Result<Option<MailCampaign>, sqlx::Error> {
        sqlx::query_as::<_, MailCampaign>("SELECT * FROM mail_campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// List campaigns for a user, newest first
    pub async fn list_by_user(
        &self,
        user_id: UserId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MailCampaign>, sqlx::Error> {
        if let Some(status) = status {
            sqlx::query_as::<_, MailCampaign>(
                r#"
                SELECT * FROM mail_campaigns
                WHERE user_id = $1 AND status = $2
                ORDER BY created_at DESC
                LIMIT $3 OFFSET $4
                "#,
            )
            .bind(user_id)
            .bind(status.to_string())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, MailCampaign>(
                r#"
                SELECT * FROM mail_campaigns
                WHERE user_id = $1
                ORDER BY created_at DESC
                LIMIT $2 OFFSET $3
                "#,
            )
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        }
    }

    /// Update campaign status
    pub async fn update_status(
        &self,
        id: Uuid,
        status: CampaignStatus,
    ) -> Result<Option<MailCampaign>, sqlx::Error> {
        sqlx::query_as::<_, MailCampaign>(
            r#"
            UPDATE mail_campaigns SET
                status = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .fetch_optional(&self.pool)
        .await
    }

    /// Mark an in-progress campaign completed if it still is in progress
    pub async fn mark_completed(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE mail_campaigns SET
                status = 'completed',
                updated_at = NOW()
            WHERE id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
