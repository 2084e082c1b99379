//! Dispatch store port used by the delivery worker
//!
//! The worker owns the dispatch rows it reserved tasks for and nothing
//! else; this port exposes exactly the transitions the state machine
//! performs plus the sender-account lookup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reachmail_common::types::DispatchStatus;
use reachmail_common::{Error, Result};
use reachmail_storage::{
    CampaignRepository, DatabasePool, DispatchRepository, SenderAccountRepository,
};
use uuid::Uuid;

/// The dispatch fields the worker's state machine reads
#[derive(Debug, Clone)]
pub struct DispatchRecord {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub recipient_email: String,
    pub status: DispatchStatus,
}

/// An active sender account reference
#[derive(Debug, Clone)]
pub struct SenderRef {
    pub id: Uuid,
    pub email: String,
}

/// Persistence seam for the worker's dispatch transitions
#[async_trait]
pub trait DispatchStore: Send + Sync {
    async fn load(&self, id: Uuid) -> Result<Option<DispatchRecord>>;

    async fn mark_sending(&self, id: Uuid) -> Result<()>;

    async fn mark_sent(&self, id: Uuid, message_id: &str) -> Result<()>;

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()>;

    async fn mark_rate_limited(&self, id: Uuid, resume_at: DateTime<Utc>) -> Result<()>;

    /// One of the active sender accounts, chosen at send time
    async fn active_sender(&self) -> Result<Option<SenderRef>>;

    /// Mark the campaign completed once no open dispatches remain.
    /// Returns true when the transition happened.
    async fn settle_campaign(&self, campaign_id: Uuid) -> Result<bool>;
}

/// Postgres-backed dispatch store
#[derive(Clone)]
pub struct PgDispatchStore {
    dispatches: DispatchRepository,
    campaigns: CampaignRepository,
    senders: SenderAccountRepository,
}

impl PgDispatchStore {
    pub fn new(db: &DatabasePool) -> Self {
        let pool = db.pool().clone();
        Self {
            dispatches: DispatchRepository::new(pool.clone()),
            campaigns: CampaignRepository::new(pool.clone()),
            senders: SenderAccountRepository::new(pool),
        }
    }
}

#[async_trait]
impl DispatchStore for PgDispatchStore {
    async fn load(&self, id: Uuid) -> Result<Option<DispatchRecord>> {
        let Some(row) = self.dispatches.get(id).await.map_err(db_err)? else {
            return Ok(None);
        };

        Ok(Some(DispatchRecord {
            id: row.id,
            campaign_id: row.campaign_id,
            recipient_email: row.recipient_email,
            status: row.status.parse()?,
        }))
    }

    async fn mark_sending(&self, id: Uuid) -> Result<()> {
        self.dispatches.mark_sending(id).await.map_err(db_err)?;
        Ok(())
    }

    async fn mark_sent(&self, id: Uuid, message_id: &str) -> Result<()> {
        self.dispatches.mark_sent(id, message_id).await.map_err(db_err)
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()> {
        self.dispatches.mark_failed(id, error).await.map_err(db_err)
    }

    async fn mark_rate_limited(&self, id: Uuid, resume_at: DateTime<Utc>) -> Result<()> {
        self.dispatches
            .mark_rate_limited(id, resume_at)
            .await
            .map_err(db_err)
    }

    async fn active_sender(&self) -> Result<Option<SenderRef>> {
        let account = self.senders.first_active().await.map_err(db_err)?;
        Ok(account.map(|a| SenderRef {
            id: a.id,
            email: a.email,
        }))
    }

    async fn settle_campaign(&self, campaign_id: Uuid) -> Result<bool> {
        let open = self
            .dispatches
            .count_open_by_campaign(campaign_id)
            .await
            .map_err(db_err)?;
        if open > 0 {
            return Ok(false);
        }
        self.campaigns.mark_completed(campaign_id).await.map_err(db_err)
    }
}

fn db_err(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}
