//! Sender account repository

use sqlx::PgPool;

use crate::models::SenderAccount;

/// Sender account repository
#[derive(Clone)]
pub struct SenderAccountRepository {
    pool: PgPool,
}

impl SenderAccountRepository {
    /// Create a new sender account repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Pick one active sender account, oldest first for stability
    pub async fn first_active(&self) -> Result<Option<SenderAccount>, sqlx::Error> {
        sqlx::query_as::<_, SenderAccount>(
            r#"
            SELECT * FROM sender_accounts
            WHERE is_active = TRUE
            ORDER BY id
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
    }
}
