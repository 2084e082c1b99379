//! Rate limiter - hour-bucketed admission control
//!
//! Counters live in the key-value store under
//! `reachSessionLimit:<scope>:YYYY-MM-DD-HH` (UTC). Admission atomically
//! increments the global counter, then the sender counter when a sender is
//! supplied; a rejection decrements what it incremented so a refused send
//! never charges the budget. Buckets expire one hour after first write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use redis::aio::ConnectionManager;
use reachmail_common::{Error, Result};
use tracing::debug;

/// Key prefix for rate counters
pub const COUNTER_PREFIX: &str = "reachSessionLimit";

/// Scope for the global counter
pub const GLOBAL_SCOPE: &str = "global";

/// Bucket TTL, set on the first write of each hour
const COUNTER_TTL_SECS: i64 = 3600;

/// Format the UTC hour bucket used as the counter key suffix
pub fn hour_bucket(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d-%H").to_string()
}

/// Counter key for a scope within the hour containing `at`
pub fn counter_key(scope: &str, at: DateTime<Utc>) -> String {
    format!("{}:{}:{}", COUNTER_PREFIX, scope, hour_bucket(at))
}

/// Start of the UTC hour following `at`
pub fn next_hour(at: DateTime<Utc>) -> DateTime<Utc> {
    let floored = at
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at);
    floored + Duration::hours(1)
}

/// Atomic counter operations backing the limiter
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment, arming the bucket TTL on first write; returns the new value
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Compensating decrement; returns the new value
    async fn decr(&self, key: &str) -> Result<i64>;

    /// Read the current value (0 when absent)
    async fn get(&self, key: &str) -> Result<i64>;
}

/// Redis-backed counter store
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
}

impl RedisCounterStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(kv_err)?;

        if value == 1 {
            redis::cmd("EXPIRE")
                .arg(key)
                .arg(COUNTER_TTL_SECS)
                .query_async::<_, i64>(&mut conn)
                .await
                .map_err(kv_err)?;
        }

        Ok(value)
    }

    async fn decr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        redis::cmd("DECR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(kv_err)
    }

    async fn get(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(kv_err)?;
        Ok(value.unwrap_or(0))
    }
}

fn kv_err(e: redis::RedisError) -> Error {
    Error::Kv(e.to_string())
}

/// In-memory counter store
///
/// Used by tests and single-process deployments; the TTL is irrelevant
/// there because each hour writes a fresh bucket key.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, i64>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str) -> Result<i64> {
        let mut counters = self.counters.lock().expect("counter lock poisoned");
        let value = counters.entry(key.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn decr(&self, key: &str) -> Result<i64> {
        let mut counters = self.counters.lock().expect("counter lock poisoned");
        let value = counters.entry(key.to_string()).or_insert(0);
        *value -= 1;
        Ok(*value)
    }

    async fn get(&self, key: &str) -> Result<i64> {
        let counters = self.counters.lock().expect("counter lock poisoned");
        Ok(counters.get(key).copied().unwrap_or(0))
    }
}

/// Result of an admission attempt
#[derive(Debug, Clone)]
pub struct Admission {
    pub allowed: bool,
    /// Slots left under the tightest applicable ceiling, never negative
    pub remaining: i64,
    /// Start of the next hour window
    pub reset_at: DateTime<Utc>,
}

/// Read-only counter snapshot for observability
#[derive(Debug, Clone)]
pub struct RateSnapshot {
    pub global_count: i64,
    pub global_ceiling: i64,
    pub sender_count: Option<i64>,
    pub sender_ceiling: Option<i64>,
}

/// Hour-bucketed rate limiter
///
/// This is the single place that rejects sends; the task queue has no rate
/// limiting of its own.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    global_ceiling: i64,
    sender_ceiling: i64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, global_ceiling: i64, sender_ceiling: i64) -> Self {
        Self {
            store,
            global_ceiling,
            sender_ceiling,
        }
    }

    /// Try to claim one send slot in the current hour window.
    ///
    /// A refusal has already undone its increments when it returns, in
    /// rollback order sender first, then global.
    pub async fn try_admit(&self, sender_id: Option<&str>) -> Result<Admission> {
        let now = Utc::now();
        let reset_at = next_hour(now);

        let global_key = counter_key(GLOBAL_SCOPE, now);
        let global = self.store.incr(&global_key).await?;
        if global > self.global_ceiling {
            self.store.decr(&global_key).await?;
            debug!(count = global, ceiling = self.global_ceiling, "Global hourly ceiling reached");
            return Ok(Admission {
                allowed: false,
                remaining: 0,
                reset_at,
            });
        }

        let mut remaining = (self.global_ceiling - global).max(0);

        if let Some(sender) = sender_id {
            let sender_key = counter_key(sender, now);
            let count = self.store.incr(&sender_key).await?;
            if count > self.sender_ceiling {
                self.store.decr(&sender_key).await?;
                self.store.decr(&global_key).await?;
                debug!(sender, count, ceiling = self.sender_ceiling, "Sender hourly ceiling reached");
                return Ok(Admission {
                    allowed: false,
                    remaining: 0,
                    reset_at,
                });
            }
            remaining = remaining.min((self.sender_ceiling - count).max(0));
        }

        Ok(Admission {
            allowed: true,
            remaining,
            reset_at,
        })
    }

    /// Read current counts without mutating anything
    pub async fn inspect(&self, sender_id: Option<&str>) -> Result<RateSnapshot> {
        let now = Utc::now();
        let global_count = self.store.get(&counter_key(GLOBAL_SCOPE, now)).await?;

        let (sender_count, sender_ceiling) = match sender_id {
            Some(sender) => (
                Some(self.store.get(&counter_key(sender, now)).await?),
                Some(self.sender_ceiling),
            ),
            None => (None, None),
        };

        Ok(RateSnapshot {
            global_count,
            global_ceiling: self.global_ceiling,
            sender_count,
            sender_ceiling,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn hour_bucket_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 14, 59, 59).unwrap();
        assert_eq!(hour_bucket(at), "2024-03-07-14");
        assert_eq!(
            counter_key(GLOBAL_SCOPE, at),
            "reachSessionLimit:global:2024-03-07-14"
        );
        assert_eq!(
            counter_key("sender-1", at),
            "reachSessionLimit:sender-1:2024-03-07-14"
        );
    }

    #[test]
    fn next_hour_rolls_over_midnight() {
        let at = Utc.with_ymd_and_hms(2024, 12, 31, 23, 12, 40).unwrap();
        assert_eq!(next_hour(at), Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());

        let mid = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        assert_eq!(next_hour(mid), Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn admits_under_ceiling() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), 3, 2);

        let first = limiter.try_admit(None).await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.remaining, 2);

        let second = limiter.try_admit(None).await.unwrap();
        assert!(second.allowed);
        assert_eq!(second.remaining, 1);
    }

    #[tokio::test]
    async fn rejects_and_rolls_back_global() {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = RateLimiter::new(store.clone(), 2, 2);

        assert!(limiter.try_admit(None).await.unwrap().allowed);
        assert!(limiter.try_admit(None).await.unwrap().allowed);

        let rejected = limiter.try_admit(None).await.unwrap();
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);

        // The refused increment was undone, so the bucket still holds
        // exactly the granted sends.
        let snapshot = limiter.inspect(None).await.unwrap();
        assert_eq!(snapshot.global_count, 2);
    }

    #[tokio::test]
    async fn sender_rejection_rolls_back_both_counters() {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = RateLimiter::new(store.clone(), 10, 1);

        assert!(limiter.try_admit(Some("acct-1")).await.unwrap().allowed);

        let rejected = limiter.try_admit(Some("acct-1")).await.unwrap();
        assert!(!rejected.allowed);

        let snapshot = limiter.inspect(Some("acct-1")).await.unwrap();
        assert_eq!(snapshot.global_count, 1);
        assert_eq!(snapshot.sender_count, Some(1));
    }

    #[tokio::test]
    async fn remaining_is_tightest_ceiling() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), 100, 2);

        let admission = limiter.try_admit(Some("acct-1")).await.unwrap();
        assert!(admission.allowed);
        assert_eq!(admission.remaining, 1);
    }

    #[tokio::test]
    async fn reset_at_is_next_hour() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), 1, 1);
        let admission = limiter.try_admit(None).await.unwrap();

        let now = Utc::now();
        assert!(admission.reset_at > now);
        assert!(admission.reset_at - now <= Duration::hours(1));
        assert_eq!(admission.reset_at.minute(), 0);
        assert_eq!(admission.reset_at.second(), 0);
    }
}
