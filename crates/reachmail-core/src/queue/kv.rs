//! Redis-backed task queue
//!
//! Layout under the `reachinboxScheduler` namespace:
//!
//! - `<ns>:task:<id>` - hash: `payload` (JSON), `attempts`, `last_error`
//! - `<ns>:delayed`   - zset: task id scored by ready-at (unix millis)
//! - `<ns>:active`    - zset: task id scored by reservation instant
//! - `<ns>:completed` - zset: task id scored by completion instant
//! - `<ns>:failed`    - zset: task id scored by failure instant
//!
//! Reservation claims a member via ZREM, so exactly one consumer wins a
//! contended task. Reservations older than the visibility window are moved
//! back to `delayed` with identity and attempts intact, which is what makes
//! a crashed worker's in-flight task survive a restart.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use reachmail_common::{Error, Result};
use tracing::warn;

use super::{
    FailOutcome, QueueMetrics, ReservedTask, RetentionPolicy, RetryPolicy, TaskPayload, TaskQueue,
    QUEUE_NAMESPACE, TASK_NAME,
};

/// How many ready candidates one reservation attempt inspects
const RESERVE_BATCH: usize = 8;

/// Reservations older than this are considered abandoned
const DEFAULT_VISIBILITY: Duration = Duration::from_secs(300);

/// Redis-backed task queue
#[derive(Clone)]
pub struct RedisTaskQueue {
    conn: ConnectionManager,
    namespace: String,
    retry: RetryPolicy,
    retention: RetentionPolicy,
    visibility: Duration,
}

impl RedisTaskQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            namespace: QUEUE_NAMESPACE.to_string(),
            retry: RetryPolicy::default_delivery(),
            retention: RetentionPolicy::default(),
            visibility: DEFAULT_VISIBILITY,
        }
    }

    /// Override the retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the retention budgets
    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    fn task_key(&self, task_id: &str) -> String {
        format!("{}:task:{}", self.namespace, task_id)
    }

    fn delayed_key(&self) -> String {
        format!("{}:delayed", self.namespace)
    }

    fn active_key(&self) -> String {
        format!("{}:active", self.namespace)
    }

    fn completed_key(&self) -> String {
        format!("{}:completed", self.namespace)
    }

    fn failed_key(&self) -> String {
        format!("{}:failed", self.namespace)
    }

    /// Move abandoned reservations back into the delayed set
    async fn reclaim_stale(&self, conn: &mut ConnectionManager, now_ms: i64) -> Result<()> {
        let cutoff = now_ms - self.visibility.as_millis() as i64;
        let stale: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.active_key())
            .arg("-inf")
            .arg(cutoff)
            .query_async(conn)
            .await
            .map_err(queue_err)?;

        for task_id in stale {
            let claimed: i64 = redis::cmd("ZREM")
                .arg(self.active_key())
                .arg(&task_id)
                .query_async(conn)
                .await
                .map_err(queue_err)?;
            if claimed == 1 {
                warn!(task_id = %task_id, "Reclaiming abandoned reservation");
                redis::cmd("ZADD")
                    .arg(self.delayed_key())
                    .arg(now_ms)
                    .arg(&task_id)
                    .query_async::<_, i64>(conn)
                    .await
                    .map_err(queue_err)?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn enqueue(&self, payload: &TaskPayload, delay: Duration) -> Result<bool> {
        let task_id = payload.task_id();
        let json = serde_json::to_string(payload)
            .map_err(|e| Error::Queue(format!("Failed to encode task payload: {}", e)))?;

        let mut conn = self.conn.clone();

        let created: i64 = redis::cmd("HSETNX")
            .arg(self.task_key(&task_id))
            .arg("payload")
            .arg(&json)
            .query_async(&mut conn)
            .await
            .map_err(queue_err)?;

        if created == 0 {
            // A task for this dispatch already exists
            return Ok(false);
        }

        redis::cmd("HSET")
            .arg(self.task_key(&task_id))
            .arg("name")
            .arg(TASK_NAME)
            .arg("attempts")
            .arg(0)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(queue_err)?;

        let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        redis::cmd("ZADD")
            .arg(self.delayed_key())
            .arg(ready_at)
            .arg(&task_id)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(queue_err)?;

        Ok(true)
    }

    async fn reserve(&self) -> Result<Option<ReservedTask>> {
        let mut conn = self.conn.clone();
        let now_ms = Utc::now().timestamp_millis();

        self.reclaim_stale(&mut conn, now_ms).await?;

        let candidates: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.delayed_key())
            .arg("-inf")
            .arg(now_ms)
            .arg("LIMIT")
            .arg(0)
            .arg(RESERVE_BATCH)
            .query_async(&mut conn)
            .await
            .map_err(queue_err)?;

        for task_id in candidates {
            // ZREM is the claim: exactly one consumer removes the member
            let claimed: i64 = redis::cmd("ZREM")
                .arg(self.delayed_key())
                .arg(&task_id)
                .query_async(&mut conn)
                .await
                .map_err(queue_err)?;
            if claimed == 0 {
                continue;
            }

            redis::cmd("ZADD")
                .arg(self.active_key())
                .arg(now_ms)
                .arg(&task_id)
                .query_async::<_, i64>(&mut conn)
                .await
                .map_err(queue_err)?;

            let json: Option<String> = redis::cmd("HGET")
                .arg(self.task_key(&task_id))
                .arg("payload")
                .query_async(&mut conn)
                .await
                .map_err(queue_err)?;

            let Some(json) = json else {
                warn!(task_id = %task_id, "Dropping orphaned queue entry without payload");
                redis::cmd("ZREM")
                    .arg(self.active_key())
                    .arg(&task_id)
                    .query_async::<_, i64>(&mut conn)
                    .await
                    .map_err(queue_err)?;
                continue;
            };

            let payload: TaskPayload = serde_json::from_str(&json)
                .map_err(|e| Error::Queue(format!("Corrupt task payload for {}: {}", task_id, e)))?;

            let attempts: Option<u32> = redis::cmd("HGET")
                .arg(self.task_key(&task_id))
                .arg("attempts")
                .query_async(&mut conn)
                .await
                .map_err(queue_err)?;

            return Ok(Some(ReservedTask {
                payload,
                attempts: attempts.unwrap_or(0),
            }));
        }

        Ok(None)
    }

    async fn ack(&self, task: &ReservedTask) -> Result<()> {
        let task_id = task.task_id();
        let mut conn = self.conn.clone();
        let now_ms = Utc::now().timestamp_millis();

        redis::cmd("ZREM")
            .arg(self.active_key())
            .arg(&task_id)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(queue_err)?;

        redis::cmd("DEL")
            .arg(self.task_key(&task_id))
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(queue_err)?;

        redis::cmd("ZADD")
            .arg(self.completed_key())
            .arg(now_ms)
            .arg(&task_id)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(queue_err)?;

        // Retention: drop entries past the TTL, then cap the set size
        let ttl_cutoff = now_ms - self.retention.completed_ttl.as_millis() as i64;
        redis::cmd("ZREMRANGEBYSCORE")
            .arg(self.completed_key())
            .arg("-inf")
            .arg(ttl_cutoff)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(queue_err)?;

        let keep = self.retention.completed_max as i64;
        redis::cmd("ZREMRANGEBYRANK")
            .arg(self.completed_key())
            .arg(0)
            .arg(-(keep + 1))
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(queue_err)?;

        Ok(())
    }

    async fn reschedule(&self, task: &ReservedTask, delay: Duration) -> Result<()> {
        let task_id = task.task_id();
        let mut conn = self.conn.clone();

        redis::cmd("ZREM")
            .arg(self.active_key())
            .arg(&task_id)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(queue_err)?;

        let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        redis::cmd("ZADD")
            .arg(self.delayed_key())
            .arg(ready_at)
            .arg(&task_id)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(queue_err)?;

        Ok(())
    }

    async fn fail(&self, task: &ReservedTask, error: &str) -> Result<FailOutcome> {
        let task_id = task.task_id();
        let mut conn = self.conn.clone();
        let now_ms = Utc::now().timestamp_millis();

        let attempts: i64 = redis::cmd("HINCRBY")
            .arg(self.task_key(&task_id))
            .arg("attempts")
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(queue_err)?;

        redis::cmd("HSET")
            .arg(self.task_key(&task_id))
            .arg("last_error")
            .arg(error)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(queue_err)?;

        redis::cmd("ZREM")
            .arg(self.active_key())
            .arg(&task_id)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(queue_err)?;

        if attempts >= self.retry.max_attempts as i64 {
            redis::cmd("ZADD")
                .arg(self.failed_key())
                .arg(now_ms)
                .arg(&task_id)
                .query_async::<_, i64>(&mut conn)
                .await
                .map_err(queue_err)?;

            let ttl_cutoff = now_ms - self.retention.failed_ttl.as_millis() as i64;
            redis::cmd("ZREMRANGEBYSCORE")
                .arg(self.failed_key())
                .arg("-inf")
                .arg(ttl_cutoff)
                .query_async::<_, i64>(&mut conn)
                .await
                .map_err(queue_err)?;

            return Ok(FailOutcome::Exhausted);
        }

        let delay = self.retry.next_delay(attempts as u32);
        let ready_at = now_ms + delay.as_millis() as i64;
        redis::cmd("ZADD")
            .arg(self.delayed_key())
            .arg(ready_at)
            .arg(&task_id)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(queue_err)?;

        Ok(FailOutcome::Retrying(delay))
    }

    async fn metrics(&self) -> Result<QueueMetrics> {
        let mut conn = self.conn.clone();
        let now_ms = Utc::now().timestamp_millis();

        let waiting: i64 = redis::cmd("ZCOUNT")
            .arg(self.delayed_key())
            .arg("-inf")
            .arg(now_ms)
            .query_async(&mut conn)
            .await
            .map_err(queue_err)?;

        let delayed: i64 = redis::cmd("ZCOUNT")
            .arg(self.delayed_key())
            .arg(format!("({}", now_ms))
            .arg("+inf")
            .query_async(&mut conn)
            .await
            .map_err(queue_err)?;

        let active: i64 = zcard(&mut conn, &self.active_key()).await?;
        let completed: i64 = zcard(&mut conn, &self.completed_key()).await?;
        let failed: i64 = zcard(&mut conn, &self.failed_key()).await?;

        Ok(QueueMetrics {
            waiting: waiting.max(0) as u64,
            active: active.max(0) as u64,
            completed: completed.max(0) as u64,
            failed: failed.max(0) as u64,
            delayed: delayed.max(0) as u64,
        })
    }
}

async fn zcard(conn: &mut ConnectionManager, key: &str) -> Result<i64> {
    redis::cmd("ZCARD")
        .arg(key)
        .query_async(conn)
        .await
        .map_err(queue_err)
}

fn queue_err(e: redis::RedisError) -> Error {
    Error::Queue(e.to_string())
}
