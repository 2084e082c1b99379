//! Durable delayed task queue
//!
//! One task per dispatch, identified by `emailTask-<dispatch_id>`; the id
//! is deterministic so a second enqueue for the same dispatch is a no-op.
//! Tasks become visible once their ready-at instant has passed, and are
//! hidden from other consumers while reserved. Rescheduling keeps the
//! task's identity and attempt count; only `fail` consumes an attempt.

pub mod kv;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reachmail_common::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use kv::RedisTaskQueue;
pub use memory::MemoryTaskQueue;

/// Queue namespace prefixed to every key
pub const QUEUE_NAMESPACE: &str = "reachinboxScheduler";

/// Task name carried in the payload envelope
pub const TASK_NAME: &str = "deliverEmailTask";

/// Task id prefix; the suffix is the dispatch id
pub const TASK_ID_PREFIX: &str = "emailTask-";

/// Task payload: everything the delivery worker needs without a campaign read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    pub dispatch_id: Uuid,
    pub campaign_id: Uuid,
    pub recipient_email: String,
    pub subject: String,
    pub body: String,
    /// Originally scheduled instant
    pub scheduled_at: DateTime<Utc>,
    /// Sender identifier for the per-sender ceiling, when one was assigned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
}

impl TaskPayload {
    /// Deterministic task id derived from the dispatch id
    pub fn task_id(&self) -> String {
        format!("{}{}", TASK_ID_PREFIX, self.dispatch_id)
    }
}

/// A task handed to a consumer, hidden from the others while held
#[derive(Debug, Clone)]
pub struct ReservedTask {
    pub payload: TaskPayload,
    /// Failed attempts recorded so far
    pub attempts: u32,
}

impl ReservedTask {
    pub fn task_id(&self) -> String {
        self.payload.task_id()
    }
}

/// What `fail` decided for the task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// A retry is scheduled after the given delay
    Retrying(Duration),
    /// Attempt budget exhausted; the task is retained as failed
    Exhausted,
}

/// Queue depth by state
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueMetrics {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

/// Exponential backoff for transport failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Delivery default: 5 s, 25 s, 125 s with three attempts total
    pub fn default_delivery() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            multiplier: 5.0,
            max_attempts: 3,
        }
    }

    /// Delay before the retry following the given failed-attempt count
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(attempts.saturating_sub(1) as i32);
        Duration::from_secs_f64(delay_secs)
    }
}

/// Result retention budgets
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Completed tasks kept this long...
    pub completed_ttl: Duration,
    /// ...or up to this many, whichever trims first
    pub completed_max: usize,
    /// Fully-failed tasks kept this long
    pub failed_ttl: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            completed_ttl: Duration::from_secs(24 * 3600),
            completed_max: 1000,
            failed_ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Durable delayed task queue
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Append a task with a delay before it becomes ready.
    ///
    /// Returns false when a task with the same id already exists; the
    /// call is then a no-op and MUST NOT create a duplicate.
    async fn enqueue(&self, payload: &TaskPayload, delay: Duration) -> Result<bool>;

    /// Reserve a ready task, hiding it from other consumers while held
    async fn reserve(&self) -> Result<Option<ReservedTask>>;

    /// Remove a finished task, retaining it under the completed budget
    async fn ack(&self, task: &ReservedTask) -> Result<()>;

    /// Return a task to the delayed state with a new ready-at.
    ///
    /// Identity and attempt count are preserved; used for rate-limit
    /// rescheduling, which is not a failure.
    async fn reschedule(&self, task: &ReservedTask, delay: Duration) -> Result<()>;

    /// Record a failed attempt and either schedule a retry or retire the task
    async fn fail(&self, task: &ReservedTask, error: &str) -> Result<FailOutcome>;

    /// Queue depth by state
    async fn metrics(&self) -> Result<QueueMetrics>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_is_deterministic() {
        let dispatch_id = Uuid::new_v4();
        let payload = TaskPayload {
            dispatch_id,
            campaign_id: Uuid::new_v4(),
            recipient_email: "a@x.io".to_string(),
            subject: "s".to_string(),
            body: "b".to_string(),
            scheduled_at: Utc::now(),
            sender_id: None,
        };
        assert_eq!(payload.task_id(), format!("emailTask-{}", dispatch_id));
    }

    #[test]
    fn retry_schedule_is_5_25_125() {
        let policy = RetryPolicy::default_delivery();
        assert_eq!(policy.next_delay(1), Duration::from_secs(5));
        assert_eq!(policy.next_delay(2), Duration::from_secs(25));
        assert_eq!(policy.next_delay(3), Duration::from_secs(125));
        assert_eq!(policy.max_attempts, 3);
    }

    #[test]
    fn payload_round_trips_through_json() {
        let payload = TaskPayload {
            dispatch_id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            recipient_email: "a@x.io".to_string(),
            subject: "subject".to_string(),
            body: "body".to_string(),
            scheduled_at: Utc::now(),
            sender_id: Some("acct-1".to_string()),
        };
        let json = serde_json::to_string(&payload).unwrap();
        let parsed: TaskPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, payload);
    }
}
