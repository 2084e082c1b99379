//! In-memory task queue
//!
//! Same contract as the Redis-backed queue, with a single mutex-guarded
//! state map. Not durable; used by tests and local development.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reachmail_common::Result;
use tokio::sync::Mutex;

use super::{FailOutcome, QueueMetrics, ReservedTask, RetryPolicy, TaskPayload, TaskQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    /// Waiting for its ready-at instant (unix millis)
    Delayed(i64),
    Active,
    Completed,
    Failed,
}

#[derive(Debug)]
struct StoredTask {
    payload: TaskPayload,
    attempts: u32,
    last_error: Option<String>,
    state: TaskState,
}

#[derive(Default)]
struct QueueState {
    tasks: HashMap<String, StoredTask>,
}

impl QueueState {
    fn counts(&self, now_ms: i64) -> QueueMetrics {
        let mut metrics = QueueMetrics::default();
        for task in self.tasks.values() {
            match task.state {
                TaskState::Delayed(ready_at) if ready_at <= now_ms => metrics.waiting += 1,
                TaskState::Delayed(_) => metrics.delayed += 1,
                TaskState::Active => metrics.active += 1,
                TaskState::Completed => metrics.completed += 1,
                TaskState::Failed => metrics.failed += 1,
            }
        }
        metrics
    }
}

/// In-memory task queue
pub struct MemoryTaskQueue {
    state: Mutex<QueueState>,
    retry: RetryPolicy,
}

impl MemoryTaskQueue {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            retry,
        }
    }
}

impl Default for MemoryTaskQueue {
    fn default() -> Self {
        Self::new(RetryPolicy::default_delivery())
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, payload: &TaskPayload, delay: Duration) -> Result<bool> {
        let task_id = payload.task_id();
        let mut state = self.state.lock().await;

        if state.tasks.contains_key(&task_id) {
            return Ok(false);
        }

        let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        state.tasks.insert(
            task_id,
            StoredTask {
                payload: payload.clone(),
                attempts: 0,
                last_error: None,
                state: TaskState::Delayed(ready_at),
            },
        );

        Ok(true)
    }

    async fn reserve(&self) -> Result<Option<ReservedTask>> {
        let now_ms = Utc::now().timestamp_millis();
        let mut state = self.state.lock().await;

        // Earliest ready-at first
        let candidate = state
            .tasks
            .iter()
            .filter_map(|(id, task)| match task.state {
                TaskState::Delayed(ready_at) if ready_at <= now_ms => Some((ready_at, id.clone())),
                _ => None,
            })
            .min();

        let Some((_, task_id)) = candidate else {
            return Ok(None);
        };

        let task = state.tasks.get_mut(&task_id).expect("candidate exists");
        task.state = TaskState::Active;

        Ok(Some(ReservedTask {
            payload: task.payload.clone(),
            attempts: task.attempts,
        }))
    }

    async fn ack(&self, task: &ReservedTask) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(stored) = state.tasks.get_mut(&task.task_id()) {
            stored.state = TaskState::Completed;
        }
        Ok(())
    }

    async fn reschedule(&self, task: &ReservedTask, delay: Duration) -> Result<()> {
        let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let mut state = self.state.lock().await;
        if let Some(stored) = state.tasks.get_mut(&task.task_id()) {
            stored.state = TaskState::Delayed(ready_at);
        }
        Ok(())
    }

    async fn fail(&self, task: &ReservedTask, error: &str) -> Result<FailOutcome> {
        let mut state = self.state.lock().await;
        let Some(stored) = state.tasks.get_mut(&task.task_id()) else {
            return Ok(FailOutcome::Exhausted);
        };

        stored.attempts += 1;
        stored.last_error = Some(error.to_string());

        if stored.attempts >= self.retry.max_attempts {
            stored.state = TaskState::Failed;
            return Ok(FailOutcome::Exhausted);
        }

        let delay = self.retry.next_delay(stored.attempts);
        let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        stored.state = TaskState::Delayed(ready_at);
        Ok(FailOutcome::Retrying(delay))
    }

    async fn metrics(&self) -> Result<QueueMetrics> {
        let now_ms = Utc::now().timestamp_millis();
        let state = self.state.lock().await;
        Ok(state.counts(now_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn payload(dispatch_id: Uuid) -> TaskPayload {
        TaskPayload {
            dispatch_id,
            campaign_id: Uuid::new_v4(),
            recipient_email: "a@x.io".to_string(),
            subject: "hello".to_string(),
            body: "world".to_string(),
            scheduled_at: Utc::now(),
            sender_id: None,
        }
    }

    #[tokio::test]
    async fn enqueue_and_reserve() {
        let queue = MemoryTaskQueue::default();
        queue.enqueue(&payload(Uuid::new_v4()), Duration::ZERO).await.unwrap();

        let metrics = queue.metrics().await.unwrap();
        assert_eq!(metrics.waiting, 1);

        let task = queue.reserve().await.unwrap().unwrap();
        assert_eq!(task.attempts, 0);

        let metrics = queue.metrics().await.unwrap();
        assert_eq!(metrics.waiting, 0);
        assert_eq!(metrics.active, 1);
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_noop() {
        let queue = MemoryTaskQueue::default();
        let payload = payload(Uuid::new_v4());

        assert!(queue.enqueue(&payload, Duration::ZERO).await.unwrap());
        assert!(!queue.enqueue(&payload, Duration::ZERO).await.unwrap());

        let metrics = queue.metrics().await.unwrap();
        assert_eq!(metrics.waiting + metrics.delayed, 1);
    }

    #[tokio::test]
    async fn future_task_is_not_reserved() {
        let queue = MemoryTaskQueue::default();
        queue
            .enqueue(&payload(Uuid::new_v4()), Duration::from_secs(3600))
            .await
            .unwrap();

        assert!(queue.reserve().await.unwrap().is_none());

        let metrics = queue.metrics().await.unwrap();
        assert_eq!(metrics.delayed, 1);
        assert_eq!(metrics.waiting, 0);
    }

    #[tokio::test]
    async fn reserved_task_is_hidden() {
        let queue = MemoryTaskQueue::default();
        queue.enqueue(&payload(Uuid::new_v4()), Duration::ZERO).await.unwrap();

        assert!(queue.reserve().await.unwrap().is_some());
        assert!(queue.reserve().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ack_completes_task() {
        let queue = MemoryTaskQueue::default();
        queue.enqueue(&payload(Uuid::new_v4()), Duration::ZERO).await.unwrap();

        let task = queue.reserve().await.unwrap().unwrap();
        queue.ack(&task).await.unwrap();

        let metrics = queue.metrics().await.unwrap();
        assert_eq!(metrics.completed, 1);
        assert_eq!(metrics.active, 0);
    }

    #[tokio::test]
    async fn fail_walks_the_backoff_schedule() {
        let queue = MemoryTaskQueue::default();
        queue.enqueue(&payload(Uuid::new_v4()), Duration::ZERO).await.unwrap();

        let task = queue.reserve().await.unwrap().unwrap();
        let outcome = queue.fail(&task, "boom").await.unwrap();
        assert_eq!(outcome, FailOutcome::Retrying(Duration::from_secs(5)));

        // The retry is delayed; metrics see it as delayed, not waiting
        let metrics = queue.metrics().await.unwrap();
        assert_eq!(metrics.delayed, 1);
        assert_eq!(metrics.failed, 0);
    }

    #[tokio::test]
    async fn third_failure_retires_the_task() {
        let queue = MemoryTaskQueue::new(RetryPolicy {
            base_delay: Duration::from_millis(1),
            multiplier: 1.0,
            max_attempts: 3,
        });
        queue.enqueue(&payload(Uuid::new_v4()), Duration::ZERO).await.unwrap();

        let task = queue.reserve().await.unwrap().unwrap();
        assert!(matches!(
            queue.fail(&task, "one").await.unwrap(),
            FailOutcome::Retrying(_)
        ));
        assert!(matches!(
            queue.fail(&task, "two").await.unwrap(),
            FailOutcome::Retrying(_)
        ));
        assert_eq!(queue.fail(&task, "three").await.unwrap(), FailOutcome::Exhausted);

        let metrics = queue.metrics().await.unwrap();
        assert_eq!(metrics.failed, 1);
    }

    #[tokio::test]
    async fn reschedule_preserves_attempts() {
        let queue = MemoryTaskQueue::default();
        queue.enqueue(&payload(Uuid::new_v4()), Duration::ZERO).await.unwrap();

        let task = queue.reserve().await.unwrap().unwrap();
        queue.fail(&task, "first failure").await.unwrap();

        let task = ReservedTask {
            payload: task.payload,
            attempts: 1,
        };
        queue.reschedule(&task, Duration::ZERO).await.unwrap();

        let reserved = queue.reserve().await.unwrap().unwrap();
        assert_eq!(reserved.attempts, 1);
        assert_eq!(reserved.task_id(), task.task_id());
    }
}
