//! Delivery worker pool
//!
//! A bounded pool of consumers over the shared task queue. Each reserved
//! task runs the delivery state machine:
//!
//! load dispatch -> sent? ack : mark sending -> admit -> pace -> send
//!   -> sent: ack | failed: record + retry policy
//!   -> not admitted: park until the next hour window, no attempt consumed
//!
//! Every branch writes the dispatch row before yielding, so recovery after
//! a crash resumes from the row's state. Shutdown is a graceful drain:
//! workers stop reserving and finish what they hold.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reachmail_common::types::DispatchStatus;
use reachmail_common::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::limiter::RateLimiter;
use crate::queue::{FailOutcome, ReservedTask, TaskQueue};
use crate::sender::MailSender;
use crate::store::DispatchStore;

/// Worker pool tuning
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Number of concurrent consumers
    pub concurrency: usize,
    /// Outbound pacing applied after admission
    pub min_delay_between_emails: Duration,
    /// Idle wait when no task is ready
    pub poll_interval: Duration,
    /// From address used when no sender account row is active
    pub default_from: String,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            min_delay_between_emails: Duration::from_millis(2000),
            poll_interval: Duration::from_millis(500),
            default_from: "no-reply@localhost".to_string(),
        }
    }
}

/// Shared collaborators of every worker
pub struct WorkerContext {
    pub store: Arc<dyn DispatchStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub limiter: Arc<RateLimiter>,
    pub mailer: Arc<dyn MailSender>,
    pub settings: WorkerSettings,
}

/// Handle over the spawned workers
pub struct DeliveryWorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl DeliveryWorkerPool {
    /// Spawn `settings.concurrency` workers over the shared queue
    pub fn spawn(ctx: Arc<WorkerContext>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let concurrency = ctx.settings.concurrency.max(1);
        let mut joins = Vec::with_capacity(concurrency);
        for worker_id in 0..concurrency {
            let ctx = Arc::clone(&ctx);
            let mut rx = shutdown_rx.clone();

            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, ctx, &mut rx).await;
            }));
        }

        info!(concurrency, "Delivery worker pool started");

        Self { shutdown_tx, joins }
    }

    /// Stop reserving new tasks; in-flight tasks finish their state machine
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Request shutdown and wait for every worker to drain
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
        info!("Delivery worker pool drained");
    }
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<WorkerContext>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let reserved = tokio::select! {
            _ = shutdown_rx.changed() => continue,
            reserved = ctx.queue.reserve() => reserved,
        };

        let task = match reserved {
            Ok(Some(task)) => task,
            Ok(None) => {
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = tokio::time::sleep(ctx.settings.poll_interval) => {}
                }
                continue;
            }
            Err(e) => {
                warn!(worker_id, error = %e, "Failed to reserve a task");
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = tokio::time::sleep(ctx.settings.poll_interval) => {}
                }
                continue;
            }
        };

        if let Err(e) = deliver(&ctx, &task).await {
            // Persistence trouble: hand the task to the retry policy
            warn!(
                worker_id,
                task_id = %task.task_id(),
                error = %e,
                "Task handling failed, deferring to retry policy"
            );
            if let Err(fail_err) = ctx.queue.fail(&task, &e.to_string()).await {
                error!(worker_id, task_id = %task.task_id(), error = %fail_err, "Failed to record task failure");
            }
        }
    }

    debug!(worker_id, "Worker stopped");
}

/// Run the delivery state machine for one reserved task
async fn deliver(ctx: &WorkerContext, task: &ReservedTask) -> Result<()> {
    let dispatch_id = task.payload.dispatch_id;

    let Some(dispatch) = ctx.store.load(dispatch_id).await? else {
        // Raced with a campaign delete; nothing to retry
        warn!(dispatch_id = %dispatch_id, "Dispatch row missing, acking task");
        ctx.queue.ack(task).await?;
        return Ok(());
    };

    if dispatch.status == DispatchStatus::Sent {
        // Idempotent replay guard: never re-deliver
        debug!(dispatch_id = %dispatch_id, "Dispatch already sent, acking replay");
        ctx.queue.ack(task).await?;
        return Ok(());
    }

    ctx.store.mark_sending(dispatch_id).await?;

    let admission = ctx.limiter.try_admit(task.payload.sender_id.as_deref()).await?;
    if !admission.allowed {
        // Not a failure: park the dispatch and the task until the window
        // resets. The attempt counter must not advance here.
        ctx.store
            .mark_rate_limited(dispatch_id, admission.reset_at)
            .await?;

        let delay = (admission.reset_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        ctx.queue.reschedule(task, delay).await?;

        debug!(
            dispatch_id = %dispatch_id,
            resume_at = %admission.reset_at,
            "Rate limited, rescheduled into the next hour window"
        );
        return Ok(());
    }

    // Pacing throttles the SMTP conversation, not admission throughput
    tokio::time::sleep(ctx.settings.min_delay_between_emails).await;

    let from = match ctx.store.active_sender().await? {
        Some(sender) => sender.email,
        None => ctx.settings.default_from.clone(),
    };

    match ctx
        .mailer
        .send(
            &from,
            &task.payload.recipient_email,
            &task.payload.subject,
            &task.payload.body,
        )
        .await
    {
        Ok(outcome) => {
            ctx.store.mark_sent(dispatch_id, &outcome.message_id).await?;
            ctx.queue.ack(task).await?;
            info!(
                dispatch_id = %dispatch_id,
                message_id = %outcome.message_id,
                "Dispatch sent"
            );

            // Advisory completion sweep
            if let Err(e) = ctx.store.settle_campaign(dispatch.campaign_id).await {
                warn!(campaign_id = %dispatch.campaign_id, error = %e, "Campaign settlement check failed");
            }
        }
        Err(e) => {
            // The admitted slot stays consumed: a failed send still charged
            // the budget, so retries cannot bypass the ceiling.
            let message = e.to_string();
            ctx.store.mark_failed(dispatch_id, &message).await?;

            match ctx.queue.fail(task, &message).await? {
                FailOutcome::Retrying(delay) => {
                    warn!(
                        dispatch_id = %dispatch_id,
                        error = %message,
                        retry_in_secs = delay.as_secs(),
                        "Send failed, retry scheduled"
                    );
                }
                FailOutcome::Exhausted => {
                    error!(
                        dispatch_id = %dispatch_id,
                        error = %message,
                        "Send failed, attempt budget exhausted"
                    );
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::{MemoryCounterStore, RateLimiter};
    use crate::queue::{MemoryTaskQueue, TaskPayload};
    use crate::sender::{MailSender, SendOutcome};
    use crate::store::{DispatchRecord, SenderRef};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use reachmail_common::Error;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    struct MemoryDispatchStore {
        dispatches: Mutex<HashMap<Uuid, DispatchRecord>>,
        settled: Mutex<Vec<Uuid>>,
    }

    impl MemoryDispatchStore {
        fn with_dispatch(record: DispatchRecord) -> Self {
            let mut map = HashMap::new();
            map.insert(record.id, record);
            Self {
                dispatches: Mutex::new(map),
                settled: Mutex::new(Vec::new()),
            }
        }

        fn empty() -> Self {
            Self {
                dispatches: Mutex::new(HashMap::new()),
                settled: Mutex::new(Vec::new()),
            }
        }

        fn status_of(&self, id: Uuid) -> DispatchStatus {
            self.dispatches.lock().unwrap().get(&id).unwrap().status
        }

        fn set_status(&self, id: Uuid, status: DispatchStatus) {
            self.dispatches.lock().unwrap().get_mut(&id).unwrap().status = status;
        }
    }

    #[async_trait]
    impl DispatchStore for MemoryDispatchStore {
        async fn load(&self, id: Uuid) -> Result<Option<DispatchRecord>> {
            Ok(self.dispatches.lock().unwrap().get(&id).cloned())
        }

        async fn mark_sending(&self, id: Uuid) -> Result<()> {
            self.set_status(id, DispatchStatus::Sending);
            Ok(())
        }

        async fn mark_sent(&self, id: Uuid, _message_id: &str) -> Result<()> {
            self.set_status(id, DispatchStatus::Sent);
            Ok(())
        }

        async fn mark_failed(&self, id: Uuid, _error: &str) -> Result<()> {
            self.set_status(id, DispatchStatus::Failed);
            Ok(())
        }

        async fn mark_rate_limited(&self, id: Uuid, _resume_at: DateTime<Utc>) -> Result<()> {
            self.set_status(id, DispatchStatus::RateLimited);
            Ok(())
        }

        async fn active_sender(&self) -> Result<Option<SenderRef>> {
            Ok(None)
        }

        async fn settle_campaign(&self, campaign_id: Uuid) -> Result<bool> {
            let open = self
                .dispatches
                .lock()
                .unwrap()
                .values()
                .filter(|d| d.campaign_id == campaign_id && !d.status.is_terminal())
                .count();
            if open == 0 {
                self.settled.lock().unwrap().push(campaign_id);
                return Ok(true);
            }
            Ok(false)
        }
    }

    struct MockMailSender {
        calls: AtomicU32,
        fail_always: bool,
    }

    impl MockMailSender {
        fn succeeding() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_always: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_always: true,
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MailSender for MockMailSender {
        async fn send(&self, _from: &str, to: &str, _subject: &str, _body: &str) -> Result<SendOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_always {
                return Err(Error::Transport("connection refused".to_string()));
            }
            Ok(SendOutcome {
                message_id: format!("<test-{}@reachmail>", to),
                preview_url: None,
            })
        }
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            concurrency: 1,
            min_delay_between_emails: Duration::ZERO,
            poll_interval: Duration::from_millis(10),
            default_from: "no-reply@test.io".to_string(),
        }
    }

    fn fixture(
        store: MemoryDispatchStore,
        mailer: MockMailSender,
        global_ceiling: i64,
    ) -> (Arc<WorkerContext>, Arc<MemoryDispatchStore>, Arc<MockMailSender>, Arc<MemoryTaskQueue>) {
        let store = Arc::new(store);
        let mailer = Arc::new(mailer);
        let queue = Arc::new(MemoryTaskQueue::default());
        let limiter = Arc::new(RateLimiter::new(
            Arc::new(MemoryCounterStore::new()),
            global_ceiling,
            global_ceiling,
        ));

        let ctx = Arc::new(WorkerContext {
            store: Arc::clone(&store) as Arc<dyn DispatchStore>,
            queue: Arc::clone(&queue) as Arc<dyn TaskQueue>,
            limiter,
            mailer: Arc::clone(&mailer) as Arc<dyn MailSender>,
            settings: settings(),
        });

        (ctx, store, mailer, queue)
    }

    fn dispatch_record(status: DispatchStatus) -> DispatchRecord {
        DispatchRecord {
            id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            recipient_email: "a@x.io".to_string(),
            status,
        }
    }

    fn payload_for(record: &DispatchRecord) -> TaskPayload {
        TaskPayload {
            dispatch_id: record.id,
            campaign_id: record.campaign_id,
            recipient_email: record.recipient_email.clone(),
            subject: "subject".to_string(),
            body: "body".to_string(),
            scheduled_at: Utc::now(),
            sender_id: None,
        }
    }

    #[tokio::test]
    async fn happy_path_sends_and_acks() {
        let record = dispatch_record(DispatchStatus::Scheduled);
        let (ctx, store, mailer, queue) =
            fixture(MemoryDispatchStore::with_dispatch(record.clone()), MockMailSender::succeeding(), 10);

        queue.enqueue(&payload_for(&record), Duration::ZERO).await.unwrap();
        let task = queue.reserve().await.unwrap().unwrap();

        deliver(&ctx, &task).await.unwrap();

        assert_eq!(store.status_of(record.id), DispatchStatus::Sent);
        assert_eq!(mailer.call_count(), 1);

        let metrics = queue.metrics().await.unwrap();
        assert_eq!(metrics.completed, 1);
        assert_eq!(metrics.active, 0);

        // The campaign had no other open dispatches, so it settled
        assert_eq!(store.settled.lock().unwrap().as_slice(), &[record.campaign_id]);
    }

    #[tokio::test]
    async fn already_sent_dispatch_is_acked_without_transport() {
        let record = dispatch_record(DispatchStatus::Sent);
        let (ctx, store, mailer, queue) =
            fixture(MemoryDispatchStore::with_dispatch(record.clone()), MockMailSender::succeeding(), 10);

        queue.enqueue(&payload_for(&record), Duration::ZERO).await.unwrap();
        let task = queue.reserve().await.unwrap().unwrap();

        deliver(&ctx, &task).await.unwrap();

        assert_eq!(mailer.call_count(), 0);
        assert_eq!(store.status_of(record.id), DispatchStatus::Sent);
        assert_eq!(queue.metrics().await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn unknown_dispatch_is_acked() {
        let record = dispatch_record(DispatchStatus::Scheduled);
        let (ctx, _store, mailer, queue) =
            fixture(MemoryDispatchStore::empty(), MockMailSender::succeeding(), 10);

        queue.enqueue(&payload_for(&record), Duration::ZERO).await.unwrap();
        let task = queue.reserve().await.unwrap().unwrap();

        deliver(&ctx, &task).await.unwrap();

        assert_eq!(mailer.call_count(), 0);
        assert_eq!(queue.metrics().await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn rate_limited_task_is_rescheduled_without_an_attempt() {
        let record = dispatch_record(DispatchStatus::Scheduled);
        // Ceiling of zero rejects everything
        let (ctx, store, mailer, queue) =
            fixture(MemoryDispatchStore::with_dispatch(record.clone()), MockMailSender::succeeding(), 0);

        queue.enqueue(&payload_for(&record), Duration::ZERO).await.unwrap();
        let task = queue.reserve().await.unwrap().unwrap();

        deliver(&ctx, &task).await.unwrap();

        assert_eq!(mailer.call_count(), 0);
        assert_eq!(store.status_of(record.id), DispatchStatus::RateLimited);

        // Parked until the next window, identity intact, no attempt burned
        let metrics = queue.metrics().await.unwrap();
        assert_eq!(metrics.delayed, 1);
        assert_eq!(metrics.failed, 0);

        // The refused increment was rolled back
        let snapshot = ctx.limiter.inspect(None).await.unwrap();
        assert_eq!(snapshot.global_count, 0);
    }

    #[tokio::test]
    async fn transport_failure_marks_failed_and_keeps_the_slot() {
        let record = dispatch_record(DispatchStatus::Scheduled);
        let (ctx, store, mailer, queue) =
            fixture(MemoryDispatchStore::with_dispatch(record.clone()), MockMailSender::failing(), 10);

        queue.enqueue(&payload_for(&record), Duration::ZERO).await.unwrap();
        let task = queue.reserve().await.unwrap().unwrap();

        deliver(&ctx, &task).await.unwrap();

        assert_eq!(mailer.call_count(), 1);
        assert_eq!(store.status_of(record.id), DispatchStatus::Failed);

        // Retry scheduled by the queue policy
        let metrics = queue.metrics().await.unwrap();
        assert_eq!(metrics.delayed, 1);

        // The admitted slot is NOT returned on failure
        let snapshot = ctx.limiter.inspect(None).await.unwrap();
        assert_eq!(snapshot.global_count, 1);
    }

    #[tokio::test]
    async fn pool_drains_tasks_then_shuts_down() {
        let record_a = dispatch_record(DispatchStatus::Scheduled);
        let mut record_b = dispatch_record(DispatchStatus::Scheduled);
        record_b.campaign_id = record_a.campaign_id;
        record_b.recipient_email = "b@x.io".to_string();

        let store = MemoryDispatchStore::with_dispatch(record_a.clone());
        store
            .dispatches
            .lock()
            .unwrap()
            .insert(record_b.id, record_b.clone());

        let (ctx, store, mailer, queue) = fixture(store, MockMailSender::succeeding(), 10);

        queue.enqueue(&payload_for(&record_a), Duration::ZERO).await.unwrap();
        queue.enqueue(&payload_for(&record_b), Duration::ZERO).await.unwrap();

        let pool = DeliveryWorkerPool::spawn(ctx.clone());

        for _ in 0..100 {
            if queue.metrics().await.unwrap().completed == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        pool.shutdown_and_join().await;

        assert_eq!(queue.metrics().await.unwrap().completed, 2);
        assert_eq!(mailer.call_count(), 2);
        assert_eq!(store.status_of(record_a.id), DispatchStatus::Sent);
        assert_eq!(store.status_of(record_b.id), DispatchStatus::Sent);
    }
}
