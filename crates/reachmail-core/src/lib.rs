//! Reachmail Core - Campaign scheduling and rate-limited delivery
//!
//! This crate provides the delayed-dispatch scheduler, the durable task
//! queue, the hour-bucketed rate limiter, and the concurrent delivery
//! worker pool.

pub mod limiter;
pub mod queue;
pub mod scheduler;
pub mod sender;
pub mod store;
pub mod worker;

pub use limiter::{Admission, CounterStore, MemoryCounterStore, RateLimiter, RateSnapshot, RedisCounterStore};
pub use queue::{
    FailOutcome, MemoryTaskQueue, QueueMetrics, RedisTaskQueue, ReservedTask, RetentionPolicy,
    RetryPolicy, TaskPayload, TaskQueue,
};
pub use scheduler::{CampaignReceipt, CampaignScheduler, CreateCampaignRequest, ScheduleError, SchedulerDefaults};
pub use sender::{MailSender, SendOutcome, SmtpMailSender};
pub use store::{DispatchRecord, DispatchStore, PgDispatchStore, SenderRef};
pub use worker::{DeliveryWorkerPool, WorkerContext, WorkerSettings};
