//! Reachmail - campaign scheduler entry point

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reachmail_api::AppState;
use reachmail_common::Config;
use reachmail_core::{
    CampaignScheduler, DeliveryWorkerPool, MailSender, PgDispatchStore, RateLimiter,
    RedisCounterStore, RedisTaskQueue, SchedulerDefaults, SmtpMailSender, TaskQueue,
    WorkerContext, WorkerSettings,
};
use reachmail_storage::{DatabasePool, KvPool};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting reachmail scheduler...");

    let config = Config::load().context("Failed to load configuration")?;

    // Misconfiguration here is fatal: exit non-zero before taking traffic
    let db_pool = DatabasePool::new(&config.database)
        .await
        .context("Cannot reach the relational store")?;
    db_pool.migrate().await.context("Migrations failed")?;

    let kv_pool = KvPool::new(&config.redis)
        .await
        .context("Cannot reach the key-value store")?;
    kv_pool
        .health_check()
        .await
        .context("Key-value store did not answer PING")?;

    let limiter = Arc::new(RateLimiter::new(
        Arc::new(RedisCounterStore::new(kv_pool.conn())),
        config.throttle.max_emails_per_hour,
        config.throttle.max_emails_per_hour_per_sender,
    ));

    let queue: Arc<dyn TaskQueue> = Arc::new(RedisTaskQueue::new(kv_pool.conn()));

    let mailer: Arc<dyn MailSender> =
        Arc::new(SmtpMailSender::new(&config.smtp).context("Failed to build SMTP transport")?);

    let scheduler = Arc::new(CampaignScheduler::new(
        &db_pool,
        queue.clone(),
        SchedulerDefaults {
            delay_between_ms: config.throttle.min_delay_between_emails_ms as i64,
            hourly_limit: config.throttle.max_emails_per_hour_per_sender,
        },
    ));

    // Delivery worker pool
    let worker_ctx = Arc::new(WorkerContext {
        store: Arc::new(PgDispatchStore::new(&db_pool)),
        queue: queue.clone(),
        limiter,
        mailer,
        settings: WorkerSettings {
            concurrency: config.worker.concurrency,
            min_delay_between_emails: Duration::from_millis(
                config.throttle.min_delay_between_emails_ms,
            ),
            poll_interval: Duration::from_millis(config.worker.poll_interval_ms),
            default_from: config.smtp.from_address.clone(),
        },
    });
    let workers = DeliveryWorkerPool::spawn(worker_ctx);

    // HTTP surface
    let state = Arc::new(AppState {
        db_pool,
        scheduler,
        queue,
    });
    let app = reachmail_api::create_router(state);

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(addr = %addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    info!("Shutdown signal received, draining workers");
    workers.shutdown_and_join().await;

    info!("reachmail shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,reachmail=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_level(true))
        .with(filter)
        .init();
}
