//! Reachmail API - REST surface
//!
//! Thin adapter over the scheduler and the delivery pipeline: campaign
//! ingress, dispatch listings, queue metrics, and health probes.

pub mod handlers;
pub mod response;
pub mod routes;

use std::sync::Arc;

use reachmail_core::{CampaignScheduler, TaskQueue};
use reachmail_storage::DatabasePool;

pub use routes::create_router;

/// Shared application state
pub struct AppState {
    pub db_pool: DatabasePool,
    pub scheduler: Arc<CampaignScheduler>,
    pub queue: Arc<dyn TaskQueue>,
}
