//! API routes

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::{campaigns, dispatches, status};
use crate::AppState;

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route(
            "/campaigns",
            get(campaigns::list_campaigns).post(campaigns::create_campaign),
        )
        .route(
            "/campaigns/:id/dispatches",
            get(campaigns::list_campaign_dispatches),
        )
        .route("/dispatches/scheduled", get(dispatches::list_scheduled))
        .route("/dispatches/sent", get(dispatches::list_sent))
        .route("/status", get(status::system_status));

    Router::new()
        .route("/health", get(status::health))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
