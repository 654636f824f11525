//! Application setup and server configuration.

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::orchestrator::ScrapeOrchestrator;
use crate::server::routes::{health_handler, start_scrape_handler, scrape_status_handler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: ScrapeOrchestrator,
}

/// Build the Axum application router
pub fn build_app(orchestrator: ScrapeOrchestrator) -> Router {
    let app_state = AppState { orchestrator };

    Router::new()
        .route("/scrape/start", post(start_scrape_handler))
        .route("/scrape/status/:job_id", get(scrape_status_handler))
        .route("/health", get(health_handler))
        .layer(Extension(app_state))
        .layer(TraceLayer::new_for_http())
}
