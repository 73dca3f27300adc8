use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use upkeep_core::config::UpkeepConfig;
use upkeep_scheduler::SchedulerRunner;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: UpkeepConfig,
    pub runner: Arc<SchedulerRunner>,
}

impl AppState {
    pub fn new(config: UpkeepConfig, runner: Arc<SchedulerRunner>) -> Self {
        Self { config, runner }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/scheduler/pm/run",
            post(crate::http::scheduler::run_handler),
        )
        .route(
            "/scheduler/pm/status",
            get(crate::http::scheduler::status_handler),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
