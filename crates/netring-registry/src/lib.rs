pub mod analysis;
pub mod args;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod handlers;
pub mod keys;
pub mod state;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(st: AppState) -> Router {
    let snapshot_limit = st.cfg.max_snapshot_bytes;
    Router::new()
        .route("/register", post(handlers::register))
        .route("/heartbeat", post(handlers::heartbeat))
        .route("/deregister", post(handlers::deregister))
        .route(
            "/report_metrics",
            post(handlers::report_metrics).layer(DefaultBodyLimit::max(snapshot_limit)),
        )
        .route("/members", get(handlers::members))
        .route("/members_with_analysis", get(handlers::members_with_analysis))
        .route("/metrics", get(handlers::metrics))
        .route("/health", get(handlers::health))
        .route("/clear", post(handlers::clear))
        .with_state(st)
}
