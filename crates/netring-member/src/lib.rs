pub mod args;
pub mod config;
pub mod handlers;
pub mod identity;
pub mod loops;
pub mod metrics;
pub mod net;
pub mod probes;
pub mod registry;
pub mod state;

use axum::routing::{get, post};
use axum::Router;

use crate::state::SharedMember;

pub fn router(st: SharedMember) -> Router {
    let body_limit = st.cfg.checks.max_bandwidth_body_bytes();
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route(
            "/bandwidth_test",
            post(handlers::bandwidth_test)
                .layer(axum::extract::DefaultBodyLimit::max(body_limit + 64 * 1024)),
        )
        .with_state(st)
}
