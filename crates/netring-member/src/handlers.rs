use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use serde_json::json;

use netring_common::time::now_ts;
use netring_common::BandwidthAck;

use crate::state::SharedMember;

pub async fn health(State(st): State<SharedMember>) -> Json<serde_json::Value> {
    let members_count = st.peers.read().await.len();
    Json(json!({
        "status": st.health_status(),
        "component": "member",
        "version": netring_common::version::version(),
        "instance_id": st.instance_id,
        "location": st.cfg.location,
        "members_count": members_count,
        "tasks": st.supervisor.health(),
        "timestamp": now_ts(),
    }))
}

pub async fn metrics(State(st): State<SharedMember>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        st.metrics.render_prometheus(),
    )
}

/// Serving side of the bandwidth probe: drain the uploaded stream, count
/// bytes, acknowledge. Bodies beyond the configured bound get 413.
pub async fn bandwidth_test(State(st): State<SharedMember>, body: Body) -> Response {
    let start = Instant::now();
    let max = st.cfg.checks.max_bandwidth_body_bytes() as u64;

    let mut received_bytes: u64 = 0;
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                received_bytes += bytes.len() as u64;
                if received_bytes > max {
                    return (
                        StatusCode::PAYLOAD_TOO_LARGE,
                        Json(json!({ "error": "bandwidth test body too large" })),
                    )
                        .into_response();
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "inbound bandwidth test aborted");
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "failed to read body" })),
                )
                    .into_response();
            }
        }
    }

    Json(BandwidthAck {
        received_bytes,
        elapsed_ms: start.elapsed().as_millis() as u64,
    })
    .into_response()
}
