use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::net::TcpListener;
use tower::ServiceExt;

use netring_common::time::now_ts;
use netring_common::{MemberRecord, MemberStatus};
use netring_member::config::MemberConfig;
use netring_member::loops;
use netring_member::probes::{Hop, TraceResult, Tracer};
use netring_member::router;
use netring_member::state::{MemberState, SharedMember};

struct FakeTracer(Option<TraceResult>);

#[async_trait]
impl Tracer for FakeTracer {
    async fn trace(&self, _target: &str, _deadline: Duration) -> anyhow::Result<Option<TraceResult>> {
        Ok(self.0.clone())
    }
}

fn test_state(location: &str, tracer: Option<TraceResult>) -> SharedMember {
    let mut cfg = MemberConfig::default();
    cfg.location = location.to_string();
    // Nothing listens here; control-plane cycles must tolerate it.
    cfg.registry.url = "http://127.0.0.1:1".to_string();
    MemberState::new(
        cfg,
        format!("{location}-instance"),
        "127.0.0.1".to_string(),
        Box::new(FakeTracer(tracer)),
    )
}

fn peer_record(location: &str, id: &str, port: u16) -> MemberRecord {
    MemberRecord {
        instance_id: id.to_string(),
        location: location.to_string(),
        ip: "127.0.0.1".to_string(),
        port,
        registered_at: now_ts(),
        last_seen: now_ts(),
        status: MemberStatus::Active,
        deregistered_at: None,
    }
}

async fn add_peer(st: &SharedMember, record: MemberRecord) {
    st.peers
        .write()
        .await
        .insert(record.instance_id.clone(), record);
}

/// Serve a member's router on an ephemeral loopback port.
async fn spawn_member_server(st: SharedMember) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router(st)).await.unwrap();
    });
    port
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_identity_and_tasks() {
    let st = test_state("us1", None);
    let app = router(st);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["component"], "member");
    assert_eq!(body["instance_id"], "us1-instance");
    assert_eq!(body["location"], "us1");
    assert_eq!(body["members_count"], 0);
}

#[tokio::test]
async fn metrics_is_prometheus_text() {
    let st = test_state("us1", None);
    let app = router(st);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/plain"));

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("netring_members_total 0"));
}

#[tokio::test]
async fn bandwidth_test_acks_received_bytes() {
    let st = test_state("us1", None);
    let app = router(st);

    let payload = vec![7u8; 1_048_576];
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/bandwidth_test")
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["received_bytes"], 1_048_576);
    assert!(body["elapsed_ms"].as_u64().is_some());
}

#[tokio::test]
async fn bandwidth_test_rejects_oversized_body() {
    let st = test_state("us1", None);
    let max = st.cfg.checks.max_bandwidth_body_bytes();
    let app = router(st);

    let payload = vec![0u8; max + 1024];
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/bandwidth_test")
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn connectivity_cycle_probes_a_live_peer() {
    let serving = test_state("eu1", None);
    let port = spawn_member_server(serving).await;

    let probing = test_state("us1", None);
    add_peer(&probing, peer_record("eu1", "peer-1", port)).await;

    loops::connectivity_cycle(probing.clone()).await.unwrap();

    let snap = probing.metrics.snapshot(0, "test");
    assert_eq!(snap.connectivity_tcp["eu1:peer-1"].value, 1.0);
    assert_eq!(snap.connectivity_http["eu1:peer-1:/health"].value, 1.0);
    assert_eq!(snap.connectivity_http["eu1:peer-1:/metrics"].value, 1.0);
    // Probe latencies land in the histogram aggregates.
    assert!(snap.check_durations["tcp:eu1:peer-1"].count >= 1);
    assert!(snap.check_durations["http:eu1:peer-1"].count >= 2);
}

#[tokio::test]
async fn connectivity_cycle_marks_unreachable_peer_down() {
    // Bind then drop to get a dead port.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let probing = test_state("us1", None);
    add_peer(&probing, peer_record("eu1", "peer-1", port)).await;

    loops::connectivity_cycle(probing.clone()).await.unwrap();

    let snap = probing.metrics.snapshot(0, "test");
    assert_eq!(snap.connectivity_tcp["eu1:peer-1"].value, 0.0);
    assert_eq!(snap.connectivity_http["eu1:peer-1:/health"].value, 0.0);
}

#[tokio::test]
async fn bandwidth_cycle_measures_loopback_transfer() {
    let serving = test_state("eu1", None);
    let port = spawn_member_server(serving).await;

    let probing = test_state("us1", None);
    add_peer(&probing, peer_record("eu1", "peer-1", port)).await;

    loops::bandwidth_cycle(probing.clone()).await.unwrap();

    let snap = probing.metrics.snapshot(0, "test");
    let sample = &snap.bandwidth_tests["eu1:peer-1"];
    assert!(sample.bandwidth_mbps > 10.0);
    assert!(sample.bandwidth_mbps < 100_000.0);

    // The target is rescheduled; an immediate second cycle does nothing.
    loops::bandwidth_cycle(probing.clone()).await.unwrap();
    let again = probing.metrics.snapshot(0, "test");
    assert_eq!(
        again.bandwidth_tests["eu1:peer-1"].timestamp,
        sample.timestamp
    );
}

#[tokio::test]
async fn traceroute_cycle_records_fake_trace() {
    let result = TraceResult {
        total_hops: 5,
        max_hop_latency_ms: 12.3,
        hops: vec![Hop {
            hop: 1,
            ip: Some("10.0.0.1".to_string()),
            rtt_ms: Some(12.3),
        }],
    };
    let probing = test_state("us1", Some(result));
    add_peer(&probing, peer_record("eu1", "peer-1", 9)).await;

    loops::traceroute_cycle(probing.clone()).await.unwrap();

    let snap = probing.metrics.snapshot(0, "test");
    let sample = &snap.traceroute_tests["eu1:peer-1"];
    assert_eq!(sample.total_hops, 5);
    assert!((sample.max_hop_latency_ms - 12.3).abs() < 1e-9);
}

#[tokio::test]
async fn empty_peer_list_runs_every_cycle_without_samples() {
    let probing = test_state("us1", None);

    loops::connectivity_cycle(probing.clone()).await.unwrap();
    loops::bandwidth_cycle(probing.clone()).await.unwrap();
    loops::traceroute_cycle(probing.clone()).await.unwrap();
    // Registry is unreachable; control cycles still complete.
    loops::heartbeat_cycle(probing.clone()).await.unwrap();
    loops::poll_cycle(probing.clone()).await.unwrap();
    loops::report_cycle(probing.clone()).await.unwrap();

    let snap = probing.metrics.snapshot(0, "test");
    assert!(snap.connectivity_tcp.is_empty());
    assert!(snap.connectivity_http.is_empty());
    assert!(snap.bandwidth_tests.is_empty());
    assert!(snap.traceroute_tests.is_empty());
}
