use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use anyhow::Result;

use netring_common::supervisor::DEFAULT_HEALTH_CHECK_INTERVAL;

use crate::probes::{bandwidth, http, tcp};
use crate::state::SharedMember;

/// How often the bandwidth loop wakes to look for due targets; actual
/// per-target cadence is the configured interval plus jitter.
const BANDWIDTH_TICK: Duration = Duration::from_secs(15);
const BANDWIDTH_TIMEOUT: Duration = Duration::from_secs(30);

/// Register every background loop with the supervisor and start the stall
/// monitor. Initial delays stagger the probe pipelines behind discovery.
pub fn spawn_all(st: &SharedMember) {
    let iv = &st.cfg.intervals;

    spawn(st, "registration", Duration::ZERO, Duration::from_secs(5), registration_cycle);
    spawn(st, "heartbeat", Duration::ZERO, Duration::from_secs(iv.heartbeat), heartbeat_cycle);
    spawn(st, "peer_poll", Duration::ZERO, Duration::from_secs(iv.poll), poll_cycle);
    spawn(st, "connectivity", Duration::from_secs(5), Duration::from_secs(iv.check), connectivity_cycle);
    spawn(st, "bandwidth", Duration::from_secs(60), BANDWIDTH_TICK, bandwidth_cycle);
    spawn(st, "traceroute", Duration::from_secs(90), Duration::from_secs(iv.traceroute), traceroute_cycle);
    spawn(st, "metrics_report", Duration::from_secs(30), Duration::from_secs(iv.report), report_cycle);

    st.supervisor.start_monitor(DEFAULT_HEALTH_CHECK_INTERVAL);
}

fn spawn<F, Fut>(st: &SharedMember, name: &str, initial_delay: Duration, period: Duration, cycle: F)
where
    F: Fn(SharedMember) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    let st_for_task = st.clone();
    st.supervisor.spawn(name, initial_delay, period, move || {
        cycle(st_for_task.clone())
    });
}

/// Ensures we are registered: immediately at startup and again whenever
/// the registry answers Gone/NotFound. While registered it parks on the
/// wakeup notify.
pub async fn registration_cycle(st: SharedMember) -> Result<()> {
    if st.registered.load(Ordering::Relaxed) {
        let _ = tokio::time::timeout(Duration::from_secs(60), st.reregister.notified()).await;
    }
    if st.registered.load(Ordering::Relaxed) {
        return Ok(());
    }

    match st.registry.register(&st.register_request()).await {
        Ok(resp) => {
            st.registered.store(true, Ordering::Relaxed);
            st.note_registry_ok();
            tracing::info!(instance_id = %resp.instance_id, location = %st.cfg.location, "registered with registry");
        }
        Err(e) => {
            if st.warn_limiter.allow("register") {
                tracing::warn!(error = %e, "registration failed, will retry");
            }
        }
    }
    Ok(())
}

pub async fn heartbeat_cycle(st: SharedMember) -> Result<()> {
    if !st.registered.load(Ordering::Relaxed) {
        return Ok(());
    }
    match st.registry.heartbeat(&st.instance_id).await {
        Ok(()) => st.note_registry_ok(),
        Err(e) if e.needs_reregistration() => {
            tracing::warn!(error = %e, "registry dropped our registration, re-registering");
            st.registered.store(false, Ordering::Relaxed);
            st.reregister.notify_one();
        }
        Err(e) => {
            if st.warn_limiter.allow("heartbeat") {
                tracing::warn!(error = %e, "heartbeat failed");
            }
        }
    }
    Ok(())
}

/// Refresh the peer cache from the registry. On failure the cached list
/// stays in place and probing continues against it.
pub async fn poll_cycle(st: SharedMember) -> Result<()> {
    let members = match st.registry.fetch_members().await {
        Ok(members) => {
            st.note_registry_ok();
            members
        }
        Err(e) => {
            if st.warn_limiter.allow("peer_poll") {
                tracing::warn!(error = %e, "peer poll failed, keeping cached list");
            }
            return Ok(());
        }
    };

    let fresh: HashMap<String, _> = members
        .into_iter()
        .filter(|m| m.is_active() && m.instance_id != st.instance_id)
        .map(|m| (m.instance_id.clone(), m))
        .collect();

    let peer_view: Vec<(String, String, i64)> = fresh
        .values()
        .map(|m| (m.location.clone(), m.instance_id.clone(), m.last_seen))
        .collect();
    let current: HashSet<String> = fresh.keys().cloned().collect();

    let previous: HashSet<String> = {
        let mut peers = st.peers.write().await;
        let previous = peers.keys().cloned().collect();
        *peers = fresh;
        previous
    };

    st.metrics.set_peer_view(&peer_view);

    let evicted = {
        let mut gone = st.gone_counts.lock().unwrap_or_else(|e| e.into_inner());
        advance_gone_counts(&mut gone, &previous, &current)
    };
    for instance_id in evicted {
        tracing::debug!(instance_id = %instance_id, "evicting probe results for vanished peer");
        st.metrics.evict_target(&instance_id);
    }

    tracing::debug!(peers = current.len(), "refreshed peer cache");
    Ok(())
}

/// Tracks how many successive refreshes a peer has been absent; returns
/// the ids that crossed the eviction threshold of two.
fn advance_gone_counts(
    gone: &mut HashMap<String, u32>,
    previous: &HashSet<String>,
    current: &HashSet<String>,
) -> Vec<String> {
    gone.retain(|id, _| !current.contains(id));

    let mut candidates: HashSet<String> = gone.keys().cloned().collect();
    candidates.extend(previous.iter().filter(|id| !current.contains(*id)).cloned());

    let mut evicted = Vec::new();
    for id in candidates {
        let count = gone.entry(id.clone()).or_insert(0);
        *count += 1;
        if *count >= 2 {
            evicted.push(id);
        }
    }
    for id in &evicted {
        gone.remove(id);
    }
    evicted
}

/// TCP and HTTP probes toward every cached peer, sequential per cycle so
/// probes of one type never overlap.
pub async fn connectivity_cycle(st: SharedMember) -> Result<()> {
    let peers = st.peers_snapshot().await;
    for peer in &peers {
        let (ok, elapsed) = tcp::probe(&peer.ip, peer.port, st.cfg.checks.tcp_timeout()).await;
        st.metrics.record_tcp(st.labels_for(peer, None), ok, elapsed);

        for endpoint in &st.cfg.checks.http_endpoints {
            let (ok, elapsed) = http::probe(
                &st.probe_http,
                &peer.ip,
                peer.port,
                endpoint,
                st.cfg.checks.http_timeout(),
            )
            .await;
            st.metrics
                .record_http(st.labels_for(peer, Some(endpoint)), ok, elapsed);
        }
    }
    tracing::debug!(peers = peers.len(), "completed connectivity checks");
    Ok(())
}

pub async fn bandwidth_cycle(st: SharedMember) -> Result<()> {
    let peers = st.peers_snapshot().await;
    let interval = Duration::from_secs(st.cfg.intervals.bandwidth_test);
    let now = Instant::now();

    let due: Vec<_> = {
        let schedule = st.bandwidth_due.lock().unwrap_or_else(|e| e.into_inner());
        peers
            .into_iter()
            .filter(|p| {
                schedule
                    .get(&p.instance_id)
                    .is_none_or(|next| *next <= now)
            })
            .collect()
    };

    for peer in due {
        let result = bandwidth::measure(
            &st.probe_http,
            &peer.ip,
            peer.port,
            st.cfg.checks.bandwidth_payload_bytes(),
            BANDWIDTH_TIMEOUT,
        )
        .await;

        match result {
            Some(mbps) => {
                tracing::info!(
                    target_location = %peer.location,
                    target_ip = %peer.ip,
                    mbps = format!("{mbps:.2}"),
                    "bandwidth test complete"
                );
                st.metrics.record_bandwidth(st.labels_for(&peer, None), mbps);
            }
            None => {
                if st.warn_limiter.allow("bandwidth") {
                    tracing::warn!(target_location = %peer.location, target_ip = %peer.ip, "bandwidth test failed");
                }
            }
        }

        let next = Instant::now() + jittered(interval);
        st.bandwidth_due
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(peer.instance_id.clone(), next);
    }
    Ok(())
}

/// Displace each target's next test by up to ±10% of the interval so the
/// fleet's transfers never synchronize.
fn jittered(interval: Duration) -> Duration {
    let ms = interval.as_millis() as i64;
    let delta = ms / 10;
    let j = if delta > 0 {
        rand::random_range(-delta..=delta)
    } else {
        0
    };
    Duration::from_millis((ms + j).max(0) as u64)
}

pub async fn traceroute_cycle(st: SharedMember) -> Result<()> {
    let peers = st.peers_snapshot().await;
    for peer in &peers {
        let _permit = st.traceroute_slot.acquire().await?;
        match st
            .tracer
            .trace(&peer.ip, st.cfg.checks.traceroute_timeout())
            .await?
        {
            Some(result) => {
                tracing::info!(
                    target_location = %peer.location,
                    target_ip = %peer.ip,
                    hops = result.total_hops,
                    max_hop_latency_ms = result.max_hop_latency_ms,
                    "traceroute complete"
                );
                st.metrics.record_traceroute(
                    st.labels_for(peer, None),
                    result.total_hops,
                    result.max_hop_latency_ms,
                );
            }
            None => {
                tracing::debug!(target_ip = %peer.ip, "traceroute produced no usable result");
            }
        }
    }
    Ok(())
}

/// Push the current snapshot upstream. The supervisor runs one iteration
/// at a time, so pushes never overlap.
pub async fn report_cycle(st: SharedMember) -> Result<()> {
    if !st.registered.load(Ordering::Relaxed) {
        return Ok(());
    }
    let snapshot = st
        .metrics
        .snapshot(st.uptime_s(), netring_common::version::version());
    match st.registry.report_metrics(&st.instance_id, &snapshot).await {
        Ok(()) => {
            st.note_registry_ok();
            tracing::debug!("reported metrics snapshot");
        }
        Err(e) if e.needs_reregistration() => {
            tracing::warn!(error = %e, "registry dropped our registration, re-registering");
            st.registered.store(false, Ordering::Relaxed);
            st.reregister.notify_one();
        }
        Err(e) => {
            if st.warn_limiter.allow("metrics_report") {
                tracing::warn!(error = %e, "metrics report failed");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn peer_evicted_after_two_absent_refreshes() {
        let mut gone = HashMap::new();

        // Peer present, then vanishes.
        let evicted = advance_gone_counts(&mut gone, &set(&["a", "b"]), &set(&["b"]));
        assert!(evicted.is_empty());
        assert_eq!(gone.get("a"), Some(&1));

        // Still absent on the next refresh: evicted.
        let evicted = advance_gone_counts(&mut gone, &set(&["b"]), &set(&["b"]));
        assert_eq!(evicted, vec!["a".to_string()]);
        assert!(gone.is_empty());
    }

    #[test]
    fn returning_peer_resets_the_count() {
        let mut gone = HashMap::new();

        let evicted = advance_gone_counts(&mut gone, &set(&["a"]), &set(&[]));
        assert!(evicted.is_empty());

        // Peer reappears before the second refresh.
        let evicted = advance_gone_counts(&mut gone, &set(&[]), &set(&["a"]));
        assert!(evicted.is_empty());
        assert!(gone.is_empty());

        // Vanishing again starts over from one.
        let evicted = advance_gone_counts(&mut gone, &set(&["a"]), &set(&[]));
        assert!(evicted.is_empty());
        assert_eq!(gone.get("a"), Some(&1));
    }

    #[test]
    fn empty_refreshes_are_harmless() {
        let mut gone = HashMap::new();
        let evicted = advance_gone_counts(&mut gone, &set(&[]), &set(&[]));
        assert!(evicted.is_empty());
        assert!(gone.is_empty());
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let interval = Duration::from_secs(300);
        for _ in 0..100 {
            let j = jittered(interval);
            assert!(j >= Duration::from_secs(270));
            assert!(j <= Duration::from_secs(330));
        }
    }
}
