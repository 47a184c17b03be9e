use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::time::now_ts;

pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

type IterFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type IterFn = Arc<dyn Fn() -> IterFuture + Send + Sync>;

#[derive(Debug, Clone, Serialize)]
pub struct TaskHealth {
    pub alive: bool,
    pub last_tick: i64,
    pub restart_count: u64,
}

struct TaskEntry {
    iteration: IterFn,
    period: Duration,
    handle: JoinHandle<()>,
    last_tick: Arc<AtomicI64>,
    restart_count: u64,
    last_restart: Option<i64>,
}

/// Runs named background loops that survive iteration failures, report
/// liveness ticks, and get replaced by the stall monitor when they stop
/// ticking. The only sanctioned way to run background work in either
/// binary.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    tasks: DashMap<String, TaskEntry>,
    shutdown: watch::Sender<bool>,
    backoff: Duration,
    task_timeout: Duration,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self::with_config(DEFAULT_BACKOFF, DEFAULT_TASK_TIMEOUT)
    }

    pub fn with_config(backoff: Duration, task_timeout: Duration) -> Self {
        let (shutdown, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                tasks: DashMap::new(),
                shutdown,
                backoff,
                task_timeout,
            }),
        }
    }

    /// Spawn a supervised loop. `iteration` runs one cycle; an `Err` is
    /// logged and the loop resumes after the backoff instead of dying.
    /// A tick is recorded after every successful cycle.
    pub fn spawn<F, Fut>(&self, name: &str, initial_delay: Duration, period: Duration, iteration: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let iteration: IterFn = Arc::new(move || Box::pin(iteration()) as IterFuture);
        let last_tick = Arc::new(AtomicI64::new(now_ts()));

        let handle = tokio::spawn(run_loop(
            name.to_string(),
            iteration.clone(),
            initial_delay,
            period,
            self.inner.backoff,
            last_tick.clone(),
            self.inner.shutdown.subscribe(),
        ));

        self.inner.tasks.insert(
            name.to_string(),
            TaskEntry {
                iteration,
                period,
                handle,
                last_tick,
                restart_count: 0,
                last_restart: None,
            },
        );
    }

    /// Start the stall monitor: every `interval` it replaces tasks whose
    /// last tick is older than the task timeout, and revives tasks whose
    /// join handle finished unexpectedly.
    pub fn start_monitor(&self, interval: Duration) {
        let inner = self.inner.clone();
        let mut shutdown = inner.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                if !sleep_or_shutdown(interval, &mut shutdown).await {
                    break;
                }
                if *inner.shutdown.borrow() {
                    break;
                }
                let now = now_ts();
                for mut entry in inner.tasks.iter_mut() {
                    let stalled_for = now - entry.last_tick.load(Ordering::Relaxed);
                    let dead = entry.handle.is_finished();
                    if !dead && stalled_for <= inner.task_timeout.as_secs() as i64 {
                        continue;
                    }
                    let name = entry.key().clone();
                    tracing::error!(task = %name, stalled_for, dead, "task stalled, replacing");
                    entry.handle.abort();
                    let e = entry.value_mut();
                    e.last_tick.store(now, Ordering::Relaxed);
                    e.restart_count += 1;
                    e.last_restart = Some(now);
                    e.handle = tokio::spawn(run_loop(
                        name,
                        e.iteration.clone(),
                        Duration::ZERO,
                        e.period,
                        inner.backoff,
                        e.last_tick.clone(),
                        inner.shutdown.subscribe(),
                    ));
                }
            }
        });
    }

    pub fn health(&self) -> BTreeMap<String, TaskHealth> {
        self.inner
            .tasks
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    TaskHealth {
                        alive: !entry.handle.is_finished(),
                        last_tick: entry.last_tick.load(Ordering::Relaxed),
                        restart_count: entry.restart_count,
                    },
                )
            })
            .collect()
    }

    /// True when any supervised task was replaced within the window.
    pub fn restarted_within(&self, window: Duration) -> bool {
        let cutoff = now_ts() - window.as_secs() as i64;
        self.inner
            .tasks
            .iter()
            .any(|entry| entry.last_restart.is_some_and(|at| at >= cutoff))
    }

    /// Signal every supervised loop (and the monitor) to break cleanly at
    /// its next wait point.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
    }

    /// Hard-abort anything still running after a graceful window.
    pub fn abort_all(&self) {
        for entry in self.inner.tasks.iter() {
            entry.handle.abort();
        }
    }
}

async fn run_loop(
    name: String,
    iteration: IterFn,
    initial_delay: Duration,
    period: Duration,
    backoff: Duration,
    last_tick: Arc<AtomicI64>,
    mut shutdown: watch::Receiver<bool>,
) {
    if *shutdown.borrow() {
        return;
    }
    if !initial_delay.is_zero() && !sleep_or_shutdown(initial_delay, &mut shutdown).await {
        tracing::info!(task = %name, "stopped");
        return;
    }

    loop {
        let delay = match iteration().await {
            Ok(()) => {
                last_tick.store(now_ts(), Ordering::Relaxed);
                period
            }
            Err(e) => {
                tracing::error!(task = %name, error = %e, "task iteration failed, continuing");
                backoff
            }
        };
        if !sleep_or_shutdown(delay, &mut shutdown).await {
            break;
        }
    }
    tracing::info!(task = %name, "stopped");
}

/// Returns false when shutdown was signalled before the sleep elapsed.
async fn sleep_or_shutdown(dur: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(dur) => true,
        res = shutdown.changed() => match res {
            Ok(()) => !*shutdown.borrow(),
            Err(_) => false,
        },
    }
}
