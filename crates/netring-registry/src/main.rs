use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};

use netring_registry::analysis::ExpectedMembersAnalyzer;
use netring_registry::args::Args;
use netring_registry::cleanup;
use netring_registry::config::RegistryConfig;
use netring_registry::router;
use netring_registry::state::AppState;
use netring_store::{MemoryStore, RedisStore, SharedStore};

const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    netring_common::telemetry::init_tracing("netring-registry");

    let cfg = RegistryConfig::load(args.config.as_deref())?;

    let store: SharedStore = match cfg.store.backend.as_str() {
        "memory" => {
            tracing::warn!("using in-memory store, state will not survive restarts");
            Arc::new(MemoryStore::new())
        }
        "redis" => Arc::new(
            RedisStore::connect(
                &cfg.store.host,
                cfg.store.port,
                cfg.store.db,
                cfg.store.password.as_deref(),
            )
            .await?,
        ),
        other => anyhow::bail!("unknown store backend '{other}'"),
    };

    let analyzer = if cfg.expected_members.enable_missing_detection {
        match ExpectedMembersAnalyzer::from_file(Path::new(&cfg.expected_members.config_file)) {
            Ok(analyzer) => {
                tracing::info!(file = %cfg.expected_members.config_file, "missing-member detection enabled");
                Some(analyzer)
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load expected members config, detection disabled");
                None
            }
        }
    } else {
        None
    };

    let cleanup_interval = Duration::from_secs(cfg.cleanup_interval);
    let missing_check_interval = Duration::from_secs(cfg.expected_members.missing_check_interval);
    let st = AppState::new(store, cfg, analyzer);

    let sweep_state = st.clone();
    st.supervisor
        .spawn("cleanup", Duration::ZERO, cleanup_interval, move || {
            let st = sweep_state.clone();
            async move { cleanup::run_cleanup_sweep(&st).await }
        });
    if st.analyzer.is_some() {
        let check_state = st.clone();
        st.supervisor.spawn(
            "missing_check",
            missing_check_interval,
            missing_check_interval,
            move || {
                let st = check_state.clone();
                async move { netring_registry::analysis::run_missing_check(&st).await }
            },
        );
    }
    st.supervisor
        .start_monitor(netring_common::supervisor::DEFAULT_HEALTH_CHECK_INTERVAL);

    let addr = format!("{}:{}", st.cfg.server.host, st.cfg.server.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "netring registry listening");

    let app = router(st.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(st.clone()))
        .await?;

    Ok(())
}

async fn shutdown_signal(st: AppState) {
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }

    tracing::info!("shutdown signal received, draining");
    st.supervisor.shutdown();

    // In-flight requests get a bounded drain window.
    tokio::spawn(async move {
        tokio::time::sleep(SHUTDOWN_DRAIN).await;
        tracing::warn!("drain window elapsed, exiting");
        std::process::exit(0);
    });
}
