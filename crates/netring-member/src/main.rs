use std::path::Path;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};

use netring_member::args::Args;
use netring_member::config::MemberConfig;
use netring_member::probes::SystemTracer;
use netring_member::state::{MemberState, SharedMember};
use netring_member::{identity, loops, net, router};

const DEREGISTER_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    netring_common::telemetry::init_tracing("netring-member");

    let cfg = MemberConfig::load(args.config.as_deref())?;

    let instance_id = identity::load_or_create(
        Path::new(&cfg.identity_file),
        cfg.instance_id.as_deref(),
    )?;
    let advertise_ip = net::advertise_ip(cfg.host_ip.as_deref());

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let st = MemberState::new(cfg, instance_id, advertise_ip, Box::new(SystemTracer));

    tracing::info!(
        instance_id = %st.instance_id,
        location = %st.cfg.location,
        advertise_ip = %st.advertise_ip,
        "starting netring member"
    );

    loops::spawn_all(&st);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "member server listening");

    let app = router(st.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(st.clone()))
        .await?;

    Ok(())
}

async fn shutdown_signal(st: SharedMember) {
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

    tracing::info!("shutdown signal received, deregistering");
    if let Err(e) = st
        .registry
        .deregister(&st.instance_id, DEREGISTER_TIMEOUT)
        .await
    {
        tracing::warn!(error = %e, "best-effort deregister failed");
    }

    st.supervisor.shutdown();
    // Give loops a moment to observe the signal, then drop anything left.
    tokio::time::sleep(Duration::from_millis(200)).await;
    st.supervisor.abort_all();
}
