use anyhow::{Context, Result};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use swarmshare::core::config::Config;
use swarmshare::core::listener::spawn_server;
use swarmshare::core::state::TrackerState;
use swarmshare::core::tracing_init::init_tracing;
use swarmshare::handlers::tracker::TrackerService;
use swarmshare::protocol::codec::WireSettings;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

fn main() -> Result<()> {
    let mut config = Config::load().context(format!(
        "Failed to load configuration. Set {} or place {} in the working directory.",
        swarmshare::core::config::CONFIG_ENV,
        swarmshare::core::config::DEFAULT_CONFIG_FILE
    ))?;

    // optional port argument overrides the configured one
    if let Some(arg) = env::args().nth(1) {
        config.tracker.port = arg
            .parse()
            .context(format!("Invalid port '{}'", arg))?;
    }

    init_tracing(&config.logging);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.num_threads)
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    runtime.block_on(async_main(config))
}

async fn async_main(config: Config) -> Result<()> {
    info!(
        bind_address = %config.tracker.bind_address,
        port = config.tracker.port,
        num_threads = config.server.num_threads,
        max_connections = config.tracker.max_connections,
        log_level = %config.logging.level,
        log_format = %config.logging.format,
        "Tracker starting"
    );

    let addr = format!("{}:{}", config.tracker.bind_address, config.tracker.port);
    let listener = TcpListener::bind(&addr)
        .await
        .context(format!("Failed to bind tracker listener to {}", addr))?;

    let state = TrackerState::new(config.clone());
    let service = Arc::new(TrackerService::new(state.clone()));
    let server = spawn_server(
        listener,
        service,
        config.tracker.max_connections,
        WireSettings::from(&config.network),
    )
    .context("Failed to start tracker listener")?;

    info!(address = %server.local_addr(), "Tracker listening");

    spawn_stats_task(state.clone());

    shutdown_signal().await;
    server.stop().await;

    let snapshot = state.metrics.get_snapshot(&state.registry);
    info!(
        total_requests = snapshot.total_requests,
        failed_requests = snapshot.failed_requests,
        dropped_connections = snapshot.dropped_connections,
        torrents = snapshot.torrents,
        uptime_seconds = snapshot.uptime_seconds,
        "Tracker stopped"
    );

    Ok(())
}

/// Periodically log request counters and registry totals
fn spawn_stats_task(state: TrackerState) {
    tokio::spawn(async move {
        let period = Duration::from_secs(state.config.tracker.stats_interval);
        let mut interval = tokio::time::interval(period);
        // first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;

            let snapshot = state.metrics.get_snapshot(&state.registry);
            info!(
                total_requests = snapshot.total_requests,
                success_rate = snapshot.success_rate,
                requests_per_second = snapshot.requests_per_second,
                uploads = snapshot.uploads,
                lookups = snapshot.lookups,
                torrents = snapshot.torrents,
                seeders = snapshot.seeders,
                leechers = snapshot.leechers,
                "Tracker stats"
            );
        }
    });
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Shutdown signal received, stopping tracker");
}
