use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reelfetch_core::{
    load_config, spawn_sweeper, validate_config, AcquisitionOrchestrator, CredentialStore,
    EgressPool, FsCredentialLoader, HttpRouteProber, JobScheduler, JobStore, SqliteDurableTier,
    YtDlpBackend,
};
use reelfetch_server::api::create_router;
use reelfetch_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("reelfetch v{}", VERSION);

    // Determine config path
    let config_path = std::env::var("REELFETCH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Invalid configuration")?;

    // Job store
    info!("Opening job database at {:?}", config.database.path);
    let durable = SqliteDurableTier::new(&config.database.path)
        .with_context(|| format!("Failed to open database {:?}", config.database.path))?;
    let jobs = Arc::new(JobStore::with_retention(
        Arc::new(durable),
        chrono::Duration::hours(config.jobs.retention_hours as i64),
    ));

    // Egress pool
    let prober = Arc::new(HttpRouteProber::new(
        config.egress.probe_url.clone(),
        Duration::from_secs(config.egress.probe_timeout_secs),
    ));
    let egress = Arc::new(
        EgressPool::from_config(config.egress.clone(), prober)
            .context("Failed to load egress routes")?,
    );
    if egress.is_empty() {
        warn!("No egress routes configured; attempts will use direct connections");
    }

    // Credentials
    let loader = Arc::new(FsCredentialLoader::new(&config.credentials));
    let credentials = Arc::new(CredentialStore::new(config.credentials.clone(), loader));
    if credentials.get_valid().await.is_none() {
        warn!("No valid credentials found; credentialed strategies will be skipped");
    }

    // Acquisition
    let backend = Arc::new(YtDlpBackend::new(config.acquisition.downloader.clone()));
    let orchestrator = Arc::new(AcquisitionOrchestrator::new(
        Arc::clone(&jobs),
        Arc::clone(&egress),
        Arc::clone(&credentials),
        backend,
        config.acquisition.clone(),
    ));
    let scheduler = Arc::new(JobScheduler::new(Arc::clone(&jobs), orchestrator));

    scheduler
        .resume_unfinished()
        .context("Failed to resume unfinished jobs")?;
    let scheduler_handle = scheduler.start();

    // Background maintenance
    let shutdown = CancellationToken::new();
    let sweeper_handle = spawn_sweeper(
        Arc::clone(&jobs),
        Duration::from_secs(config.jobs.sweep_interval_secs),
        shutdown.clone(),
    );
    let probe_handle = egress.spawn_probe_loop(shutdown.clone());
    let refresh_handle = credentials.spawn_refresh_loop(shutdown.clone());

    let addr = SocketAddr::new(config.server.host, config.server.port);

    // Create application state
    let state = Arc::new(AppState::new(
        config,
        Arc::clone(&jobs),
        Arc::clone(&scheduler),
        Arc::clone(&egress),
        Arc::clone(&credentials),
    ));

    // Create router
    let app = create_router(state);

    // Start server
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");

    // Running jobs stay `running` in the durable tier and resume on next start.
    scheduler.stop();
    shutdown.cancel();

    if let Some(handle) = scheduler_handle {
        let _ = handle.await;
    }
    let _ = tokio::join!(sweeper_handle, probe_handle, refresh_handle);
    info!("Background tasks stopped");

    Ok(())
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
