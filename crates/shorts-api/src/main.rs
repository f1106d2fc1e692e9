//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shorts_api::{create_router, metrics, ApiConfig, AppState, StaleJobDetector};
use shorts_queue::QueueBackend;
use shorts_worker::{JobExecutor, JobRunner, SimulatedStage, WorkerConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("rustls crypto provider was already installed");
    }

    init_tracing();

    info!("Starting shorts-api");

    if let Err(e) = run().await {
        error!("Server error: {:#}", e);
        std::process::exit(1);
    }

    info!("Server shutdown complete");
}

fn init_tracing() {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,shorts=debug,sqlx=warn"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ApiConfig::from_env();
    info!(
        "API config: host={}, port={}, production={}",
        config.host,
        config.port,
        config.is_production()
    );

    let queue_backend = QueueBackend::from_env()?;
    let state = AppState::new(config.clone(), queue_backend)
        .await
        .context("failed to create application state")?;

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics()?)
    } else {
        None
    };

    let stale_detector = StaleJobDetector::new(
        Arc::clone(&state.store),
        state.dispatcher.clone(),
        config.stale_detection.clone(),
    );
    let detector_handle = tokio::spawn(async move {
        stale_detector.run().await;
    });

    // An in-memory queue is only visible to this process, so it needs a worker here
    let embedded = if queue_backend == QueueBackend::Memory {
        Some(spawn_embedded_worker(&state))
    } else {
        None
    };

    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid bind address")?;

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    detector_handle.abort();

    if let Some((executor, handle)) = embedded {
        executor.shutdown();
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Embedded worker stopped with error: {}", e),
            Err(e) => warn!("Embedded worker task panicked: {}", e),
        }
    }

    Ok(())
}

type EmbeddedWorker = (Arc<JobExecutor>, JoinHandle<shorts_worker::WorkerResult<()>>);

fn spawn_embedded_worker(state: &AppState) -> EmbeddedWorker {
    let config = WorkerConfig::from_env();
    info!(
        worker_id = %config.worker_id,
        max_concurrent_jobs = config.max_concurrent_jobs,
        "Starting embedded worker"
    );

    let stage = Arc::new(SimulatedStage::new(config.simulated.clone()));
    let runner = Arc::new(JobRunner::new(Arc::clone(&state.store), stage, config.job_timeout));
    let executor = Arc::new(JobExecutor::new(config, Arc::clone(&state.queue), runner));

    let handle = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move { executor.run().await })
    };

    (executor, handle)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
