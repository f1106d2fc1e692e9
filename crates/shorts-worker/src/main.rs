//! Job worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shorts_queue::{QueueBackend, QueueConfig};
use shorts_store::StoreConfig;
use shorts_worker::{metrics, JobExecutor, JobRunner, SimulatedStage, WorkerConfig};

#[tokio::main]
async fn main() {
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("rustls crypto provider was already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting shorts-worker");

    if let Err(e) = run().await {
        error!("Worker error: {:#}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

fn init_tracing() {
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
    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        metrics::install_exporter(port)?;
        info!("Metrics listener on port {}", port);
    }

    if QueueBackend::from_env()? == QueueBackend::Memory {
        anyhow::bail!(
            "QUEUE_BACKEND=memory cannot be shared across processes; run the API with its embedded worker instead"
        );
    }

    let store = shorts_store::connect(&StoreConfig::from_env()?).await?;
    let queue = shorts_queue::connect(QueueBackend::Redis, QueueConfig::from_env()).await?;

    let stage = Arc::new(SimulatedStage::new(config.simulated.clone()));
    let runner = Arc::new(JobRunner::new(store, stage, config.job_timeout));
    let executor = Arc::new(JobExecutor::new(config, queue, runner));

    let signal_handle = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
            executor.shutdown();
        })
    };

    executor.run().await?;
    signal_handle.abort();

    Ok(())
}
