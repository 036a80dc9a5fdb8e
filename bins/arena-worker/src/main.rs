mod config;
mod driver;
mod engine;
mod evaluator;
mod executor;


use anyhow::{Context, Result};
use arena_common::languages::LanguageRegistry;
use arena_common::store::{JobStore, RedisJobStore};
use arena_common::types::LanguageId;
use config::{BackendKind, WorkerConfig};
use driver::DriverGenerator;
use engine::{ExecutionEngine, LocalEngine, RemoteEngine};
use executor::Orchestrator;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

/// BLPOP wait; bounds how long a worker takes to notice shutdown
const DEQUEUE_WAIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Arena worker booting...");

    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    let registry = LanguageRegistry::load_or_builtin(config.languages_file.as_deref())
        .context("Failed to load language profiles")?;
    let languages = config.languages(&registry)?;

    let names: Vec<&str> = languages
        .iter()
        .filter_map(|id| registry.get(*id).map(|p| p.name.as_str()))
        .collect();
    info!(languages = ?names, concurrency = config.concurrency, "Worker configured");

    let engine: Arc<dyn ExecutionEngine> = match config.backend {
        BackendKind::Local => Arc::new(LocalEngine::new(config.timeouts.compile)),
        BackendKind::Remote => {
            let remote = config
                .remote
                .clone()
                .context("remote backend selected without service settings")?;
            info!(url = %remote.base_url, "Using remote execution service");
            Arc::new(RemoteEngine::new(remote)?)
        }
    };
    info!(backend = engine.name(), "Execution backend ready");

    let orchestrator = Orchestrator::new(
        Arc::new(registry),
        engine,
        Arc::new(DriverGenerator::new()?),
        config.timeouts.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = Vec::with_capacity(config.concurrency);
    for worker_id in 0..config.concurrency {
        // BLPOP blocks its connection, so every loop gets its own
        let store = RedisJobStore::connect(&config.store)
            .await
            .with_context(|| format!("Failed to connect to Redis at {}", config.store.redis_url))?;
        workers.push(tokio::spawn(worker_loop(
            worker_id,
            store,
            orchestrator.clone(),
            languages.clone(),
            shutdown_rx.clone(),
        )));
    }
    info!(redis = %config.store.redis_url, "Connected to Redis");

    signal::ctrl_c()
        .await
        .context("Failed to install CTRL+C signal handler")?;
    warn!("Received shutdown signal, finishing in-flight jobs...");
    let _ = shutdown_tx.send(true);

    for joined in futures_util::future::join_all(workers).await {
        if let Err(e) = joined {
            error!(error = %e, "Worker task failed");
        }
    }

    info!("Worker shutdown complete");
    Ok(())
}

#[instrument(skip(store, orchestrator, languages, shutdown))]
async fn worker_loop<S: JobStore>(
    worker_id: usize,
    store: S,
    orchestrator: Orchestrator,
    languages: Vec<LanguageId>,
    shutdown: watch::Receiver<bool>,
) {
    while !*shutdown.borrow() {
        match store.dequeue(&languages, DEQUEUE_WAIT).await {
            Ok(Some(job)) => {
                let job_id = job.id;
                info!(job_id = %job_id, language = %job.language, "Received job");
                if let Err(e) = executor::process_job(&store, &orchestrator, job).await {
                    error!(job_id = %job_id, error = %e, "Failed to record job state");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
    info!("Worker loop stopped");
}
