mod handlers;
mod metrics;
mod routes;

use anyhow::{Context, Result};
use arena_common::config::StoreConfig;
use arena_common::languages::LanguageRegistry;
use arena_common::store::{JobStore, RedisJobStore};
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub registry: Arc<LanguageRegistry>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Arena API booting...");

    let store_config = StoreConfig::from_env().context("Invalid store configuration")?;
    let languages_file = std::env::var("ARENA_LANGUAGES_FILE").ok().map(PathBuf::from);
    let registry = LanguageRegistry::load_or_builtin(languages_file.as_deref())
        .context("Failed to load language profiles")?;

    let store = RedisJobStore::connect(&store_config)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", store_config.redis_url))?;
    info!("Connected to Redis: {}", store_config.redis_url);

    metrics::register();

    let state = Arc::new(AppState {
        store: Arc::new(store),
        registry: Arc::new(registry),
    });

    let app = Router::new().merge(routes::routes()).with_state(state);

    let addr = std::env::var("ARENA_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);
    info!("Ready to accept jobs");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Received shutdown signal");
            }
        })
        .await
        .context("Server error")?;

    Ok(())
}
