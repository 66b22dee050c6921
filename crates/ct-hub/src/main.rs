use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ct_core::QueryStoreError;
use ct_store::{
    IndexNaming, MemoryDataStore, MemoryIndex, MemoryTableManager, ShardPeriod, ShardedIndex,
    Table, TableMetadataManager,
};

mod actions;
mod api;
mod cache;
mod executor;
mod store;

use actions::{ActionContext, ActionRegistry};
use api::AppState;
use cache::MemoryResultCache;
use executor::{QueryExecutor, WorkerPool};
use store::QueryStore;

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(name = "ct-hub", version, about = "CANTATA analytics hub")]
struct Args {
    /// Server bind address (overrides `[server] bind`)
    #[arg(long)]
    bind: Option<String>,

    /// Path to config file
    #[arg(long, default_value = "ct-hub.toml")]
    config: PathBuf,
}

// =============================================================================
// Config
// =============================================================================

#[derive(Deserialize, Default, Clone, Debug)]
struct Config {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    executor: ExecutorConfig,
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    index: IndexConfig,
    /// Tables registered at start-up.
    #[serde(default)]
    tables: Vec<Table>,
}

#[derive(Deserialize, Clone, Debug)]
struct ServerConfig {
    #[serde(default = "default_bind")]
    bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
struct ExecutorConfig {
    #[serde(default = "default_workers")]
    workers: usize,
    #[serde(default = "default_queue_depth")]
    queue_depth: usize,
    #[serde(default = "default_query_timeout")]
    query_timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: default_queue_depth(),
            query_timeout_ms: default_query_timeout(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
struct IndexConfig {
    #[serde(default = "default_prefix")]
    prefix: String,
    #[serde(default)]
    period: ShardPeriod,
    #[serde(default = "default_max_limit")]
    max_limit: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            period: ShardPeriod::default(),
            max_limit: default_max_limit(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:4000".into()
}
fn default_workers() -> usize {
    4
}
fn default_queue_depth() -> usize {
    256
}
fn default_query_timeout() -> u64 {
    10_000
}
fn default_ttl_secs() -> u64 {
    300
}
fn default_max_entries() -> usize {
    10_000
}
fn default_prefix() -> String {
    "cantata".into()
}
fn default_max_limit() -> usize {
    ct_core::DEFAULT_QUERY_LIMIT
}

#[derive(Debug, Error)]
enum StartupError {
    #[error("invalid bind address: {0}")]
    Bind(#[from] std::net::AddrParseError),
    #[error(transparent)]
    Store(#[from] QueryStoreError),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Missing, unreadable or invalid files fall back to defaults.
fn load_config(path: &PathBuf) -> Config {
    if !path.exists() {
        tracing::info!("No config at {:?}, using defaults", path);
        return Config::default();
    }
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!("Cannot read config {:?}: {}, using defaults", path, e);
            return Config::default();
        }
    };
    toml::from_str(&content).unwrap_or_else(|e| {
        tracing::warn!("Invalid config {:?}: {}, using defaults", path, e);
        Config::default()
    })
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "ct_hub=info,ct_store=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = load_config(&args.config);

    let tables = Arc::new(MemoryTableManager::new());
    for table in &config.tables {
        tables.save(table).await?;
    }

    let context = Arc::new(ActionContext {
        tables,
        store: Arc::new(MemoryDataStore::new()),
        index: Arc::new(ShardedIndex::new(
            Arc::new(MemoryIndex::new()),
            IndexNaming::new(config.index.prefix.clone(), config.index.period),
            config.index.max_limit,
        )),
    });

    let executor = Arc::new(QueryExecutor::new(
        Arc::new(ActionRegistry::with_defaults()?),
        context.clone(),
        Arc::new(MemoryResultCache::new(
            Duration::from_secs(config.cache.ttl_secs),
            config.cache.max_entries,
        )),
        WorkerPool::new(config.executor.workers, config.executor.queue_depth),
        Duration::from_millis(config.executor.query_timeout_ms),
    ));

    let state = Arc::new(AppState {
        executor,
        store: Arc::new(QueryStore::new(&context)),
        started_at: chrono::Utc::now(),
    });
    let app = api::router(state);

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let addr: SocketAddr = bind.parse()?;
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("  CANTATA v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("  API:        http://{}/analytics", addr);
    tracing::info!("  Health:     http://{}/health", addr);
    tracing::info!("  Tables:     {}", config.tables.len());
    tracing::info!(
        "  Workers:    {} (queue {})",
        config.executor.workers,
        config.executor.queue_depth
    );
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
