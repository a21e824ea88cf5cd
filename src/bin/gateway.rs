//! OLAP Gateway command line
//!
//! Offline tooling around the query-processing core.
//!
//! # Configuration
//!
//! The binary reads configuration from:
//! 1. `--config` (path to TOML file)
//! 2. `GATEWAY_CONFIG` environment variable
//! 3. `./gateway.toml` in current directory
//! 4. Default configuration
//!
//! Environment overrides (`GATEWAY_WORKERS`, `GATEWAY_HOST`,
//! `GATEWAY_REDIS_URL`, `GATEWAY_CACHE_TTL`, `RUST_LOG`) apply on top.
//!
//! # Example Usage
//!
//! ```bash
//! # Print the fingerprint and MDX of a request
//! olap-gateway compile request.json
//!
//! # Run a request end to end against recorded rows
//! olap-gateway run request.json --rows rows.json --user alice --client c1
//!
//! # Show this host's queues
//! olap-gateway queues --host edge-7 --workers 8
//!
//! # Validate configuration
//! olap-gateway --config /etc/gateway.toml check-config
//! ```

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use olap_gateway::{
    compiler::compile,
    config::{CacheBackend, Config},
    delivery::BroadcastSink,
    materialize::RowSet,
    redis::sanitize_url,
    ExecutionBackend, Fingerprint, QueryProcessor, QueryRequest,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "olap-gateway")]
#[command(version)]
#[command(about = "Query-processing core of an OLAP gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (overrides GATEWAY_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the fingerprint and compiled query text of a request
    Compile {
        /// Request JSON file
        request: PathBuf,
    },

    /// Process a request end to end against recorded rows
    Run {
        /// Request JSON file
        request: PathBuf,

        /// Rows JSON file: `{"columns": [...], "rows": [[...], ...]}`
        #[arg(short, long)]
        rows: PathBuf,

        /// Submitting user
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Client connection identifier
        #[arg(long, default_value = "cli")]
        client: String,
    },

    /// List the queues a host owns
    Queues {
        /// Host identifier (defaults to the configured host)
        #[arg(long)]
        host: Option<String>,

        /// Worker count (defaults to the configured count)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Validate configuration and print a summary
    CheckConfig,
}

// =============================================================================
// Configuration Loading
// =============================================================================

fn config_path(cli: &Cli) -> Option<PathBuf> {
    if let Some(path) = &cli.config {
        return Some(path.clone());
    }
    if let Ok(path) = std::env::var("GATEWAY_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let local = Path::new("gateway.toml");
    local.exists().then(|| local.to_path_buf())
}

fn load_config(cli: &Cli) -> olap_gateway::Result<Config> {
    let config = match config_path(cli) {
        Some(path) => Config::from_file_with_env(path)?,
        None => Config::from_env(),
    };
    config.validate()?;
    Ok(config)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&contents)
        .map_err(|e| format!("Failed to parse {}: {}", path.display(), e).into())
}

// =============================================================================
// Recorded Backend
// =============================================================================

/// Answers every query with the same recorded rows
struct RecordedBackend {
    rows: RowSet,
}

#[async_trait]
impl ExecutionBackend for RecordedBackend {
    async fn execute(
        &self,
        query_text: &str,
        _request: &QueryRequest,
    ) -> olap_gateway::Result<Option<RowSet>> {
        info!(query = query_text, rows = self.rows.len(), "Replaying recorded rows");
        Ok(Some(self.rows.clone()))
    }
}

// =============================================================================
// CLI Command Handlers
// =============================================================================

fn cmd_compile(request: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let request: QueryRequest = read_json(request)?;

    println!("Fingerprint: {}", Fingerprint::of(&request)?);
    println!("Query:");
    println!("{}", compile(&request)?);
    Ok(())
}

async fn cmd_run(
    config: &Config,
    request: &Path,
    rows: &Path,
    user: &str,
    client: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let request: QueryRequest = read_json(request)?;
    let rows: RowSet = read_json(rows)?;

    let sink = Arc::new(BroadcastSink::default());
    let mut receiver = sink.subscribe();

    let processor = QueryProcessor::builder()
        .backend(Arc::new(RecordedBackend { rows }))
        .cache(config.cache.build_cache()?)
        .cache_ttl(config.cache.default_ttl_secs)
        .sink(sink.clone())
        .workers(config.processor.workers)
        .host(config.processor.host.clone())
        .build()?;

    let job_id = processor.submit(request, user, client);
    let processed = processor.run_local().await;
    info!(job_id = %job_id, processed, "Local run finished");

    while let Ok(delivery) = receiver.try_recv() {
        println!("[{}] {}", delivery.channel, delivery.method);
        println!("{}", delivery.payload);
    }

    let (delivered, dropped, failures) = sink.stats().counts();
    if dropped > 0 || failures > 0 {
        warn!(delivered, dropped, failures, "Some deliveries were lost");
    }
    Ok(())
}

fn cmd_queues(config: &Config, host: Option<&str>, workers: Option<usize>) {
    let mut processor = config.processor.clone();
    if let Some(workers) = workers {
        processor.workers = workers;
    }
    let host = host.unwrap_or(&config.processor.host);

    for queue in processor.queues(host) {
        println!("{}", queue);
    }
}

fn cmd_check_config(config: &Config) {
    println!("Configuration is valid!");
    println!();
    println!("Processor Settings:");
    println!("  Host: {}", config.processor.host);
    println!("  Workers: {}", config.processor.workers);
    println!(
        "  Queues: {}",
        config.processor.queues(&config.processor.host).len()
    );
    println!();
    println!("Cache Settings:");
    println!("  Backend: {:?}", config.cache.backend);
    if config.cache.backend == CacheBackend::Redis {
        println!("  URL: {}", sanitize_url(&config.cache.redis_url));
        println!("  Key prefix: {}", config.cache.key_prefix);
    }
    println!("  TTL: {}s", config.cache.default_ttl_secs);
    println!();
    println!("  Log level: {}", config.logging.level);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Compile { request } => cmd_compile(request)?,
        Commands::Run {
            request,
            rows,
            user,
            client,
        } => cmd_run(&config, request, rows, user, client).await?,
        Commands::Queues { host, workers } => cmd_queues(&config, host.as_deref(), *workers),
        Commands::CheckConfig => cmd_check_config(&config),
    }

    Ok(())
}
