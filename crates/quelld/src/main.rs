//! Quell driver - run graph queries through the normalized cache

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use quellcache::{CacheOptions, ClientConfig, QuellClient, StorageScope, TypeMaps};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Client config file (JSON: endpoint, fieldToType, typeToCollectionField, options)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Endpoint URL, overrides the config file
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Query text
    #[arg(short, long, conflicts_with = "query_file")]
    query: Option<String>,

    /// File holding the query text
    #[arg(long)]
    query_file: Option<PathBuf>,

    /// Number of times to run the query
    #[arg(short, long, default_value_t = 1)]
    repeat: usize,

    /// Entry time-to-live in seconds
    #[arg(long)]
    cache_time: Option<u64>,

    /// Store lifetime
    #[arg(long, value_enum)]
    scope: Option<Scope>,

    /// Local store directory
    #[arg(short, long)]
    data: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Scope {
    Session,
    Local,
}

impl From<Scope> for StorageScope {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::Session => StorageScope::Session,
            Scope::Local => StorageScope::Local,
        }
    }
}

/// Config file plus command-line overrides
fn build_config(args: &Args) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig {
            endpoint: String::new(),
            maps: TypeMaps::new(),
            options: CacheOptions::default(),
        },
    };

    if let Some(endpoint) = &args.endpoint {
        config.endpoint = endpoint.clone();
    }
    if config.endpoint.is_empty() {
        bail!("No endpoint: pass --endpoint or set it in the config file");
    }
    if let Some(seconds) = args.cache_time {
        config.options.cache_time_seconds = seconds;
    }
    if let Some(scope) = args.scope {
        config.options.storage_scope = scope.into();
    }
    if let Some(data) = &args.data {
        config.options.storage_path = data.clone();
    }

    Ok(config)
}

fn read_query(args: &Args) -> Result<String> {
    match (&args.query, &args.query_file) {
        (Some(query), _) => Ok(query.clone()),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read query file {}", path.display())),
        (None, None) => bail!("No query: pass --query or --query-file"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;
    let query = read_query(&args)?;

    info!("Starting Quell driver v{}", env!("CARGO_PKG_VERSION"));
    info!("Endpoint: {}", config.endpoint);
    info!(
        "Store: {:?} (ttl {}s, path {})",
        config.options.storage_scope,
        config.options.cache_time_seconds,
        config.options.storage_path.display()
    );

    let client = QuellClient::from_config(config)?;

    for run in 1..=args.repeat.max(1) {
        let started = Instant::now();
        let response = client.query(&query).await?;
        info!("Run {} answered in {:?}", run, started.elapsed());
        println!("{}", serde_json::to_string_pretty(&response)?);
    }

    let stats = client.stats();
    info!(
        "Hits: {}, partial: {}, misses: {}, pass-through: {}, mutations: {}",
        stats.hits(),
        stats.partial_hits(),
        stats.misses(),
        stats.pass_throughs(),
        stats.mutations()
    );
    info!(
        "Entries written: {}, uncacheable: {}, hit ratio: {:.2}",
        stats.entries_written(),
        stats.uncacheable(),
        stats.hit_ratio()
    );

    Ok(())
}
