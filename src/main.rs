use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use tubefeed::config::Config;
use tubefeed::feed::{AggregatorConfig, AvatarEnricher, ChannelResolver, FeedAggregator, FeedFetcher};
use tubefeed::progress::ProgressBroadcaster;
use tubefeed::storage::SubscriptionStore;
use tubefeed::web::{create_router, AppState};

/// Get the user's home directory from $HOME.
fn home_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home))
}

#[derive(Parser, Debug)]
#[command(name = "tubefeed", about = "Aggregated channel feed server")]
struct Args {
    /// Config file (default: ~/.config/tubefeed/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address, overrides `bind` from the config file
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Data directory, overrides `data_dir` from the config file
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => home_dir()?.join(".config").join("tubefeed").join("config.toml"),
    };
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(dir) = args.data_dir {
        config.data_dir = Some(dir);
    }

    let data_dir = match config.data_dir.clone() {
        Some(dir) => dir,
        None => home_dir()?.join(".local").join("share").join("tubefeed"),
    };
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    // Per-request timeouts are applied by each component
    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(config.concurrency.max(1))
        .pool_idle_timeout(std::time::Duration::from_secs(30))
        .tcp_keepalive(std::time::Duration::from_secs(60))
        .build()
        .context("Failed to build HTTP client")?;

    let upstream = config.upstream_base_url.clone();
    let store = Arc::new(SubscriptionStore::in_dir(&data_dir));
    let fetcher = FeedFetcher::new(client.clone(), upstream.clone(), config.feed_timeout());
    let resolver = ChannelResolver::new(client.clone(), upstream.clone(), config.resolve_timeout());
    let enricher = AvatarEnricher::new(client, upstream.clone(), config.avatar_timeout());

    let aggregator = Arc::new(FeedAggregator::new(
        fetcher.clone(),
        Arc::clone(&store),
        ProgressBroadcaster::new(),
        enricher,
        AggregatorConfig {
            concurrency: config.concurrency,
            cache_ttl: config.cache_ttl(),
        },
    ));

    let state = Arc::new(AppState {
        aggregator,
        resolver,
        fetcher,
        store,
        upstream_base_url: upstream,
    });

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(
        addr = %listener.local_addr()?,
        data_dir = %data_dir.display(),
        "Listening"
    );

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await
        .context("Server error")?;

    Ok(())
}
