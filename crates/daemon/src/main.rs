use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use annex_core::{
    load_config, validate_config, LibrqbitSwarm, MetadataStore, PgStore, ProgressRegistry,
    StatsCache, SwarmClient, SyncConfig, SyncOrchestrator, TorrentIndex, TorrentIndexClient,
};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config().context("Failed to load configuration")?;
    validate_config(&config).context("Configuration validation failed")?;
    info!(domain = %config.anna.domain, "configuration loaded");

    let store: Arc<PgStore> = Arc::new(
        PgStore::connect(&config.database)
            .await
            .context("Failed to connect to database")?,
    );
    store.ping().await.context("Database not reachable")?;

    let swarm: Arc<dyn SwarmClient> = Arc::new(
        LibrqbitSwarm::new(&config.anna.torrent_data_dir)
            .await
            .context("Failed to initialize swarm session")?,
    );

    let index: Arc<dyn TorrentIndex> = Arc::new(
        TorrentIndexClient::new(&config.anna.domain)
            .context("Failed to build torrent index client")?,
    );

    let progress = Arc::new(ProgressRegistry::new());
    let stats = Arc::new(StatsCache::new(
        Arc::clone(&store) as Arc<dyn MetadataStore>
    ));

    // Warm the stats cache in the background; before the first complete sync
    // there is nothing to compute and callers see "not ready".
    {
        let stats = Arc::clone(&stats);
        tokio::spawn(async move {
            if let Err(e) = stats.compute_and_cache(false).await {
                error!(error = %e, "initial stats computation failed");
            }
        });
    }

    let orchestrator = SyncOrchestrator::new(
        SyncConfig::from(&config.anna),
        index,
        swarm,
        store as Arc<dyn MetadataStore>,
        progress,
        stats,
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                cancel.cancel();
            }
        });
    }

    orchestrator.run(cancel).await;
    info!("sync orchestrator stopped");

    Ok(())
}
