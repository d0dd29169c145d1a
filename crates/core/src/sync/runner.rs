use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::catalog::{pick_latest_metadata, TorrentIndex};
use crate::processor::{RecordSink, ShardProcessor};
use crate::progress::ProgressRegistry;
use crate::stats::StatsCache;
use crate::store::{MetadataStore, Synchronization};
use crate::swarm::SwarmClient;

use super::{DatabaseSink, SyncConfig, SyncError, SyncOutcome};

/// Delay before retrying when the sync history itself cannot be read.
const HISTORY_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Owns the periodic sync loop: catalog refresh, bundle selection, shard
/// ingestion, history bookkeeping, and the post-sync stats refresh.
pub struct SyncOrchestrator {
    config: SyncConfig,
    index: Arc<dyn TorrentIndex>,
    swarm: Arc<dyn SwarmClient>,
    store: Arc<dyn MetadataStore>,
    progress: Arc<ProgressRegistry>,
    stats: Arc<StatsCache>,
    processor: ShardProcessor,
}

impl SyncOrchestrator {
    pub fn new(
        config: SyncConfig,
        index: Arc<dyn TorrentIndex>,
        swarm: Arc<dyn SwarmClient>,
        store: Arc<dyn MetadataStore>,
        progress: Arc<ProgressRegistry>,
        stats: Arc<StatsCache>,
    ) -> Self {
        let processor = ShardProcessor::new(config.archive_id.clone());
        Self {
            config,
            index,
            swarm,
            store,
            progress,
            stats,
            processor,
        }
    }

    /// Most recent synchronization row, complete or not.
    pub async fn last_sync(&self) -> Result<Option<Synchronization>, SyncError> {
        Ok(self.store.last_sync().await?)
    }

    /// Run the sync loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            let sleep = match self.store.last_sync().await {
                Ok(Some(last)) => {
                    let due = last.date
                        + chrono::Duration::from_std(self.config.interval)
                            .unwrap_or(chrono::Duration::zero());
                    (due - Utc::now()).to_std().unwrap_or(Duration::ZERO)
                }
                Ok(None) => Duration::ZERO,
                Err(e) => {
                    error!(error = %e, "failed to read sync history");
                    HISTORY_RETRY_DELAY
                }
            };

            if !sleep.is_zero() {
                info!(seconds = sleep.as_secs(), "next sync scheduled");
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(sleep) => {}
            }

            match self.sync_once(&cancel).await {
                Ok(SyncOutcome::Completed { base, records }) => {
                    info!(base = %base, records, "sync completed");
                }
                Ok(SyncOutcome::AlreadyCurrent { base }) => {
                    info!(base = %base, "sync already performed with this torrent");
                }
                Err(SyncError::Cancelled) => {}
                Err(e) => {
                    error!(error = %e, "sync failed");
                }
            }

            // Regardless of outcome: clear the live progress and refresh the
            // stats cache so readers see the post-sync state.
            self.progress.end_sync();
            if let Err(e) = self.stats.compute_and_cache(true).await {
                warn!(error = %e, "failed to refresh stats cache");
            }

            if cancel.is_cancelled() {
                return;
            }
        }
    }

    /// One sync attempt, from catalog fetch to history row.
    pub async fn sync_once(&self, cancel: &CancellationToken) -> Result<SyncOutcome, SyncError> {
        let last = self.store.last_sync().await?;

        let entries = self.index.fetch().await?;
        info!(torrents = entries.len(), "fetched torrent catalog");
        self.store.upsert_torrents(&entries).await?;

        let torrent = pick_latest_metadata(&entries)
            .ok_or(SyncError::NoMetadataTorrent)?
            .clone();

        if self.config.disable_sync {
            warn!("sync disabled, blocking until shutdown");
            cancel.cancelled().await;
            return Err(SyncError::Cancelled);
        }

        if let Some(last) = &last {
            if last.base == torrent.display_name {
                self.store
                    .create_sync(&Synchronization {
                        date: Utc::now(),
                        base: torrent.display_name.clone(),
                        complete: false,
                    })
                    .await?;
                return Ok(SyncOutcome::AlreadyCurrent {
                    base: torrent.display_name,
                });
            }
        }

        info!(magnet = %torrent.magnet_link, "starting sync");

        let handle = self.swarm.add_magnet(&torrent.magnet_link).await?;
        let sink: Arc<dyn RecordSink> = Arc::new(DatabaseSink::new(
            Arc::clone(&self.store),
            Arc::clone(&self.progress),
            torrent.display_name.clone(),
        ));

        let outcomes = self.processor.process(handle, sink, cancel.clone()).await?;
        let records: u64 = outcomes.iter().map(|o| o.records).sum();
        info!(records, shards = outcomes.len(), "sync pass finished");

        if !self.config.keep_files {
            info!(dir = %self.config.data_dir.display(), "purging torrent data directory");
            if let Err(e) = tokio::fs::remove_dir_all(&self.config.data_dir).await {
                warn!(error = %e, "failed to purge torrent data directory");
            }
        }

        self.store
            .create_sync(&Synchronization {
                date: Utc::now(),
                base: torrent.display_name.clone(),
                complete: true,
            })
            .await?;

        Ok(SyncOutcome::Completed {
            base: torrent.display_name,
            records,
        })
    }
}
