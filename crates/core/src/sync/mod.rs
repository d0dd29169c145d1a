//! Sync orchestrator - decides when a sync is due, drives the pipeline from
//! catalog to store, and records the outcome in the sync history.

mod runner;
mod sink;

pub use runner::*;
pub use sink::*;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::config::AnnaConfig;
use crate::processor::ProcessError;
use crate::store::StoreError;
use crate::swarm::SwarmError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Swarm(#[from] SwarmError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("no metadata torrent found in catalog")]
    NoMetadataTorrent,

    #[error("sync cancelled")]
    Cancelled,
}

/// How a sync attempt ended.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// A full pass over all shards succeeded.
    Completed { base: String, records: u64 },
    /// The latest catalog bundle was already ingested; nothing to do.
    AlreadyCurrent { base: String },
}

/// Settings driving the orchestrator.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Time between sync attempts, measured from the last recorded sync.
    pub interval: Duration,
    /// Swarm scratch directory, purged after a successful sync.
    pub data_dir: PathBuf,
    /// Skip the post-sync purge.
    pub keep_files: bool,
    /// Block instead of syncing.
    pub disable_sync: bool,
    /// Restrict the shard pattern to one index.
    pub archive_id: Option<String>,
}

impl From<&AnnaConfig> for SyncConfig {
    fn from(config: &AnnaConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.sync_interval_secs),
            data_dir: config.torrent_data_dir.clone(),
            keep_files: config.keep_files,
            disable_sync: config.disable_sync,
            archive_id: config.archive_id.clone(),
        }
    }
}
