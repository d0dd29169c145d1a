//! Annex core - mirrors the Anna's Archive metadata corpus into Postgres and
//! serves on-demand file downloads out of the same swarm session.
//!
//! The crate is organized around the ingestion pipeline:
//! catalog -> swarm -> processor -> store, orchestrated by [`sync`], with
//! [`progress`] and [`stats`] observing it and [`download`] sharing the swarm
//! client for single-file fetches.

pub mod catalog;
pub mod config;
pub mod download;
pub mod isbn;
pub mod processor;
pub mod progress;
pub mod stats;
pub mod store;
pub mod swarm;
pub mod sync;
pub mod testing;

pub use catalog::{pick_latest_metadata, CatalogError, TorrentEntry, TorrentIndex, TorrentIndexClient};
pub use config::{load_config, validate_config, Config, ConfigError};
pub use download::{DownloadError, DownloadStatus, FileDownloader};
pub use progress::ProgressRegistry;
pub use stats::{CachedStats, StatsCache};
pub use store::{MetadataStore, PgStore, StoreError};
pub use swarm::{LibrqbitSwarm, SwarmClient, SwarmError};
pub use sync::{SyncConfig, SyncError, SyncOrchestrator, SyncOutcome};
