//! Torrent index client - fetches the upstream torrent catalog and picks the
//! metadata bundle to ingest.

mod client;
mod types;

pub use client::*;
pub use types::*;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to fetch torrent catalog: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected status code from torrent catalog: {0}")]
    Status(u16),

    #[error("malformed torrent catalog: {0}")]
    Malformed(String),
}

/// Source of the upstream torrent catalog.
#[async_trait]
pub trait TorrentIndex: Send + Sync {
    /// Fetch the full catalog.
    async fn fetch(&self) -> Result<Vec<TorrentEntry>, CatalogError>;
}
