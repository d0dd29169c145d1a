//! On-demand file downloads - fetch a single file out of a torrent, dedup
//! concurrent identical requests, cache to disk, and publish progress events.

mod downloader;
mod tracker;

pub use downloader::*;
pub use tracker::*;

use thiserror::Error;

use crate::swarm::SwarmError;

/// Errors of the on-demand download path. `Clone` so a single-flight result
/// can be broadcast to every waiter.
#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    #[error("swarm error: {0}")]
    Swarm(String),

    #[error("file not found in torrent: {0}")]
    NotFound(String),

    #[error("failed to read file: {0}")]
    Io(String),

    #[error("download cancelled")]
    Cancelled,

    #[error("download aborted")]
    Aborted,
}

impl From<SwarmError> for DownloadError {
    fn from(error: SwarmError) -> Self {
        match error {
            SwarmError::Cancelled => DownloadError::Cancelled,
            other => DownloadError::Swarm(other.to_string()),
        }
    }
}
