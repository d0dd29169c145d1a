//! Swarm adapter - wraps a BitTorrent engine behind narrow traits so the
//! ingestion pipeline and the on-demand downloader can share one session and
//! tests can run against an in-memory double.

mod librqbit;

pub use librqbit::LibrqbitSwarm;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("failed to initialize swarm session: {0}")]
    SessionInit(String),

    #[error("failed to add magnet: {0}")]
    AddMagnet(String),

    #[error("torrent metadata unavailable: {0}")]
    Metadata(String),

    #[error("failed to open stream for {path}: {message}")]
    Stream { path: String, message: String },

    #[error("swarm operation failed: {0}")]
    Api(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Download priority for a file within a torrent.
///
/// `Now` outranks `High`, which outranks `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FilePriority {
    Normal,
    High,
    Now,
}

/// A process-wide BitTorrent session.
#[async_trait]
pub trait SwarmClient: Send + Sync {
    /// Add a torrent by magnet link. Idempotent: re-adding a known torrent
    /// returns a handle to the existing one.
    async fn add_magnet(&self, magnet: &str) -> Result<Arc<dyn SwarmTorrent>, SwarmError>;
}

/// Handle to one torrent managed by the session.
#[async_trait]
pub trait SwarmTorrent: Send + Sync {
    /// Wait until the torrent's metadata (file list, lengths) is known.
    async fn await_metadata(&self, cancel: &CancellationToken) -> Result<(), SwarmError>;

    /// Enumerate the torrent's files. Requires metadata.
    fn files(&self) -> Result<Vec<Arc<dyn SwarmFile>>, SwarmError>;

    /// Release engine resources for this torrent. On-disk bytes are kept.
    async fn remove(&self) -> Result<(), SwarmError>;
}

/// One file inside a torrent.
#[async_trait]
pub trait SwarmFile: Send + Sync {
    /// Path of the file inside the torrent, `/`-separated.
    fn path(&self) -> &str;

    /// Declared length in bytes.
    fn length(&self) -> u64;

    /// Bytes of this file the swarm has verified so far.
    fn bytes_completed(&self) -> u64;

    /// Hint the engine about this file's download priority.
    async fn set_priority(&self, priority: FilePriority) -> Result<(), SwarmError>;

    /// Mark this file wanted and start fetching its pieces.
    async fn start_download(&self) -> Result<(), SwarmError>;

    /// Open a sequential reader over the file's bytes. The reader blocks
    /// until requested bytes have been downloaded. `read_ahead` is a hint in
    /// bytes for how far ahead of the read position the engine should fetch.
    fn reader(&self, read_ahead: u64) -> Result<Box<dyn AsyncRead + Send + Unpin>, SwarmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(FilePriority::Now > FilePriority::High);
        assert!(FilePriority::High > FilePriority::Normal);
    }
}
