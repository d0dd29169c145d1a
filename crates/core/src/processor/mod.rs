//! Shard processor - streams compressed NDJSON shards out of an incomplete
//! torrent download and feeds decoded records to a sink.

mod record;
mod shards;

pub use record::*;
pub use shards::*;

use async_trait::async_trait;
use thiserror::Error;

use crate::swarm::SwarmError;

/// Which per-file percentage a progress callback reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    Download,
    Processing,
}

/// Receiver for everything the shard processor produces.
///
/// Progress callbacks must not block; they are invoked from the hot record
/// loop and from the download sampler.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Called once with the ordered shard paths before any record.
    async fn on_files(&self, paths: &[String]);

    /// Called with a 0-100 percentage for one shard path.
    async fn on_progress(&self, path: &str, kind: ProgressKind, percent: f64);

    /// Called for every successfully decoded record, in file byte order
    /// within a shard. An error aborts the owning shard.
    async fn on_record(&self, record: RawRecord) -> Result<(), SinkError>;
}

/// Error raised by a sink while persisting a record.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SinkError {
    message: String,
}

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Fatal error within a single shard worker.
#[derive(Debug, Error)]
pub enum ShardError {
    #[error("read error at line {line}: {source}")]
    Read {
        line: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("sink error at line {line}: {source}")]
    Sink {
        line: u64,
        #[source]
        source: SinkError,
    },

    #[error("cancelled")]
    Cancelled,
}

/// Error covering a whole processing pass over a torrent.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Swarm(#[from] SwarmError),

    #[error("invalid shard pattern: {0}")]
    Pattern(String),

    #[error("shard {path} failed: {source}")]
    Shard {
        path: String,
        #[source]
        source: ShardError,
    },

    #[error("shard worker panicked")]
    WorkerPanic,
}

/// Result of one fully processed shard.
#[derive(Debug, Clone)]
pub struct ShardOutcome {
    pub path: String,
    pub records: u64,
    pub lines: u64,
}
