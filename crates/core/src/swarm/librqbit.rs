//! librqbit embedded swarm implementation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use librqbit::{
    AddTorrent, AddTorrentOptions, AddTorrentResponse, ManagedTorrent, Session, SessionOptions,
};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{FilePriority, SwarmClient, SwarmError, SwarmFile, SwarmTorrent};

/// Embedded librqbit session shared by the sync pipeline and the on-demand
/// downloader.
pub struct LibrqbitSwarm {
    session: Arc<Session>,
}

impl LibrqbitSwarm {
    /// Initialize a session writing into `data_dir`, creating it if needed.
    pub async fn new(data_dir: &Path) -> Result<Self, SwarmError> {
        let data_dir = PathBuf::from(data_dir);
        if !data_dir.exists() {
            std::fs::create_dir_all(&data_dir).map_err(|e| {
                SwarmError::SessionInit(format!("failed to create data directory: {}", e))
            })?;
        }

        info!(data_dir = %data_dir.display(), "initializing librqbit session");

        let session = Session::new_with_opts(data_dir, SessionOptions::default())
            .await
            .map_err(|e| SwarmError::SessionInit(e.to_string()))?;

        if let Some(port) = session.tcp_listen_port() {
            info!(port = port, "librqbit listening on TCP port");
        }

        Ok(Self { session })
    }
}

#[async_trait]
impl SwarmClient for LibrqbitSwarm {
    async fn add_magnet(&self, magnet: &str) -> Result<Arc<dyn SwarmTorrent>, SwarmError> {
        // Added paused with no file selected; files start downloading only
        // once a caller asks for them.
        let opts = AddTorrentOptions {
            paused: true,
            overwrite: true,
            ..Default::default()
        };

        let response = self
            .session
            .add_torrent(AddTorrent::from_url(magnet), Some(opts))
            .await
            .map_err(|e| SwarmError::AddMagnet(e.to_string()))?;

        let handle = match response {
            AddTorrentResponse::Added(_, handle) => {
                debug!(hash = %handle.info_hash().as_string(), "torrent added");
                handle
            }
            AddTorrentResponse::AlreadyManaged(_, handle) => {
                debug!(hash = %handle.info_hash().as_string(), "torrent already managed");
                handle
            }
            AddTorrentResponse::ListOnly(_) => {
                return Err(SwarmError::AddMagnet(
                    "torrent was added in list-only mode".to_string(),
                ));
            }
        };

        Ok(Arc::new(LibrqbitTorrent {
            session: Arc::clone(&self.session),
            handle,
            selected: Arc::new(Mutex::new(HashSet::new())),
            unpaused: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct LibrqbitTorrent {
    session: Arc<Session>,
    handle: Arc<ManagedTorrent>,
    /// File indices a caller asked to download.
    selected: Arc<Mutex<HashSet<usize>>>,
    unpaused: Arc<AtomicBool>,
}

#[async_trait]
impl SwarmTorrent for LibrqbitTorrent {
    async fn await_metadata(&self, cancel: &CancellationToken) -> Result<(), SwarmError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(SwarmError::Cancelled),
            result = self.handle.wait_until_initialized() => {
                result.map_err(|e| SwarmError::Metadata(e.to_string()))
            }
        }
    }

    fn files(&self) -> Result<Vec<Arc<dyn SwarmFile>>, SwarmError> {
        let metadata = self.handle.metadata.load();
        let metadata = metadata
            .as_ref()
            .ok_or_else(|| SwarmError::Metadata("torrent metadata not yet available".into()))?;
        let files = metadata
            .file_infos
            .iter()
            .enumerate()
            .map(|(index, info)| {
                Arc::new(LibrqbitFile {
                    session: Arc::clone(&self.session),
                    handle: Arc::clone(&self.handle),
                    selected: Arc::clone(&self.selected),
                    unpaused: Arc::clone(&self.unpaused),
                    index,
                    path: info.relative_filename.to_string_lossy().replace('\\', "/"),
                    length: info.len,
                }) as Arc<dyn SwarmFile>
            })
            .collect();

        Ok(files)
    }

    async fn remove(&self) -> Result<(), SwarmError> {
        // Engine resources only; bytes stay on disk until the post-sync purge.
        self.session
            .delete(self.handle.id().into(), false)
            .await
            .map_err(|e| SwarmError::Api(format!("failed to remove torrent: {}", e)))?;
        debug!(hash = %self.handle.info_hash().as_string(), "torrent removed");
        Ok(())
    }
}

struct LibrqbitFile {
    session: Arc<Session>,
    handle: Arc<ManagedTorrent>,
    selected: Arc<Mutex<HashSet<usize>>>,
    unpaused: Arc<AtomicBool>,
    index: usize,
    path: String,
    length: u64,
}

#[async_trait]
impl SwarmFile for LibrqbitFile {
    fn path(&self) -> &str {
        &self.path
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn bytes_completed(&self) -> u64 {
        self.handle
            .stats()
            .file_progress
            .get(self.index)
            .copied()
            .unwrap_or(0)
    }

    async fn set_priority(&self, priority: FilePriority) -> Result<(), SwarmError> {
        // librqbit has no per-file piece priority; selective download plus
        // stream scheduling covers the ordering, so the hint is acknowledged
        // and logged only.
        warn!(
            path = %self.path,
            priority = ?priority,
            "per-file piece priorities not supported by librqbit"
        );
        Ok(())
    }

    async fn start_download(&self) -> Result<(), SwarmError> {
        let only_files = {
            let mut selected = self.selected.lock().unwrap();
            selected.insert(self.index);
            selected.clone()
        };

        self.session
            .update_only_files(&self.handle, &only_files)
            .await
            .map_err(|e| SwarmError::Api(format!("failed to select file: {}", e)))?;

        if !self.unpaused.swap(true, Ordering::SeqCst) {
            self.session
                .unpause(&self.handle)
                .await
                .map_err(|e| SwarmError::Api(format!("failed to start torrent: {}", e)))?;
        }

        Ok(())
    }

    fn reader(&self, _read_ahead: u64) -> Result<Box<dyn AsyncRead + Send + Unpin>, SwarmError> {
        // librqbit manages stream read-ahead internally; the hint is implied.
        let stream = self.handle.clone().stream(self.index).map_err(|e| SwarmError::Stream {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        Ok(Box::new(stream))
    }
}
