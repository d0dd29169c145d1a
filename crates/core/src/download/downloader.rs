use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::swarm::{SwarmClient, SwarmTorrent};

use super::{
    DownloadError, DownloadProgressEvent, DownloadStatus, DownloadTracker, ProgressSubscription,
};

/// Shared slot a single-flight leader fills with the download result.
type FlightSlot = Arc<AsyncMutex<Option<Result<Bytes, DownloadError>>>>;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Fetches single files out of torrents on demand.
///
/// Concurrent requests for the same `(torrent_name, output_filename)` pair
/// collapse into one download whose result every caller receives. Finished
/// files are cached in the storage directory when one is configured.
pub struct FileDownloader {
    swarm: Arc<dyn SwarmClient>,
    storage_dir: Option<PathBuf>,
    poll_interval: Duration,
    /// Trackers for in-flight downloads, keyed by output filename.
    active: Mutex<HashMap<String, Arc<DownloadTracker>>>,
    /// Single-flight slots, keyed by `<torrent_name>-<output_filename>`.
    flights: Mutex<HashMap<String, FlightSlot>>,
}

impl FileDownloader {
    pub fn new(swarm: Arc<dyn SwarmClient>, storage_dir: Option<PathBuf>) -> Self {
        Self {
            swarm,
            storage_dir,
            poll_interval: DEFAULT_POLL_INTERVAL,
            active: Mutex::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Override the completion poll cadence.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Download one file from a torrent and return its contents.
    ///
    /// `server_path` is the record's server-side path (e.g.
    /// `g5/zlib1/zlib1/pilimi-zlib-6160000-7229999/7225029`), `torrent_name`
    /// the torrent display name, and `output_filename` the cache filename.
    pub async fn download_file(
        &self,
        magnet_link: &str,
        server_path: &str,
        torrent_name: &str,
        output_filename: &str,
        cancel: &CancellationToken,
    ) -> Result<Bytes, DownloadError> {
        if let Some(data) = self.read_cached(output_filename).await {
            info!(file = %output_filename, "file found in storage");
            return Ok(data);
        }

        let tracker = {
            let mut active = self.active.lock().unwrap();
            Arc::clone(
                active
                    .entry(output_filename.to_string())
                    .or_insert_with(|| Arc::new(DownloadTracker::new())),
            )
        };

        let key = format!("{}-{}", torrent_name, output_filename);
        let (slot, leader_guard) = {
            let mut flights = self.flights.lock().unwrap();
            match flights.get(&key) {
                Some(slot) => (Arc::clone(slot), None),
                None => {
                    let slot: FlightSlot = Arc::new(AsyncMutex::new(None));
                    // Lock before publishing so followers block until the
                    // result is stored.
                    let guard = Arc::clone(&slot).try_lock_owned().ok();
                    flights.insert(key.clone(), Arc::clone(&slot));
                    (slot, guard)
                }
            }
        };

        match leader_guard {
            Some(mut guard) => {
                // Another caller may have finished while we were racing for
                // the slot; check the cache again before downloading.
                let result = match self.read_cached(output_filename).await {
                    Some(data) => Ok(data),
                    None => {
                        self.download_internal(
                            magnet_link,
                            server_path,
                            torrent_name,
                            output_filename,
                            &tracker,
                            cancel,
                        )
                        .await
                    }
                };

                *guard = Some(result.clone());
                tracker.complete();
                self.active.lock().unwrap().remove(output_filename);
                self.flights.lock().unwrap().remove(&key);
                drop(guard);
                result
            }
            None => {
                let slot = slot.lock().await;
                match slot.as_ref() {
                    Some(result) => result.clone(),
                    // Leader vanished without storing a result.
                    None => match self.read_cached(output_filename).await {
                        Some(data) => Ok(data),
                        None => Err(DownloadError::Aborted),
                    },
                }
            }
        }
    }

    async fn download_internal(
        &self,
        magnet_link: &str,
        server_path: &str,
        torrent_name: &str,
        output_filename: &str,
        tracker: &DownloadTracker,
        cancel: &CancellationToken,
    ) -> Result<Bytes, DownloadError> {
        let torrent = self.swarm.add_magnet(magnet_link).await?;

        let result = self
            .fetch_from_torrent(&torrent, server_path, torrent_name, tracker, cancel)
            .await;

        if let Err(e) = torrent.remove().await {
            warn!(error = %e, "failed to drop on-demand torrent");
        }

        let data = result?;
        if let Some(dir) = &self.storage_dir {
            self.persist(dir, output_filename, &data).await;
        }
        Ok(data)
    }

    async fn fetch_from_torrent(
        &self,
        torrent: &Arc<dyn SwarmTorrent>,
        server_path: &str,
        torrent_name: &str,
        tracker: &DownloadTracker,
        cancel: &CancellationToken,
    ) -> Result<Bytes, DownloadError> {
        info!(torrent = %torrent_name, "waiting for torrent info");
        torrent.await_metadata(cancel).await?;

        let search_path = resolve_search_path(server_path, torrent_name);
        debug!(search_path = %search_path, "looking for file in torrent");

        let suffix = format!("/{}", search_path);
        let files = torrent.files()?;
        let file = files
            .iter()
            .find(|f| f.path() == search_path || f.path().ends_with(&suffix))
            .ok_or_else(|| DownloadError::NotFound(search_path.clone()))?;

        let total = file.length();
        info!(path = %file.path(), size = total, "found file in torrent, downloading");

        file.start_download().await?;
        tracker.update(0, total);

        while file.bytes_completed() < total {
            tracker.update(file.bytes_completed(), total);
            tokio::select! {
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        tracker.update(total, total);

        // Bound the read to the declared length: the stream may carry piece
        // padding past the end of the file.
        let reader = file.reader(0)?;
        let mut data = Vec::with_capacity(total as usize);
        reader
            .take(total)
            .read_to_end(&mut data)
            .await
            .map_err(|e| DownloadError::Io(e.to_string()))?;

        info!(size = data.len(), "file read into memory");
        Ok(Bytes::from(data))
    }

    async fn persist(&self, dir: &Path, output_filename: &str, data: &[u8]) {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(dir = %dir.display(), error = %e, "failed to create storage directory");
            return;
        }
        let path = dir.join(output_filename);
        match tokio::fs::write(&path, data).await {
            Ok(()) => info!(path = %path.display(), size = data.len(), "file saved to storage"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to write file to storage"),
        }
    }

    async fn read_cached(&self, output_filename: &str) -> Option<Bytes> {
        let dir = self.storage_dir.as_ref()?;
        tokio::fs::read(dir.join(output_filename))
            .await
            .ok()
            .map(Bytes::from)
    }

    /// Current status of a file: cached on disk, being downloaded, or
    /// untouched.
    pub async fn status(&self, output_filename: &str) -> DownloadStatus {
        if let Some(dir) = &self.storage_dir {
            if tokio::fs::try_exists(dir.join(output_filename))
                .await
                .unwrap_or(false)
            {
                return DownloadStatus::Downloaded;
            }
        }
        if self.active.lock().unwrap().contains_key(output_filename) {
            return DownloadStatus::Downloading;
        }
        DownloadStatus::NotStarted
    }

    /// Subscribe to progress events of an in-flight download. Returns `None`
    /// when no download is active for the file.
    pub fn subscribe_progress(
        &self,
        output_filename: &str,
    ) -> Option<(mpsc::Receiver<DownloadProgressEvent>, ProgressSubscription)> {
        let tracker = {
            let active = self.active.lock().unwrap();
            Arc::clone(active.get(output_filename)?)
        };
        Some(DownloadTracker::subscribe(&tracker))
    }
}

/// Compute the in-torrent path to look for.
///
/// The server path carries a server-side prefix followed by the torrent
/// directory; the search path starts at the torrent base name when present,
/// falling back to the last path component.
fn resolve_search_path(server_path: &str, torrent_name: &str) -> String {
    let base_name = torrent_name.strip_suffix(".torrent").unwrap_or(torrent_name);

    if !base_name.is_empty() {
        if let Some(index) = server_path.find(base_name) {
            return server_path[index..].to_string();
        }
    }

    server_path
        .rsplit('/')
        .next()
        .unwrap_or(server_path)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_search_path_with_base_name_match() {
        assert_eq!(
            resolve_search_path(
                "g5/zlib1/zlib1/pilimi-zlib-6160000-7229999/7225029",
                "pilimi-zlib-6160000-7229999.torrent",
            ),
            "pilimi-zlib-6160000-7229999/7225029"
        );
    }

    #[test]
    fn test_resolve_search_path_fallback_to_last_component() {
        assert_eq!(
            resolve_search_path("some/other/layout/7225029", "unrelated.torrent"),
            "7225029"
        );
    }

    #[test]
    fn test_resolve_search_path_without_torrent_suffix() {
        assert_eq!(
            resolve_search_path("x/bundle/file.epub", "bundle"),
            "bundle/file.epub"
        );
    }

    #[test]
    fn test_resolve_search_path_flat_server_path() {
        assert_eq!(resolve_search_path("7225029", "other.torrent"), "7225029");
    }
}
