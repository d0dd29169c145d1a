//! Mock swarm client for testing.
//!
//! Serves registered in-memory torrents. File content can be made available
//! progressively to exercise the streaming path: readers block until bytes
//! are released with [`MockFile::set_available`].

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;

use crate::swarm::{FilePriority, SwarmClient, SwarmError, SwarmFile, SwarmTorrent};

/// In-memory swarm client.
#[derive(Default)]
pub struct MockSwarm {
    torrents: Mutex<HashMap<String, Arc<MockTorrent>>>,
    added: Mutex<Vec<String>>,
    add_latency: Mutex<Duration>,
}

impl MockSwarm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `add_magnet` call, widening race windows in tests.
    pub fn set_add_latency(&self, latency: Duration) {
        *self.add_latency.lock().unwrap() = latency;
    }

    /// Register a torrent served for `magnet`. Returns the handle so tests
    /// can inspect priorities or advance file availability.
    pub fn register_torrent(&self, magnet: &str, files: Vec<MockFile>) -> Arc<MockTorrent> {
        let torrent = Arc::new(MockTorrent {
            files,
            removed: AtomicBool::new(false),
        });
        self.torrents
            .lock()
            .unwrap()
            .insert(magnet.to_string(), Arc::clone(&torrent));
        torrent
    }

    /// Magnets passed to `add_magnet`, in call order.
    pub fn added_magnets(&self) -> Vec<String> {
        self.added.lock().unwrap().clone()
    }
}

#[async_trait]
impl SwarmClient for MockSwarm {
    async fn add_magnet(&self, magnet: &str) -> Result<Arc<dyn SwarmTorrent>, SwarmError> {
        let latency = *self.add_latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.added.lock().unwrap().push(magnet.to_string());

        let torrent = self
            .torrents
            .lock()
            .unwrap()
            .get(magnet)
            .cloned()
            .ok_or_else(|| SwarmError::AddMagnet(format!("unknown magnet: {}", magnet)))?;
        Ok(torrent)
    }
}

/// A registered in-memory torrent.
pub struct MockTorrent {
    files: Vec<MockFile>,
    removed: AtomicBool,
}

impl MockTorrent {
    /// Whether `remove` was called.
    pub fn removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    /// Priority last assigned to the file at `path`, if any.
    pub fn file_priority(&self, path: &str) -> Option<FilePriority> {
        let file = self.files.iter().find(|f| f.inner.path == path)?;
        *file.inner.priority.lock().unwrap()
    }

    /// Whether `start_download` was called for the file at `path`.
    pub fn download_started(&self, path: &str) -> bool {
        self.files
            .iter()
            .find(|f| f.inner.path == path)
            .is_some_and(|f| f.inner.started.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl SwarmTorrent for MockTorrent {
    async fn await_metadata(&self, cancel: &CancellationToken) -> Result<(), SwarmError> {
        if cancel.is_cancelled() {
            return Err(SwarmError::Cancelled);
        }
        Ok(())
    }

    fn files(&self) -> Result<Vec<Arc<dyn SwarmFile>>, SwarmError> {
        Ok(self
            .files
            .iter()
            .map(|f| Arc::new(f.clone()) as Arc<dyn SwarmFile>)
            .collect())
    }

    async fn remove(&self) -> Result<(), SwarmError> {
        self.removed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// One file of a mock torrent.
#[derive(Clone)]
pub struct MockFile {
    inner: Arc<FileInner>,
}

struct FileInner {
    path: String,
    content: Bytes,
    available: AtomicU64,
    wakers: Mutex<Vec<Waker>>,
    priority: Mutex<Option<FilePriority>>,
    started: AtomicBool,
}

impl MockFile {
    /// A file whose content is fully available from the start.
    pub fn new(path: &str, content: Vec<u8>) -> Self {
        let length = content.len() as u64;
        Self::with_available(path, content, length)
    }

    /// A file with only the first `available` bytes downloaded; release more
    /// with [`MockFile::set_available`].
    pub fn with_available(path: &str, content: Vec<u8>, available: u64) -> Self {
        Self {
            inner: Arc::new(FileInner {
                path: path.to_string(),
                content: Bytes::from(content),
                available: AtomicU64::new(available),
                wakers: Mutex::new(Vec::new()),
                priority: Mutex::new(None),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Make the first `bytes` of the content readable, waking blocked
    /// readers.
    pub fn set_available(&self, bytes: u64) {
        self.inner.available.store(bytes, Ordering::SeqCst);
        let wakers = std::mem::take(&mut *self.inner.wakers.lock().unwrap());
        for waker in wakers {
            waker.wake();
        }
    }

    /// Release the entire content.
    pub fn complete(&self) {
        self.set_available(self.inner.content.len() as u64);
    }
}

#[async_trait]
impl SwarmFile for MockFile {
    fn path(&self) -> &str {
        &self.inner.path
    }

    fn length(&self) -> u64 {
        self.inner.content.len() as u64
    }

    fn bytes_completed(&self) -> u64 {
        self.inner
            .available
            .load(Ordering::SeqCst)
            .min(self.length())
    }

    async fn set_priority(&self, priority: FilePriority) -> Result<(), SwarmError> {
        *self.inner.priority.lock().unwrap() = Some(priority);
        Ok(())
    }

    async fn start_download(&self) -> Result<(), SwarmError> {
        self.inner.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn reader(&self, _read_ahead: u64) -> Result<Box<dyn AsyncRead + Send + Unpin>, SwarmError> {
        Ok(Box::new(MockReader {
            inner: Arc::clone(&self.inner),
            position: 0,
        }))
    }
}

/// Reader over a mock file that blocks until bytes become available, the way
/// a swarm reader does for pieces still in flight.
struct MockReader {
    inner: Arc<FileInner>,
    position: u64,
}

impl AsyncRead for MockReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let length = this.inner.content.len() as u64;

        loop {
            let available = this.inner.available.load(Ordering::SeqCst).min(length);

            if this.position < available {
                let start = this.position as usize;
                let end = available as usize;
                let n = buf.remaining().min(end - start);
                buf.put_slice(&this.inner.content[start..start + n]);
                this.position += n as u64;
                return Poll::Ready(Ok(()));
            }

            if this.position >= length {
                // Clean EOF.
                return Poll::Ready(Ok(()));
            }

            // Park until more bytes are released, re-checking afterwards to
            // avoid a lost wakeup between the load and the registration.
            this.inner.wakers.lock().unwrap().push(cx.waker().clone());
            if this.inner.available.load(Ordering::SeqCst).min(length) > this.position {
                continue;
            }
            return Poll::Pending;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_reader_serves_full_content() {
        let file = MockFile::new("a.bin", b"hello world".to_vec());
        let mut reader = file.reader(0).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn test_reader_blocks_until_bytes_released() {
        let file = MockFile::with_available("a.bin", b"abcdef".to_vec(), 2);
        let mut reader = file.reader(0).unwrap();

        let mut buf = [0u8; 6];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ab");

        let release = file.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            release.complete();
        });

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"cdef");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_add_magnet_records_and_resolves() {
        let swarm = MockSwarm::new();
        swarm.register_torrent("magnet:?xt=urn:btih:aa", vec![]);

        let torrent = swarm.add_magnet("magnet:?xt=urn:btih:aa").await.unwrap();
        assert!(torrent.files().unwrap().is_empty());
        assert_eq!(swarm.added_magnets(), vec!["magnet:?xt=urn:btih:aa"]);

        assert!(swarm.add_magnet("magnet:?xt=urn:btih:zz").await.is_err());
    }
}
