//! Mock torrent index for testing.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::catalog::{CatalogError, TorrentEntry, TorrentIndex};

/// In-memory torrent index serving a scripted catalog.
#[derive(Default)]
pub struct MockTorrentIndex {
    entries: Mutex<Vec<TorrentEntry>>,
    fail_next: Mutex<Option<u16>>,
}

impl MockTorrentIndex {
    pub fn new(entries: Vec<TorrentEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            fail_next: Mutex::new(None),
        }
    }

    /// Replace the catalog served by subsequent fetches.
    pub fn set_entries(&self, entries: Vec<TorrentEntry>) {
        *self.entries.lock().unwrap() = entries;
    }

    /// Make the next fetch fail with the given status code.
    pub fn fail_next_with_status(&self, status: u16) {
        *self.fail_next.lock().unwrap() = Some(status);
    }
}

#[async_trait]
impl TorrentIndex for MockTorrentIndex {
    async fn fetch(&self) -> Result<Vec<TorrentEntry>, CatalogError> {
        if let Some(status) = self.fail_next.lock().unwrap().take() {
            return Err(CatalogError::Status(status));
        }
        Ok(self.entries.lock().unwrap().clone())
    }
}
