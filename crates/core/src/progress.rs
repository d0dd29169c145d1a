//! Progress registry - thread-safe per-file download and processing
//! percentages for the sync currently in flight.

use std::sync::RwLock;

use serde::Serialize;

/// Progress of a single shard file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileProgress {
    pub name: String,
    /// Download percentage, 0-100.
    pub downloaded: f64,
    /// Processing percentage, 0-100.
    pub processed: f64,
}

/// Snapshot of the current sync state, safe to serialize.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncProgress {
    #[serde(rename = "isRunning")]
    pub is_running: bool,
    pub base: String,
    pub files: Vec<FileProgress>,
}

/// Process-wide sync progress. One writer (the pipeline), many readers.
#[derive(Debug, Default)]
pub struct ProgressRegistry {
    inner: RwLock<SyncProgress>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize the entry list from the ordered shard paths.
    pub fn start_sync(&self, base: &str, files: &[String]) {
        let mut inner = self.inner.write().unwrap();
        inner.is_running = true;
        inner.base = base.to_string();
        inner.files = files
            .iter()
            .map(|name| FileProgress {
                name: name.clone(),
                ..Default::default()
            })
            .collect();
    }

    /// Resolve a file path to its entry index. File counts are small, so a
    /// linear scan is fine.
    pub fn index_of(&self, path: &str) -> Option<usize> {
        let inner = self.inner.read().unwrap();
        inner.files.iter().position(|f| f.name == path)
    }

    pub fn update_download(&self, index: usize, percent: f64) {
        let mut inner = self.inner.write().unwrap();
        if let Some(file) = inner.files.get_mut(index) {
            file.downloaded = percent;
        }
    }

    pub fn update_processed(&self, index: usize, percent: f64) {
        let mut inner = self.inner.write().unwrap();
        if let Some(file) = inner.files.get_mut(index) {
            file.processed = percent;
        }
    }

    /// Reset to idle. The caller follows up with a forced stats recompute.
    pub fn end_sync(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.is_running = false;
        inner.base.clear();
        inner.files.clear();
    }

    /// Deep copy of the current state.
    pub fn snapshot(&self) -> SyncProgress {
        self.inner.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_sync_initializes_entries() {
        let registry = ProgressRegistry::new();
        registry.start_sync("bundle-v1", &["a.gz".to_string(), "b.gz".to_string()]);

        let snapshot = registry.snapshot();
        assert!(snapshot.is_running);
        assert_eq!(snapshot.base, "bundle-v1");
        assert_eq!(snapshot.files.len(), 2);
        assert_eq!(snapshot.files[0].name, "a.gz");
        assert_eq!(snapshot.files[0].downloaded, 0.0);
    }

    #[test]
    fn test_updates_by_index() {
        let registry = ProgressRegistry::new();
        registry.start_sync("base", &["a.gz".to_string(), "b.gz".to_string()]);
        registry.update_download(0, 42.5);
        registry.update_processed(1, 10.0);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.files[0].downloaded, 42.5);
        assert_eq!(snapshot.files[1].processed, 10.0);
    }

    #[test]
    fn test_update_out_of_range_is_ignored() {
        let registry = ProgressRegistry::new();
        registry.start_sync("base", &["a.gz".to_string()]);
        registry.update_download(5, 99.0);
        assert_eq!(registry.snapshot().files[0].downloaded, 0.0);
    }

    #[test]
    fn test_index_of() {
        let registry = ProgressRegistry::new();
        registry.start_sync("base", &["a.gz".to_string(), "b.gz".to_string()]);
        assert_eq!(registry.index_of("b.gz"), Some(1));
        assert_eq!(registry.index_of("missing.gz"), None);
    }

    #[test]
    fn test_end_sync_resets_state() {
        let registry = ProgressRegistry::new();
        registry.start_sync("base", &["a.gz".to_string()]);
        registry.end_sync();

        let snapshot = registry.snapshot();
        assert!(!snapshot.is_running);
        assert!(snapshot.base.is_empty());
        assert!(snapshot.files.is_empty());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let registry = ProgressRegistry::new();
        registry.start_sync("base", &["a.gz".to_string()]);
        let before = registry.snapshot();
        registry.update_download(0, 50.0);
        assert_eq!(before.files[0].downloaded, 0.0);
    }
}
