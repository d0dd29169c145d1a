//! Stats cache - aggregate counts over the store with single-flight
//! recompute, invalidated at the end of every sync.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::store::{MetadataStore, StoreError, TypeCount};

/// Aggregate counts for the current data set.
#[derive(Debug, Clone, Serialize)]
pub struct CachedStats {
    /// RFC 3339 date of the last complete sync.
    #[serde(rename = "lastSync")]
    pub last_sync: String,
    /// Torrent display name of the last complete sync.
    pub base: String,
    /// Total record count.
    pub count: i64,
    pub identifiers: Vec<TypeCount>,
    pub classifications: Vec<TypeCount>,
}

/// Cached stats with single-flight recompute.
///
/// `get` never queues behind a recompute: while one is in flight it returns
/// `None` and callers surface a retry-later response.
pub struct StatsCache {
    store: Arc<dyn MetadataStore>,
    cache: RwLock<Option<CachedStats>>,
}

impl StatsCache {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(None),
        }
    }

    /// The cached snapshot, or `None` while a recompute holds the lock or
    /// nothing has been computed yet.
    pub fn get(&self) -> Option<CachedStats> {
        match self.cache.try_read() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        }
    }

    /// Recompute the aggregates and publish them atomically.
    ///
    /// With `force = false` the call backs off and returns `Ok(None)` if
    /// another recompute is already in flight. Before the first complete
    /// sync there is nothing to aggregate and the cache stays empty.
    pub async fn compute_and_cache(
        &self,
        force: bool,
    ) -> Result<Option<CachedStats>, StoreError> {
        let mut guard = if force {
            self.cache.write().await
        } else {
            match self.cache.try_write() {
                Ok(guard) => guard,
                Err(_) => {
                    debug!("stats recompute already in flight");
                    return Ok(None);
                }
            }
        };

        let Some(last_sync) = self.store.last_complete_sync().await? else {
            return Ok(None);
        };

        let stats = CachedStats {
            last_sync: last_sync.date.to_rfc3339(),
            base: last_sync.base,
            count: self.store.record_count().await?,
            identifiers: self.store.identifier_counts().await?,
            classifications: self.store.classification_counts().await?,
        };

        *guard = Some(stats.clone());
        Ok(Some(stats))
    }
}
