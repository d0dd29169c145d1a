//! In-memory metadata store for testing.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::catalog::TorrentEntry;
use crate::store::{
    expand_isbn, BookRecord, DownloadInfo, MetadataStore, NewRecord, StoreError, Synchronization,
    TorrentRow, TypeCount, TypedValue,
};

#[derive(Default)]
struct State {
    records: BTreeMap<String, NewRecord>,
    /// (record, type, value) triples.
    identifiers: BTreeSet<(String, String, String)>,
    classifications: BTreeSet<(String, String, String)>,
    syncs: Vec<Synchronization>,
    torrents: BTreeMap<String, TorrentEntry>,
}

/// In-memory store mirroring the Postgres semantics: last-writer-wins on
/// record scalars, additive set semantics on children.
#[derive(Default)]
pub struct MockStore {
    state: Mutex<State>,
    /// Fail `upsert_record` once this many records have been stored.
    fail_after_records: AtomicU64,
    upserts: AtomicU64,
    stats_delay: Mutex<Duration>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `upsert_record` fail once `n` upserts have gone through.
    pub fn fail_after_records(&self, n: u64) {
        self.fail_after_records.store(n, Ordering::SeqCst);
    }

    /// Slow down the stats queries, widening the single-flight window.
    pub fn set_stats_delay(&self, delay: Duration) {
        *self.stats_delay.lock().unwrap() = delay;
    }

    pub fn record_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().records.keys().cloned().collect()
    }

    pub fn record(&self, id: &str) -> Option<NewRecord> {
        self.state.lock().unwrap().records.get(id).cloned()
    }

    pub fn identifier_rows(&self) -> Vec<(String, String, String)> {
        self.state
            .lock()
            .unwrap()
            .identifiers
            .iter()
            .cloned()
            .collect()
    }

    pub fn classification_rows(&self) -> Vec<(String, String, String)> {
        self.state
            .lock()
            .unwrap()
            .classifications
            .iter()
            .cloned()
            .collect()
    }

    pub fn sync_history(&self) -> Vec<Synchronization> {
        self.state.lock().unwrap().syncs.clone()
    }

    pub fn torrent_rows(&self) -> Vec<TorrentEntry> {
        self.state.lock().unwrap().torrents.values().cloned().collect()
    }

    async fn stats_delay(&self) {
        let delay = *self.stats_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn to_book_record(record: &NewRecord, state: &State) -> BookRecord {
        let children = |set: &BTreeSet<(String, String, String)>| {
            set.iter()
                .filter(|(id, _, _)| id == &record.id)
                .map(|(_, kind, value)| TypedValue {
                    kind: kind.clone(),
                    value: value.clone(),
                })
                .collect()
        };
        BookRecord {
            id: record.id.clone(),
            title: record.title.clone(),
            publisher: record.publisher.clone(),
            author: record.author.clone(),
            cover_url: record.cover_url.clone(),
            year: record.year,
            languages: record.languages.clone(),
            description: record.description.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            identifiers: children(&state.identifiers),
            classifications: children(&state.classifications),
        }
    }

    fn languages_overlap(record: &NewRecord, languages: &[String]) -> bool {
        languages.is_empty() || record.languages.iter().any(|l| languages.contains(l))
    }

    fn paginate(
        mut records: Vec<BookRecord>,
        limit: i64,
        offset: i64,
    ) -> (Vec<BookRecord>, i64) {
        records.sort_by(|a, b| a.id.cmp(&b.id));
        let total = records.len() as i64;
        let page = records
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        (page, total)
    }
}

#[async_trait]
impl MetadataStore for MockStore {
    async fn upsert_torrents(&self, entries: &[TorrentEntry]) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        for entry in entries {
            state.torrents.insert(entry.btih.clone(), entry.clone());
        }
        Ok(())
    }

    async fn upsert_record(&self, record: &NewRecord) -> Result<(), StoreError> {
        let threshold = self.fail_after_records.load(Ordering::SeqCst);
        let upserts = self.upserts.fetch_add(1, Ordering::SeqCst);
        if threshold > 0 && upserts >= threshold {
            return Err(StoreError::Validation("injected store failure".to_string()));
        }

        let mut state = self.state.lock().unwrap();
        for pair in &record.identifiers {
            state
                .identifiers
                .insert((record.id.clone(), pair.kind.clone(), pair.value.clone()));
        }
        for pair in &record.classifications {
            state
                .classifications
                .insert((record.id.clone(), pair.kind.clone(), pair.value.clone()));
        }
        state.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn last_sync(&self) -> Result<Option<Synchronization>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .syncs
            .iter()
            .max_by_key(|s| s.date)
            .cloned())
    }

    async fn last_complete_sync(&self) -> Result<Option<Synchronization>, StoreError> {
        self.stats_delay().await;
        let state = self.state.lock().unwrap();
        Ok(state
            .syncs
            .iter()
            .filter(|s| s.complete)
            .max_by_key(|s| s.date)
            .cloned())
    }

    async fn create_sync(&self, entry: &Synchronization) -> Result<(), StoreError> {
        self.state.lock().unwrap().syncs.push(entry.clone());
        Ok(())
    }

    async fn record_count(&self) -> Result<i64, StoreError> {
        self.stats_delay().await;
        Ok(self.state.lock().unwrap().records.len() as i64)
    }

    async fn identifier_counts(&self) -> Result<Vec<TypeCount>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for (_, kind, _) in &state.identifiers {
            *counts.entry(kind.clone()).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(kind, count)| TypeCount { kind, count })
            .collect())
    }

    async fn classification_counts(&self) -> Result<Vec<TypeCount>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for (_, kind, _) in &state.classifications {
            *counts.entry(kind.clone()).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(kind, count)| TypeCount { kind, count })
            .collect())
    }

    async fn search_by_isbn(
        &self,
        isbn: &str,
        languages: &[String],
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<BookRecord>, i64), StoreError> {
        let values = expand_isbn(isbn)?;

        let state = self.state.lock().unwrap();
        let ids: BTreeSet<&String> = state
            .identifiers
            .iter()
            .filter(|(_, kind, value)| {
                (kind.as_str() == "isbn10" || kind.as_str() == "isbn13")
                    && values.contains(value)
            })
            .map(|(id, _, _)| id)
            .collect();

        let matches: Vec<BookRecord> = state
            .records
            .values()
            .filter(|r| ids.contains(&r.id) && Self::languages_overlap(r, languages))
            .map(|r| Self::to_book_record(r, &state))
            .collect();

        Ok(Self::paginate(matches, limit, offset))
    }

    async fn search_by_text(
        &self,
        title: &str,
        author: &str,
        publisher: &str,
        languages: &[String],
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<BookRecord>, i64), StoreError> {
        let contains = |haystack: &str, needle: &str| {
            needle.trim().is_empty()
                || haystack
                    .to_lowercase()
                    .contains(&needle.trim().to_lowercase())
        };

        let state = self.state.lock().unwrap();
        let matches: Vec<BookRecord> = state
            .records
            .values()
            .filter(|r| {
                contains(&r.title, title)
                    && contains(&r.author, author)
                    && contains(&r.publisher, publisher)
                    && Self::languages_overlap(r, languages)
            })
            .map(|r| Self::to_book_record(r, &state))
            .collect();

        Ok(Self::paginate(matches, limit, offset))
    }

    async fn record_download_info(&self, id: &str) -> Result<Option<DownloadInfo>, StoreError> {
        let state = self.state.lock().unwrap();
        let server_path = state
            .identifiers
            .iter()
            .find(|(record, kind, _)| record.as_str() == id && kind.as_str() == "server_path")
            .map(|(_, _, value)| value.clone());
        let torrent = state
            .classifications
            .iter()
            .find(|(record, kind, _)| record.as_str() == id && kind.as_str() == "torrent")
            .map(|(_, _, value)| value.clone());

        Ok(match (server_path, torrent) {
            (Some(server_path), Some(torrent)) => Some(DownloadInfo {
                server_path,
                torrent,
            }),
            _ => None,
        })
    }

    async fn torrent_by_display_name(
        &self,
        name: &str,
    ) -> Result<Option<TorrentRow>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .torrents
            .values()
            .find(|t| t.display_name == name)
            .map(|t| TorrentRow {
                btih: t.btih.clone(),
                display_name: t.display_name.clone(),
                url: t.url.clone(),
                magnet_link: t.magnet_link.clone(),
                top_level_group_name: t.top_level_group_name.clone(),
                group_name: t.group_name.clone(),
                obsolete: t.obsolete,
                added_to_torrents_list_at: t.added_to_torrents_list_at.clone(),
            }))
    }
}
