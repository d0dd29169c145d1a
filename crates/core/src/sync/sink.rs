//! Bridges the shard processor to the store and the progress registry.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::processor::{ProgressKind, RawRecord, RecordSink, SinkError};
use crate::progress::ProgressRegistry;
use crate::store::{sanitize_text, MetadataStore, NewRecord, TypedValue};

/// Sink that upserts epub records and mirrors progress into the registry.
pub struct DatabaseSink {
    store: Arc<dyn MetadataStore>,
    progress: Arc<ProgressRegistry>,
    base: String,
}

impl DatabaseSink {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        progress: Arc<ProgressRegistry>,
        base: impl Into<String>,
    ) -> Self {
        Self {
            store,
            progress,
            base: base.into(),
        }
    }
}

#[async_trait]
impl RecordSink for DatabaseSink {
    async fn on_files(&self, paths: &[String]) {
        self.progress.start_sync(&self.base, paths);
    }

    async fn on_progress(&self, path: &str, kind: ProgressKind, percent: f64) {
        let Some(index) = self.progress.index_of(path) else {
            return;
        };
        match kind {
            ProgressKind::Download => self.progress.update_download(index, percent),
            ProgressKind::Processing => self.progress.update_processed(index, percent),
        }
    }

    async fn on_record(&self, record: RawRecord) -> Result<(), SinkError> {
        let Some(record) = prepare_record(&record) else {
            return Ok(());
        };
        self.store
            .upsert_record(&record)
            .await
            .map_err(|e| SinkError::new(e.to_string()))
    }
}

/// Turn a raw shard record into a sanitized row, or `None` when the record
/// is not an epub and must be dropped.
pub fn prepare_record(raw: &RawRecord) -> Option<NewRecord> {
    let data = &raw.source.file_unified_data;
    if data.extension_best != "epub" {
        return None;
    }

    let description = match data.stripped_description_best.as_str() {
        "" => None,
        text => Some(sanitize_text(text)),
    };

    Some(NewRecord {
        id: sanitize_text(&raw.id),
        title: sanitize_text(&data.title_best),
        publisher: sanitize_text(&data.publisher_best),
        author: sanitize_text(&data.author_best),
        cover_url: sanitize_text(&data.cover_url_best),
        year: data.year_best.parse().unwrap_or(0),
        languages: data.language_codes.iter().map(|l| sanitize_text(l)).collect(),
        description,
        identifiers: collect_pairs(&data.identifiers_unified),
        classifications: collect_pairs(&data.classifications_unified),
    })
}

/// Flatten a unified (type -> values) map into deduplicated pairs, so a batch
/// upsert never carries the same key twice.
fn collect_pairs(map: &BTreeMap<String, Vec<String>>) -> Vec<TypedValue> {
    let mut seen = BTreeSet::new();
    let mut pairs = Vec::new();
    for (kind, values) in map {
        for value in values {
            let pair = TypedValue {
                kind: sanitize_text(kind),
                value: sanitize_text(value),
            };
            if seen.insert((pair.kind.clone(), pair.value.clone())) {
                pairs.push(pair);
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{FileUnifiedData, RecordSource};

    fn raw_record(extension: &str) -> RawRecord {
        RawRecord {
            id: "md5:abc".to_string(),
            source: RecordSource {
                id: "md5:abc".to_string(),
                file_unified_data: FileUnifiedData {
                    extension_best: extension.to_string(),
                    title_best: "Title".to_string(),
                    author_best: "Author".to_string(),
                    publisher_best: "Publisher".to_string(),
                    cover_url_best: "https://covers.example/abc.jpg".to_string(),
                    year_best: "1999".to_string(),
                    language_codes: vec!["en".to_string()],
                    ..Default::default()
                },
            },
        }
    }

    #[test]
    fn test_non_epub_is_dropped() {
        assert!(prepare_record(&raw_record("pdf")).is_none());
        assert!(prepare_record(&raw_record("")).is_none());
    }

    #[test]
    fn test_epub_is_prepared() {
        let record = prepare_record(&raw_record("epub")).unwrap();
        assert_eq!(record.id, "md5:abc");
        assert_eq!(record.title, "Title");
        assert_eq!(record.year, 1999);
        assert_eq!(record.languages, vec!["en"]);
        assert!(record.description.is_none());
    }

    #[test]
    fn test_unparseable_year_defaults_to_zero() {
        let mut raw = raw_record("epub");
        raw.source.file_unified_data.year_best = "circa 1800".to_string();
        assert_eq!(prepare_record(&raw).unwrap().year, 0);
    }

    #[test]
    fn test_null_bytes_are_stripped() {
        let mut raw = raw_record("epub");
        raw.source.file_unified_data.title_best = "Ti\0tle".to_string();
        raw.source.file_unified_data.language_codes = vec!["e\0n".to_string()];
        raw.source
            .file_unified_data
            .identifiers_unified
            .insert("isbn13".to_string(), vec!["978\x000306406157".to_string()]);

        let record = prepare_record(&raw).unwrap();
        assert_eq!(record.title, "Title");
        assert_eq!(record.languages, vec!["en"]);
        assert_eq!(record.identifiers[0].value, "9780306406157");
    }

    #[test]
    fn test_empty_description_is_absent() {
        let mut raw = raw_record("epub");
        raw.source.file_unified_data.stripped_description_best = String::new();
        assert!(prepare_record(&raw).unwrap().description.is_none());

        raw.source.file_unified_data.stripped_description_best = "A book.".to_string();
        assert_eq!(
            prepare_record(&raw).unwrap().description.as_deref(),
            Some("A book.")
        );
    }

    #[test]
    fn test_duplicate_pairs_are_deduplicated() {
        let mut raw = raw_record("epub");
        raw.source.file_unified_data.identifiers_unified.insert(
            "isbn13".to_string(),
            vec![
                "9780306406157".to_string(),
                "9780306406157".to_string(),
                "9780140449112".to_string(),
            ],
        );

        let record = prepare_record(&raw).unwrap();
        assert_eq!(record.identifiers.len(), 2);
    }

    #[test]
    fn test_empty_identifier_map_yields_no_pairs() {
        let record = prepare_record(&raw_record("epub")).unwrap();
        assert!(record.identifiers.is_empty());
        assert!(record.classifications.is_empty());
    }
}
