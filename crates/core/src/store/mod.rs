//! Metadata store - upserts for records and their children, the sync history
//! log, the torrent catalog table, aggregate stats, and search queries.

mod postgres;
mod types;

pub use postgres::PgStore;
pub use types::*;

use async_trait::async_trait;
use thiserror::Error;

use crate::catalog::TorrentEntry;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{0}")]
    Validation(String),
}

impl StoreError {
    /// Whether the error should be reported to a caller as a bad request
    /// rather than a server failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation(_))
    }
}

/// Persistence operations the pipeline and the API layer depend on.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Refresh the torrent catalog table, merging by `btih`.
    async fn upsert_torrents(&self, entries: &[TorrentEntry]) -> Result<(), StoreError>;

    /// Upsert a record plus its identifier and classification children.
    /// Children are additive: existing rows absent from `record` are kept.
    async fn upsert_record(&self, record: &NewRecord) -> Result<(), StoreError>;

    /// Most recent synchronization row, complete or not.
    async fn last_sync(&self) -> Result<Option<Synchronization>, StoreError>;

    /// Most recent synchronization row with `complete = true`.
    async fn last_complete_sync(&self) -> Result<Option<Synchronization>, StoreError>;

    /// Append a synchronization row.
    async fn create_sync(&self, entry: &Synchronization) -> Result<(), StoreError>;

    async fn record_count(&self) -> Result<i64, StoreError>;

    async fn identifier_counts(&self) -> Result<Vec<TypeCount>, StoreError>;

    async fn classification_counts(&self) -> Result<Vec<TypeCount>, StoreError>;

    /// Find records carrying the given ISBN under either identifier form.
    /// Returns the page of records with children attached, plus the total.
    async fn search_by_isbn(
        &self,
        isbn: &str,
        languages: &[String],
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<BookRecord>, i64), StoreError>;

    /// Case-insensitive substring search over title/author/publisher.
    async fn search_by_text(
        &self,
        title: &str,
        author: &str,
        publisher: &str,
        languages: &[String],
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<BookRecord>, i64), StoreError>;

    /// Resolve the torrent-relative path and torrent name for a record,
    /// if it carries a `server_path` identifier and a `torrent`
    /// classification.
    async fn record_download_info(&self, id: &str) -> Result<Option<DownloadInfo>, StoreError>;

    /// Look up a catalog row by its display name.
    async fn torrent_by_display_name(&self, name: &str)
        -> Result<Option<TorrentRow>, StoreError>;
}

/// Strip null bytes, which Postgres rejects in text fields.
pub fn sanitize_text(s: &str) -> String {
    s.replace('\0', "")
}

/// Expand an ISBN query value to both identifier forms.
///
/// Returns `StoreError::Validation` when the value is neither 10 nor 13
/// characters long.
pub fn expand_isbn(isbn: &str) -> Result<Vec<String>, StoreError> {
    let isbn = isbn.trim();
    match isbn.len() {
        10 => {
            let mut values = vec![isbn.to_string()];
            if let Some(isbn13) = crate::isbn::to13(isbn) {
                values.push(isbn13);
            }
            Ok(values)
        }
        13 => {
            let mut values = vec![isbn.to_string()];
            if let Some(isbn10) = crate::isbn::to10(isbn) {
                values.push(isbn10);
            }
            Ok(values)
        }
        _ => Err(StoreError::Validation(
            "isbn must be 10 or 13 characters long".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_text() {
        assert_eq!(sanitize_text("plain"), "plain");
        assert_eq!(sanitize_text("nu\0ll"), "null");
        assert_eq!(sanitize_text("\0\0"), "");
    }

    #[test]
    fn test_expand_isbn_10() {
        let values = expand_isbn("0306406152").unwrap();
        assert_eq!(values, vec!["0306406152", "9780306406157"]);
    }

    #[test]
    fn test_expand_isbn_13() {
        let values = expand_isbn(" 9780306406157 ").unwrap();
        assert_eq!(values, vec!["9780306406157", "0306406152"]);
    }

    #[test]
    fn test_expand_isbn_13_not_convertible() {
        // 979-prefixed ISBN-13s have no ISBN-10 form.
        let values = expand_isbn("9790000000000").unwrap();
        assert_eq!(values, vec!["9790000000000"]);
    }

    #[test]
    fn test_expand_isbn_invalid_length() {
        let err = expand_isbn("12345").unwrap_err();
        assert!(err.is_validation());
    }
}
