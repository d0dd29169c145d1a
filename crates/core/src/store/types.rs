use chrono::{DateTime, Utc};
use serde::Serialize;

/// A stored book record with its children attached.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BookRecord {
    pub id: String,
    pub title: String,
    pub publisher: String,
    pub author: String,
    #[serde(rename = "coverURL")]
    pub cover_url: String,
    pub year: i32,
    pub languages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub identifiers: Vec<TypedValue>,
    #[sqlx(skip)]
    pub classifications: Vec<TypedValue>,
}

/// A (type, value) pair attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, sqlx::FromRow)]
pub struct TypedValue {
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: String,
    pub value: String,
}

/// A per-type row count from a GROUP BY aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct TypeCount {
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: String,
    pub count: i64,
}

/// One entry of the append-only sync history.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Synchronization {
    pub date: DateTime<Utc>,
    /// Display name of the torrent whose contents were ingested.
    pub base: String,
    pub complete: bool,
}

/// A torrent catalog row, mirrored from the upstream index.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TorrentRow {
    pub btih: String,
    pub display_name: String,
    pub url: String,
    pub magnet_link: String,
    pub top_level_group_name: String,
    pub group_name: String,
    pub obsolete: bool,
    pub added_to_torrents_list_at: String,
}

/// A sanitized record ready to be upserted, with deduplicated children.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub id: String,
    pub title: String,
    pub publisher: String,
    pub author: String,
    pub cover_url: String,
    pub year: i32,
    pub languages: Vec<String>,
    pub description: Option<String>,
    pub identifiers: Vec<TypedValue>,
    pub classifications: Vec<TypedValue>,
}

/// What the on-demand downloader needs to fetch a record's file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadInfo {
    /// Value of the record's `server_path` identifier.
    pub server_path: String,
    /// Value of the record's `torrent` classification (a torrent name).
    pub torrent: String,
}
