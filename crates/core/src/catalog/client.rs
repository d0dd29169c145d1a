use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{CatalogError, TorrentEntry, TorrentIndex};

/// Group names identifying the derived metadata bundle in the catalog.
pub const METADATA_GROUP: &str = "aa_derived_mirror_metadata";
pub const METADATA_TOP_LEVEL_GROUP: &str = "other_aa";

/// HTTP client for the upstream torrent catalog.
pub struct TorrentIndexClient {
    client: Client,
    base_url: String,
}

impl TorrentIndexClient {
    /// Create a client for `https://<domain>`.
    pub fn new(domain: &str) -> Result<Self, CatalogError> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            base_url: format!("https://{}", domain),
        })
    }

    /// Override the base URL, scheme included. Useful against a local mirror.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl TorrentIndex for TorrentIndexClient {
    async fn fetch(&self) -> Result<Vec<TorrentEntry>, CatalogError> {
        let url = format!("{}/dyn/torrents.json", self.base_url);
        debug!(url = %url, "fetching torrent catalog");

        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status(status.as_u16()));
        }

        response
            .json::<Vec<TorrentEntry>>()
            .await
            .map_err(|e| CatalogError::Malformed(e.to_string()))
    }
}

/// Pick the newest non-obsolete metadata bundle from the catalog.
///
/// The added-at timestamps are opaque strings compared lexicographically;
/// on a tie the earliest matching entry wins.
pub fn pick_latest_metadata(entries: &[TorrentEntry]) -> Option<&TorrentEntry> {
    let mut latest: Option<&TorrentEntry> = None;

    for entry in entries {
        if entry.group_name != METADATA_GROUP
            || entry.top_level_group_name != METADATA_TOP_LEVEL_GROUP
            || entry.obsolete
        {
            continue;
        }
        match latest {
            Some(current)
                if entry.added_to_torrents_list_at <= current.added_to_torrents_list_at => {}
            _ => latest = Some(entry),
        }
    }

    latest
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata_entry(name: &str, added_at: &str) -> TorrentEntry {
        TorrentEntry {
            display_name: name.to_string(),
            group_name: METADATA_GROUP.to_string(),
            top_level_group_name: METADATA_TOP_LEVEL_GROUP.to_string(),
            added_to_torrents_list_at: added_at.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_pick_latest_returns_greatest_added_at() {
        let entries = vec![
            metadata_entry("old", "20240101"),
            metadata_entry("new", "20240612"),
            metadata_entry("middle", "20240301"),
        ];
        assert_eq!(pick_latest_metadata(&entries).unwrap().display_name, "new");
    }

    #[test]
    fn test_pick_latest_skips_obsolete() {
        let mut obsolete = metadata_entry("newest-but-obsolete", "20250101");
        obsolete.obsolete = true;
        let entries = vec![metadata_entry("kept", "20240612"), obsolete];
        assert_eq!(pick_latest_metadata(&entries).unwrap().display_name, "kept");
    }

    #[test]
    fn test_pick_latest_filters_groups() {
        let mut other_group = metadata_entry("books", "20250101");
        other_group.group_name = "aa_books".to_string();
        let mut other_top = metadata_entry("external", "20250101");
        other_top.top_level_group_name = "libgen".to_string();

        let entries = vec![other_group, other_top, metadata_entry("meta", "20240101")];
        assert_eq!(pick_latest_metadata(&entries).unwrap().display_name, "meta");
    }

    #[test]
    fn test_pick_latest_empty_catalog() {
        assert!(pick_latest_metadata(&[]).is_none());
    }

    #[test]
    fn test_pick_latest_all_obsolete() {
        let mut entry = metadata_entry("gone", "20240101");
        entry.obsolete = true;
        assert!(pick_latest_metadata(&[entry]).is_none());
    }

    #[test]
    fn test_pick_latest_tie_keeps_first() {
        let entries = vec![
            metadata_entry("first", "20240612"),
            metadata_entry("second", "20240612"),
        ];
        assert_eq!(
            pick_latest_metadata(&entries).unwrap().display_name,
            "first"
        );
    }
}
