use serde::{Deserialize, Serialize};

/// One entry of the upstream torrent catalog (`/dyn/torrents.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentEntry {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub btih: String,
    #[serde(default)]
    pub magnet_link: String,
    /// e.g. `other_aa`
    #[serde(default)]
    pub top_level_group_name: String,
    /// e.g. `aa_derived_mirror_metadata`
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub obsolete: bool,
    /// Opaque ISO-like timestamp, compared lexicographically.
    #[serde(default)]
    pub added_to_torrents_list_at: String,
}
