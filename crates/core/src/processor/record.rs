use std::collections::BTreeMap;

use serde::Deserialize;

/// One NDJSON line of a metadata shard, as published upstream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRecord {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(rename = "_source", default)]
    pub source: RecordSource,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordSource {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub file_unified_data: FileUnifiedData,
}

/// Unified file metadata; only the fields the mirror persists.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileUnifiedData {
    #[serde(default)]
    pub cover_url_best: String,
    #[serde(default)]
    pub extension_best: String,
    #[serde(default)]
    pub filesize_best: i64,
    #[serde(default)]
    pub title_best: String,
    #[serde(default)]
    pub author_best: String,
    #[serde(default)]
    pub publisher_best: String,
    #[serde(default)]
    pub year_best: String,
    #[serde(default)]
    pub language_codes: Vec<String>,
    #[serde(default)]
    pub content_type_best: String,
    #[serde(default)]
    pub stripped_description_best: String,
    #[serde(default)]
    pub identifiers_unified: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub classifications_unified: BTreeMap<String, Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_shard_line() {
        let line = r#"{
            "_index": "aarecords__7",
            "_id": "md5:abc123",
            "_score": 1.0,
            "_source": {
                "id": "md5:abc123",
                "file_unified_data": {
                    "extension_best": "epub",
                    "title_best": "The Example",
                    "author_best": "A. Author",
                    "year_best": "1999",
                    "language_codes": ["en", "fr"],
                    "identifiers_unified": {
                        "isbn13": ["9780306406157"],
                        "md5": ["abc123"]
                    },
                    "classifications_unified": {
                        "torrent": ["pilimi-zlib-1.torrent"]
                    }
                }
            }
        }"#;

        let record: RawRecord = serde_json::from_str(line).unwrap();
        assert_eq!(record.id, "md5:abc123");
        let data = &record.source.file_unified_data;
        assert_eq!(data.extension_best, "epub");
        assert_eq!(data.title_best, "The Example");
        assert_eq!(data.language_codes, vec!["en", "fr"]);
        assert_eq!(
            data.identifiers_unified.get("isbn13").unwrap(),
            &vec!["9780306406157".to_string()]
        );
    }

    #[test]
    fn test_deserialize_unknown_fields_ignored() {
        let record: RawRecord =
            serde_json::from_str(r#"{"_id": "x", "_source": {"search_only_fields": {}}}"#).unwrap();
        assert_eq!(record.id, "x");
        assert!(record.source.file_unified_data.extension_best.is_empty());
    }
}
