//! Fixture builders shared by unit and integration tests.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::processor::{ProgressKind, RawRecord, RecordSink, SinkError};

/// Gzip a list of lines into NDJSON shard content.
pub async fn gzip_ndjson(lines: &[String]) -> Vec<u8> {
    let mut encoder = async_compression::tokio::write::GzipEncoder::new(Vec::new());
    for line in lines {
        encoder
            .write_all(line.as_bytes())
            .await
            .expect("write to gzip encoder");
        encoder.write_all(b"\n").await.expect("write to gzip encoder");
    }
    encoder.shutdown().await.expect("finish gzip stream");
    encoder.into_inner()
}

/// Build one shard NDJSON line for a record with the given extension.
pub fn shard_record_line(id: &str, extension: &str, title: &str) -> String {
    serde_json::json!({
        "_index": "aarecords__0",
        "_id": id,
        "_score": 1.0,
        "_source": {
            "id": id,
            "file_unified_data": {
                "extension_best": extension,
                "title_best": title,
                "author_best": "Test Author",
                "publisher_best": "Test Publisher",
                "year_best": "2001",
                "language_codes": ["en"],
                "identifiers_unified": {},
                "classifications_unified": {}
            }
        }
    })
    .to_string()
}

/// Sink that records everything it receives.
#[derive(Default)]
pub struct CollectingSink {
    files: Mutex<Vec<String>>,
    records: Mutex<Vec<RawRecord>>,
    progress: Mutex<Vec<(String, ProgressKind, f64)>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files(&self) -> Vec<String> {
        self.files.lock().unwrap().clone()
    }

    pub fn records(&self) -> Vec<RawRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn progress(&self) -> Vec<(String, ProgressKind, f64)> {
        self.progress.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordSink for CollectingSink {
    async fn on_files(&self, paths: &[String]) {
        self.files.lock().unwrap().extend_from_slice(paths);
    }

    async fn on_progress(&self, path: &str, kind: ProgressKind, percent: f64) {
        self.progress
            .lock()
            .unwrap()
            .push((path.to_string(), kind, percent));
    }

    async fn on_record(&self, record: RawRecord) -> Result<(), SinkError> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}
