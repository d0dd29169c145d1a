use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use async_compression::tokio::bufread::GzipDecoder;
use regex_lite::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::swarm::{FilePriority, SwarmFile, SwarmTorrent};

use super::{ProcessError, ProgressKind, RawRecord, RecordSink, ShardError, ShardOutcome};

/// Read-ahead hint handed to the swarm reader.
pub const READ_AHEAD_BYTES: u64 = 10 * 1024 * 1024;

/// Line reader buffer over the decompressed stream.
const LINE_BUFFER_BYTES: usize = 4 * 1024 * 1024;

/// Buffer between the swarm reader and the gzip decoder.
const STREAM_BUFFER_BYTES: usize = 512 * 1024;

/// Records between two processing-progress callbacks.
const PROGRESS_EVERY_RECORDS: u64 = 10_000;

/// Cadence of the background download-progress sampler.
const DOWNLOAD_SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

/// Streams the metadata shards of a torrent while they download.
pub struct ShardProcessor {
    /// When set, only the shard with this literal index is processed.
    archive_id: Option<String>,
}

impl ShardProcessor {
    pub fn new(archive_id: Option<String>) -> Self {
        Self { archive_id }
    }

    fn shard_pattern(&self) -> Result<Regex, ProcessError> {
        let pattern = match &self.archive_id {
            Some(id) => format!(r"elasticsearch/aarecords__{}\.json\.gz$", id),
            None => r"elasticsearch/aarecords__\d+\.json\.gz$".to_string(),
        };
        Regex::new(&pattern).map_err(|e| ProcessError::Pattern(e.to_string()))
    }

    /// Process every matching shard of `torrent`, decoding records as bytes
    /// arrive from the swarm. The torrent is dropped from the engine when all
    /// workers return, whether or not one of them failed.
    pub async fn process(
        &self,
        torrent: Arc<dyn SwarmTorrent>,
        sink: Arc<dyn RecordSink>,
        cancel: CancellationToken,
    ) -> Result<Vec<ShardOutcome>, ProcessError> {
        let pattern = self.shard_pattern()?;

        info!("waiting for torrent metadata");
        torrent.await_metadata(&cancel).await?;

        let mut shards: Vec<Arc<dyn SwarmFile>> = torrent
            .files()?
            .into_iter()
            .filter(|file| pattern.is_match(file.path()))
            .collect();

        if shards.is_empty() {
            info!("no matching shard files found in torrent");
            if let Err(e) = torrent.remove().await {
                warn!(error = %e, "failed to drop torrent");
            }
            return Ok(Vec::new());
        }

        shards.sort_by_key(|file| shard_index(file.path()).unwrap_or(u64::MAX));

        let paths: Vec<String> = shards.iter().map(|f| f.path().to_string()).collect();
        for path in &paths {
            debug!(path = %path, "found matching shard");
        }
        sink.on_files(&paths).await;

        // Lowest-indexed shard downloads first so decoding can start while the
        // rest of the bundle is still arriving.
        for (i, file) in shards.iter().enumerate() {
            let priority = match i {
                0 => FilePriority::Now,
                1 => FilePriority::High,
                _ => FilePriority::Normal,
            };
            file.set_priority(priority).await?;
            file.start_download().await?;
        }

        info!(shards = shards.len(), "processing shards while the torrent downloads");

        let sampler_cancel = CancellationToken::new();
        let sampler = tokio::spawn(sample_download_progress(
            shards.clone(),
            Arc::clone(&sink),
            sampler_cancel.clone(),
        ));

        let mut workers = JoinSet::new();
        for file in shards {
            let sink = Arc::clone(&sink);
            let cancel = cancel.clone();
            workers.spawn(async move { process_shard(file, sink, cancel).await });
        }

        let mut outcomes = Vec::new();
        let mut failure: Option<ProcessError> = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(outcome)) => {
                    info!(
                        path = %outcome.path,
                        records = outcome.records,
                        "shard processed"
                    );
                    outcomes.push(outcome);
                }
                Ok(Err((path, source))) => {
                    error!(path = %path, error = %source, "shard failed");
                    if failure.is_none() {
                        failure = Some(ProcessError::Shard { path, source });
                    }
                }
                Err(join_error) => {
                    error!(error = %join_error, "shard worker panicked");
                    if failure.is_none() {
                        failure = Some(ProcessError::WorkerPanic);
                    }
                }
            }
        }

        sampler_cancel.cancel();
        let _ = sampler.await;

        if let Err(e) = torrent.remove().await {
            warn!(error = %e, "failed to drop torrent");
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(outcomes),
        }
    }
}

/// Decode one shard line by line, forwarding records to the sink.
async fn process_shard(
    file: Arc<dyn SwarmFile>,
    sink: Arc<dyn RecordSink>,
    cancel: CancellationToken,
) -> Result<ShardOutcome, (String, ShardError)> {
    let path = file.path().to_string();
    debug!(path = %path, "starting shard worker");

    let reader = file.reader(READ_AHEAD_BYTES).map_err(|e| {
        (
            path.clone(),
            ShardError::Read {
                line: 0,
                source: std::io::Error::other(e),
            },
        )
    })?;

    let decoder = GzipDecoder::new(BufReader::with_capacity(STREAM_BUFFER_BYTES, reader));
    let mut lines = BufReader::with_capacity(LINE_BUFFER_BYTES, decoder);

    let mut buf = Vec::new();
    let mut line_count: u64 = 0;
    let mut record_count: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err((path, ShardError::Cancelled));
        }

        buf.clear();
        let read = match lines.read_until(b'\n', &mut buf).await {
            Ok(read) => read,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                // A truncated gzip tail at a piece boundary still marks the
                // end of the file once the swarm has delivered everything the
                // torrent claims.
                warn!(
                    path = %path,
                    line = line_count + 1,
                    "unexpected EOF in shard stream, treating as end of file"
                );
                break;
            }
            Err(e) => {
                return Err((
                    path,
                    ShardError::Read {
                        line: line_count + 1,
                        source: e,
                    },
                ));
            }
        };

        if read == 0 {
            break;
        }
        if buf.last() != Some(&b'\n') {
            // Final line without a terminator: a truncated tail, not a record.
            debug!(path = %path, "discarding unterminated trailing line");
            break;
        }

        line_count += 1;

        let record: RawRecord = match serde_json::from_slice(&buf) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    path = %path,
                    line = line_count,
                    error = %e,
                    "skipping unparseable record"
                );
                continue;
            }
        };

        sink.on_record(record).await.map_err(|e| {
            (
                path.clone(),
                ShardError::Sink {
                    line: line_count,
                    source: e,
                },
            )
        })?;
        record_count += 1;

        if record_count % PROGRESS_EVERY_RECORDS == 0 {
            let percent = completion_percent(file.bytes_completed(), file.length());
            sink.on_progress(&path, ProgressKind::Processing, percent).await;
        }
    }

    sink.on_progress(&path, ProgressKind::Processing, 100.0).await;
    sink.on_progress(&path, ProgressKind::Download, 100.0).await;

    Ok(ShardOutcome {
        path,
        records: record_count,
        lines: line_count,
    })
}

/// Periodically report download percentages for every shard until cancelled.
async fn sample_download_progress(
    files: Vec<Arc<dyn SwarmFile>>,
    sink: Arc<dyn RecordSink>,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(
        Instant::now() + DOWNLOAD_SAMPLE_INTERVAL,
        DOWNLOAD_SAMPLE_INTERVAL,
    );
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                for file in &files {
                    let percent = completion_percent(file.bytes_completed(), file.length());
                    sink.on_progress(file.path(), ProgressKind::Download, percent).await;
                }
            }
        }
    }
}

/// Extract the decimal shard index from a path like
/// `elasticsearch/aarecords__7.json.gz`.
pub fn shard_index(path: &str) -> Option<u64> {
    let pattern = Regex::new(r"aarecords__(\d+)\.json\.gz$").ok()?;
    pattern
        .captures(path)?
        .get(1)?
        .as_str()
        .parse::<u64>()
        .ok()
}

fn completion_percent(completed: u64, total: u64) -> f64 {
    if total > 0 {
        completed as f64 / total as f64 * 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{gzip_ndjson, shard_record_line, CollectingSink, MockFile, MockSwarm};
    use crate::swarm::SwarmClient;

    #[test]
    fn test_shard_index_extraction() {
        assert_eq!(
            shard_index("elasticsearch/aarecords__7.json.gz"),
            Some(7)
        );
        assert_eq!(
            shard_index("elasticsearch/aarecords__12.json.gz"),
            Some(12)
        );
        assert_eq!(shard_index("elasticsearch/other.json.gz"), None);
        assert_eq!(shard_index("aarecords__3.json"), None);
    }

    #[test]
    fn test_completion_percent() {
        assert_eq!(completion_percent(0, 0), 0.0);
        assert_eq!(completion_percent(50, 200), 25.0);
        assert_eq!(completion_percent(200, 200), 100.0);
    }

    #[test]
    fn test_shard_pattern_with_archive_id() {
        let processor = ShardProcessor::new(Some("7".to_string()));
        let pattern = processor.shard_pattern().unwrap();
        assert!(pattern.is_match("elasticsearch/aarecords__7.json.gz"));
        assert!(!pattern.is_match("elasticsearch/aarecords__8.json.gz"));

        let processor = ShardProcessor::new(None);
        let pattern = processor.shard_pattern().unwrap();
        assert!(pattern.is_match("elasticsearch/aarecords__8.json.gz"));
        assert!(!pattern.is_match("elasticsearch/aarecords__.json.gz"));
        assert!(!pattern.is_match("other/aarecords__8.json"));
    }

    async fn run_single_shard(content: Vec<u8>) -> Result<Vec<ShardOutcome>, ProcessError> {
        let swarm = MockSwarm::new();
        swarm.register_torrent(
            "magnet:?xt=urn:btih:shardtest",
            vec![MockFile::new("elasticsearch/aarecords__0.json.gz", content)],
        );
        let torrent = swarm.add_magnet("magnet:?xt=urn:btih:shardtest").await.unwrap();
        let sink = Arc::new(CollectingSink::new());
        let processor = ShardProcessor::new(None);
        let outcomes = processor
            .process(torrent, sink.clone(), CancellationToken::new())
            .await?;
        Ok(outcomes)
    }

    #[tokio::test]
    async fn test_process_counts_lines_and_records() {
        let lines = vec![
            shard_record_line("md5:1", "epub", "One"),
            shard_record_line("md5:2", "pdf", "Two"),
            shard_record_line("md5:3", "epub", "Three"),
        ];
        let content = gzip_ndjson(&lines).await;
        let outcomes = run_single_shard(content).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].lines, 3);
        // All parseable lines are forwarded; filtering happens in the sink.
        assert_eq!(outcomes[0].records, 3);
    }

    #[tokio::test]
    async fn test_process_skips_unparseable_lines() {
        let mut lines = vec![shard_record_line("md5:1", "epub", "One")];
        lines.push("this is not json".to_string());
        lines.push(shard_record_line("md5:2", "epub", "Two"));
        let content = gzip_ndjson(&lines).await;
        let outcomes = run_single_shard(content).await.unwrap();
        assert_eq!(outcomes[0].lines, 3);
        assert_eq!(outcomes[0].records, 2);
    }

    #[tokio::test]
    async fn test_truncated_gzip_treated_as_clean_eof() {
        let lines = vec![
            shard_record_line("md5:1", "epub", "One"),
            shard_record_line("md5:2", "epub", "Two"),
        ];
        let mut content = gzip_ndjson(&lines).await;
        // Chop the gzip trailer and some of the final deflate block.
        content.truncate(content.len() - 12);
        let outcomes = run_single_shard(content).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].records <= 2);
    }

    #[tokio::test]
    async fn test_no_matching_files_is_success() {
        let swarm = MockSwarm::new();
        swarm.register_torrent(
            "magnet:?xt=urn:btih:nothing",
            vec![MockFile::new("readme.txt", b"hello".to_vec())],
        );
        let torrent = swarm.add_magnet("magnet:?xt=urn:btih:nothing").await.unwrap();
        let sink = Arc::new(CollectingSink::new());
        let processor = ShardProcessor::new(None);
        let outcomes = processor
            .process(torrent, sink, CancellationToken::new())
            .await
            .unwrap();
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_shards_ordered_and_prioritized_by_index() {
        let swarm = MockSwarm::new();
        let torrent = swarm.register_torrent(
            "magnet:?xt=urn:btih:ordered",
            vec![
                MockFile::new(
                    "elasticsearch/aarecords__2.json.gz",
                    gzip_ndjson(&[]).await,
                ),
                MockFile::new(
                    "elasticsearch/aarecords__0.json.gz",
                    gzip_ndjson(&[]).await,
                ),
                MockFile::new(
                    "elasticsearch/aarecords__1.json.gz",
                    gzip_ndjson(&[]).await,
                ),
            ],
        );
        let handle = swarm.add_magnet("magnet:?xt=urn:btih:ordered").await.unwrap();
        let sink = Arc::new(CollectingSink::new());
        let processor = ShardProcessor::new(None);
        processor
            .process(handle, sink.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            sink.files(),
            vec![
                "elasticsearch/aarecords__0.json.gz".to_string(),
                "elasticsearch/aarecords__1.json.gz".to_string(),
                "elasticsearch/aarecords__2.json.gz".to_string(),
            ]
        );
        assert_eq!(
            torrent.file_priority("elasticsearch/aarecords__0.json.gz"),
            Some(FilePriority::Now)
        );
        assert_eq!(
            torrent.file_priority("elasticsearch/aarecords__1.json.gz"),
            Some(FilePriority::High)
        );
        assert_eq!(
            torrent.file_priority("elasticsearch/aarecords__2.json.gz"),
            Some(FilePriority::Normal)
        );
        assert!(torrent.removed());
    }
}
