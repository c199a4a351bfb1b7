use std::fs;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use harvest_core::{
    BuilderSnapshot, HarvestConfig, PageEntry, Record, RunOutcome, SourceLabel, SourcePage,
    UploadSnapshot,
};
use harvest_engine::{
    status, AbortCause, DirectoryUploader, HarvestPipeline, PipelineError, RecordSource,
    SourceError, StateStore, UploadError, Uploader, UPLOAD_FILE,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Upstream listing held in memory; the page at `position` starts at
/// entry `position - 1`.
struct MemorySource {
    entries: Vec<PageEntry>,
    requested: Mutex<Vec<u64>>,
    fail_at: Mutex<Option<u64>>,
}

impl MemorySource {
    fn new(keys: &[&str]) -> Self {
        Self {
            entries: keys.iter().map(|key| PageEntry::Record(record(key))).collect(),
            requested: Mutex::new(Vec::new()),
            fail_at: Mutex::new(None),
        }
    }

    fn failing_once_at(self, position: u64) -> Self {
        *self.fail_at.lock().unwrap() = Some(position);
        self
    }

    fn requested(&self) -> Vec<u64> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn list(&self, position: u64, page_size: u32) -> Result<SourcePage, SourceError> {
        self.requested.lock().unwrap().push(position);
        {
            let mut fail_at = self.fail_at.lock().unwrap();
            if *fail_at == Some(position) {
                *fail_at = None;
                return Err(SourceError::Malformed("truncated response".to_string()));
            }
        }
        let start = (position - 1) as usize;
        if start >= self.entries.len() {
            return Ok(SourcePage::exhausted());
        }
        let end = (start + page_size as usize).min(self.entries.len());
        Ok(SourcePage::new(
            self.entries[start..end].to_vec(),
            end < self.entries.len(),
        ))
    }
}

/// Directory store whose first `failures` puts are rejected.
struct FlakyUploader {
    inner: DirectoryUploader,
    failures: AtomicUsize,
}

#[async_trait]
impl Uploader for FlakyUploader {
    async fn put(&self, payload: Bytes, destination: &str) -> Result<(), UploadError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(UploadError::Rejected("quota exceeded".to_string()));
        }
        self.inner.put(payload, destination).await
    }

    async fn list(&self) -> Result<Vec<String>, UploadError> {
        self.inner.list().await
    }
}

fn record(key: &str) -> Record {
    Record::new(
        key,
        format!("https://example.org/{key}"),
        format!("text of {key}"),
        SourceLabel::LokaleBekendmakingen,
    )
    .unwrap()
}

fn config(page_size: u32, capacity: usize) -> HarvestConfig {
    HarvestConfig {
        page_size,
        shard_capacity: NonZeroUsize::new(capacity).unwrap(),
        ..HarvestConfig::default()
    }
}

struct Workspace {
    _temp: TempDir,
    state_dir: std::path::PathBuf,
    out_dir: std::path::PathBuf,
}

impl Workspace {
    fn new() -> Self {
        harvest_logging::initialize_for_tests();
        let temp = TempDir::new().unwrap();
        Self {
            state_dir: temp.path().join("state"),
            out_dir: temp.path().join("out"),
            _temp: temp,
        }
    }

    fn pipeline(
        &self,
        source: Arc<dyn RecordSource>,
        uploader: Arc<dyn Uploader>,
        config: HarvestConfig,
    ) -> HarvestPipeline {
        HarvestPipeline::new(source, uploader, StateStore::new(&self.state_dir), config)
            .with_politeness(Duration::ZERO)
    }

    fn directory(&self) -> Arc<DirectoryUploader> {
        Arc::new(DirectoryUploader::new(&self.out_dir))
    }

    fn shards(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.out_dir)
            .map(|entries| {
                entries
                    .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    fn shard_lines(&self, name: &str) -> Vec<serde_json::Value> {
        fs::read_to_string(self.out_dir.join(name))
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

#[tokio::test]
async fn ships_deduplicated_shards_to_a_directory() {
    let ws = Workspace::new();
    let source = Arc::new(MemorySource::new(&["a", "b", "c", "a", "d"]));

    let report = ws
        .pipeline(source.clone(), ws.directory(), config(2, 2))
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Exhausted);
    assert_eq!(report.stats.duplicates, 1);
    assert_eq!(report.stats.records_shipped, 4);
    assert_eq!(report.next_position, 6);
    assert_eq!(source.requested(), vec![1, 3, 5]);
    assert_eq!(
        ws.shards(),
        vec!["shard_000000_000002.jsonl", "shard_000002_000004.jsonl"]
    );
    assert_eq!(
        ws.shard_lines("shard_000002_000004.jsonl")[1],
        serde_json::json!({
            "url": "https://example.org/d",
            "content": "text of d",
            "source": "Lokale Bekendmakingen",
        })
    );

    let summary = status(&StateStore::new(&ws.state_dir), &*ws.directory())
        .await
        .unwrap();
    assert_eq!(summary.next_position, 6);
    assert_eq!(summary.seen_keys, 4);
    assert_eq!(summary.next_shard_start, 4);
    assert_eq!(summary.buffered, 0);
    assert_eq!(summary.remote_objects, 2);
}

#[tokio::test]
async fn rerun_after_exhaustion_ships_nothing_new() {
    let ws = Workspace::new();
    let source = Arc::new(MemorySource::new(&["a", "b", "c"]));
    ws.pipeline(source.clone(), ws.directory(), config(10, 2))
        .run()
        .await
        .unwrap();

    let report = ws
        .pipeline(source.clone(), ws.directory(), config(10, 2))
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Exhausted);
    assert_eq!(report.stats.shards_shipped, 0);
    assert_eq!(source.requested(), vec![1, 4]);
    assert_eq!(
        ws.shards(),
        vec!["shard_000000_000002.jsonl", "shard_000002_000003.jsonl"]
    );
}

#[tokio::test]
async fn listing_failure_aborts_and_next_run_resumes() {
    let ws = Workspace::new();
    let source = Arc::new(MemorySource::new(&["a", "b", "c", "d", "e"]).failing_once_at(3));

    let err = ws
        .pipeline(source.clone(), ws.directory(), config(2, 2))
        .run()
        .await
        .unwrap_err();
    match err {
        PipelineError::Aborted { cause, report } => {
            assert!(matches!(cause, AbortCause::Listing(_)));
            assert_eq!(report.next_position, 3);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(ws.shards(), vec!["shard_000000_000002.jsonl"]);

    let report = ws
        .pipeline(source.clone(), ws.directory(), config(2, 2))
        .run()
        .await
        .unwrap();
    assert_eq!(report.outcome, RunOutcome::Exhausted);
    assert_eq!(source.requested(), vec![1, 3, 3, 5]);
    assert_eq!(
        ws.shards(),
        vec![
            "shard_000000_000002.jsonl",
            "shard_000002_000004.jsonl",
            "shard_000004_000005.jsonl"
        ]
    );
}

#[tokio::test]
async fn failed_upload_keeps_the_page_for_the_next_run() {
    let ws = Workspace::new();
    let source = Arc::new(MemorySource::new(&["a", "b", "c"]));
    let flaky = Arc::new(FlakyUploader {
        inner: DirectoryUploader::new(&ws.out_dir),
        failures: AtomicUsize::new(1),
    });

    let err = ws
        .pipeline(source.clone(), flaky.clone(), config(2, 2))
        .run()
        .await
        .unwrap_err();
    match err {
        PipelineError::Aborted { cause, report } => {
            assert!(matches!(
                cause,
                AbortCause::Ship { ref name, .. } if name == "shard_000000_000002.jsonl"
            ));
            assert_eq!(report.next_position, 1);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(ws.shards().is_empty());
    let uploads: serde_json::Value =
        serde_json::from_slice(&fs::read(ws.state_dir.join(UPLOAD_FILE)).unwrap()).unwrap();
    assert_eq!(
        uploads,
        serde_json::json!({
            "lastDeliveredIndex": 0,
            "shipping": ["shard_000000_000002.jsonl"],
        })
    );

    let report = ws
        .pipeline(source.clone(), flaky, config(2, 2))
        .run()
        .await
        .unwrap();
    assert_eq!(report.outcome, RunOutcome::Exhausted);
    assert_eq!(
        ws.shards(),
        vec!["shard_000000_000002.jsonl", "shard_000002_000003.jsonl"]
    );
    let first: Vec<_> = ws
        .shard_lines("shard_000000_000002.jsonl")
        .into_iter()
        .map(|line| line["url"].clone())
        .collect();
    assert_eq!(first, vec!["https://example.org/a", "https://example.org/b"]);
}

#[tokio::test]
async fn quota_ships_the_remainder_and_resumes_after_it() {
    let ws = Workspace::new();
    let source = Arc::new(MemorySource::new(&["a", "b", "c", "a", "d"]));
    let limited = HarvestConfig {
        max_records: Some(3),
        ..config(2, 2)
    };

    let report = ws
        .pipeline(source.clone(), ws.directory(), limited)
        .run()
        .await
        .unwrap();
    assert_eq!(report.outcome, RunOutcome::QuotaReached);
    assert_eq!(report.next_position, 4);
    assert_eq!(
        ws.shards(),
        vec!["shard_000000_000002.jsonl", "shard_000002_000003.jsonl"]
    );

    let report = ws
        .pipeline(source.clone(), ws.directory(), config(2, 2))
        .run()
        .await
        .unwrap();
    assert_eq!(report.outcome, RunOutcome::Exhausted);
    assert_eq!(report.stats.duplicates, 1);
    assert_eq!(
        ws.shards(),
        vec![
            "shard_000000_000002.jsonl",
            "shard_000002_000003.jsonl",
            "shard_000003_000004.jsonl"
        ]
    );
}

#[tokio::test]
async fn shards_written_by_another_machine_are_not_mistaken_for_ours() {
    let ws = Workspace::new();
    ws.pipeline(
        Arc::new(MemorySource::new(&["a", "b"])),
        ws.directory(),
        config(3, 2),
    )
    .run()
    .await
    .unwrap();
    fs::write(ws.out_dir.join("shard_000002_000005.jsonl"), "{}\n{}\n{}\n").unwrap();

    let source = Arc::new(MemorySource::new(&["a", "b", "c", "d", "e"]));
    let report = ws
        .pipeline(source.clone(), ws.directory(), config(3, 2))
        .run()
        .await
        .unwrap();

    assert_eq!(report.stats.accepted, 3);
    assert_eq!(report.stats.already_delivered, 0);
    assert_eq!(report.stats.records_shipped, 3);
    assert_eq!(
        ws.shards(),
        vec![
            "shard_000000_000002.jsonl",
            "shard_000002_000005.jsonl",
            "shard_000005_000007.jsonl",
            "shard_000007_000008.jsonl",
        ]
    );
    let keys: Vec<_> = ["shard_000005_000007.jsonl", "shard_000007_000008.jsonl"]
        .into_iter()
        .flat_map(|name| ws.shard_lines(name))
        .map(|line| line["url"].clone())
        .collect();
    assert_eq!(
        keys,
        vec![
            "https://example.org/c",
            "https://example.org/d",
            "https://example.org/e"
        ]
    );
}

#[tokio::test]
async fn status_reports_where_the_next_shard_starts() {
    let ws = Workspace::new();
    let store = StateStore::new(&ws.state_dir);
    store
        .persist_builder(&BuilderSnapshot {
            buffer_start: 2,
            position: 3,
            page_keys: vec![],
            buffered: vec![record("x")],
        })
        .unwrap();
    store
        .persist_delivered(&UploadSnapshot::delivered(2))
        .unwrap();

    let summary = status(&store, &*ws.directory()).await.unwrap();
    assert_eq!(summary.buffered, 1);
    assert_eq!(summary.next_shard_start, 2);

    fs::create_dir_all(&ws.out_dir).unwrap();
    fs::write(ws.out_dir.join("shard_000002_000005.jsonl"), "").unwrap();
    let summary = status(&store, &*ws.directory()).await.unwrap();
    assert_eq!(summary.remote_delivered, 5);
    assert_eq!(summary.next_shard_start, 5);
}

#[tokio::test]
async fn cancelled_run_finishes_without_listing() {
    let ws = Workspace::new();
    let source = Arc::new(MemorySource::new(&["a", "b"]));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let pipeline = ws
        .pipeline(source.clone(), ws.directory(), config(2, 2))
        .with_cancellation(cancel);
    assert!(pipeline.cancellation_token().is_cancelled());
    let report = pipeline.run().await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Interrupted);
    assert_eq!(report.next_position, 1);
    assert!(source.requested().is_empty());
    assert!(ws.shards().is_empty());
}

#[tokio::test]
async fn corrupt_state_refuses_to_run() {
    let ws = Workspace::new();
    fs::create_dir_all(&ws.state_dir).unwrap();
    fs::write(ws.state_dir.join("cursor.json"), "{").unwrap();
    let source = Arc::new(MemorySource::new(&["a"]));

    let err = ws
        .pipeline(source.clone(), ws.directory(), config(2, 2))
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::State(_)));
    assert!(source.requested().is_empty());
}
