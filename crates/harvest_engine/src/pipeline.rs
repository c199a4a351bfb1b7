use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use harvest_core::{
    max_remote_end, update, Checkpoint, Effect, HarvestConfig, HarvestState, Msg, Phase,
    RunReport, Shard, SourcePage, UploadLedger,
};
use harvest_logging::{harvest_debug, harvest_error, harvest_info, harvest_warn};
use tokio_util::sync::CancellationToken;

use crate::pace::Pacer;
use crate::source::{RecordSource, SourceError};
use crate::state::{StateError, StateStore};
use crate::upload::{UploadError, Uploader};

pub const DEFAULT_POLITENESS: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("cannot load state: {0}")]
    State(#[from] StateError),
    #[error("cannot list the remote store: {0}")]
    RemoteListing(#[source] UploadError),
    #[error("run aborted: {cause}")]
    Aborted {
        #[source]
        cause: AbortCause,
        report: Box<RunReport>,
    },
    #[error("state machine stalled in phase {0:?}")]
    Stalled(Phase),
}

/// The failure that ended an aborted run.
#[derive(Debug, thiserror::Error)]
pub enum AbortCause {
    #[error("listing failed: {0}")]
    Listing(#[source] SourceError),
    #[error("shipping {name} failed: {source}")]
    Ship {
        name: String,
        #[source]
        source: UploadError,
    },
    #[error("encoding {name} failed: {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("persisting state failed: {0}")]
    Persist(#[source] StateError),
    #[error("{0}")]
    Protocol(String),
}

/// Local and remote progress, without running anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub next_position: u64,
    pub seen_keys: usize,
    pub local_delivered: u64,
    pub remote_delivered: u64,
    pub buffered: usize,
    pub remote_objects: usize,
    /// Start index of the next shard a run would write.
    pub next_shard_start: u64,
}

/// Drives the core state machine against a source, an uploader and a
/// state directory.
pub struct HarvestPipeline {
    source: Arc<dyn RecordSource>,
    uploader: Arc<dyn Uploader>,
    store: StateStore,
    config: HarvestConfig,
    politeness: Duration,
    cancel: CancellationToken,
}

impl HarvestPipeline {
    pub fn new(
        source: Arc<dyn RecordSource>,
        uploader: Arc<dyn Uploader>,
        store: StateStore,
        config: HarvestConfig,
    ) -> Self {
        Self {
            source,
            uploader,
            store,
            config,
            politeness: DEFAULT_POLITENESS,
            cancel: CancellationToken::new(),
        }
    }

    /// Minimum pause between consecutive listing and shipping calls.
    pub fn with_politeness(mut self, politeness: Duration) -> Self {
        self.politeness = politeness;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Cancelling stops the run at the next page boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let local = self.store.load()?;
        let remote = self
            .uploader
            .list()
            .await
            .map_err(PipelineError::RemoteListing)?;
        harvest_info!(
            "Resuming at position {} with {} known keys; local delivered {}, remote delivered {}",
            local.cursor.current(),
            local.dedup.len(),
            local.uploads.last_delivered_index,
            max_remote_end(&remote)
        );

        let mut pacer = Pacer::new(self.politeness);
        let mut abort_cause = None;
        let (mut state, mut effect) = update(
            HarvestState::new(self.config.clone()),
            Msg::Restored(local.into_restored(remote)),
        );

        loop {
            let Some(current) = effect.take() else {
                return Err(PipelineError::Stalled(state.phase()));
            };
            let msg = match current {
                Effect::ListPage {
                    position,
                    page_size,
                } => {
                    if self.cancel.is_cancelled() {
                        harvest_warn!("Interrupted; finishing before position {position}");
                        Msg::Interrupted
                    } else {
                        pacer.wait().await;
                        match self.source.list(position, page_size).await {
                            Ok(page) => {
                                log_page(position, &page);
                                Msg::PageListed(page)
                            }
                            Err(err) => {
                                let reason = err.to_string();
                                abort_cause = Some(AbortCause::Listing(err));
                                Msg::ListingFailed { reason }
                            }
                        }
                    }
                }
                Effect::ShipShard(shard) => {
                    pacer.wait().await;
                    match self.ship(&shard, state.uploads().clone()).await {
                        Ok(()) => Msg::ShardDelivered { name: shard.name() },
                        Err(cause) => {
                            let failure = match &cause {
                                AbortCause::Persist(err) => Msg::PersistFailed {
                                    reason: err.to_string(),
                                },
                                other => Msg::ShipFailed {
                                    name: shard.name(),
                                    reason: other.to_string(),
                                },
                            };
                            abort_cause = Some(cause);
                            failure
                        }
                    }
                }
                Effect::PersistCheckpoint(checkpoint) => match self.persist(&checkpoint) {
                    Ok(()) => Msg::CheckpointPersisted,
                    Err(err) => {
                        let reason = err.to_string();
                        abort_cause = Some(AbortCause::Persist(err));
                        Msg::PersistFailed { reason }
                    }
                },
                Effect::Finish(report) => {
                    return finish(report, abort_cause.take());
                }
            };
            (state, effect) = update(state, msg);
        }
    }

    /// Announce, upload, then record the shard's end index as delivered.
    /// `uploads` already carries the announcement.
    async fn ship(&self, shard: &Shard, mut uploads: UploadLedger) -> Result<(), AbortCause> {
        let name = shard.destination_name();
        self.store
            .persist_delivered(&uploads.snapshot())
            .map_err(AbortCause::Persist)?;
        let jsonl = shard.to_jsonl().map_err(|source| AbortCause::Encode {
            name: name.clone(),
            source,
        })?;
        harvest_info!("Shipping {name} ({} records)", shard.len());
        self.uploader
            .put(Bytes::from(jsonl), &name)
            .await
            .map_err(|source| AbortCause::Ship {
                name: name.clone(),
                source,
            })?;

        uploads.record_delivered(shard.end());
        self.store
            .persist_delivered(&uploads.snapshot())
            .map_err(AbortCause::Persist)
    }

    fn persist(&self, checkpoint: &Checkpoint) -> Result<(), StateError> {
        self.store.persist_checkpoint(checkpoint)?;
        harvest_debug!(
            "Checkpoint at position {} ({} buffered, {} keys)",
            checkpoint.cursor.next_position,
            checkpoint.builder.buffered.len(),
            checkpoint.dedup.seen_keys.len()
        );
        Ok(())
    }
}

fn log_page(position: u64, page: &SourcePage) {
    harvest_debug!(
        "Page at {position}: {} entries, more: {}",
        page.entries.len(),
        page.has_more
    );
}

fn finish(report: RunReport, cause: Option<AbortCause>) -> Result<RunReport, PipelineError> {
    let stats = report.stats;
    if report.is_aborted() {
        harvest_error!("Run {}", report.outcome);
        let cause = cause.unwrap_or_else(|| AbortCause::Protocol(report.outcome.to_string()));
        return Err(PipelineError::Aborted {
            cause,
            report: Box::new(report),
        });
    }
    harvest_info!(
        "Run finished ({}): {} pages, {} records in {} shards, {} duplicates, {} dropped, {} empty, next position {}",
        report.outcome,
        stats.pages,
        stats.records_shipped,
        stats.shards_shipped,
        stats.duplicates,
        stats.dropped,
        stats.empty_content,
        report.next_position
    );
    Ok(report)
}

/// Summarises the state directory and the remote store.
pub async fn status(
    store: &StateStore,
    uploader: &dyn Uploader,
) -> Result<StatusReport, PipelineError> {
    let local = store.load()?;
    let remote = uploader.list().await.map_err(PipelineError::RemoteListing)?;
    let resume = UploadLedger::restore(local.uploads.clone())
        .resume_point(local.builder.as_ref(), &remote);
    let next_position = match &local.builder {
        Some(builder) => local.cursor.current().max(builder.position),
        None => local.cursor.current(),
    };
    Ok(StatusReport {
        next_position,
        seen_keys: local.dedup.len(),
        local_delivered: local.uploads.last_delivered_index,
        remote_delivered: max_remote_end(&remote),
        buffered: local.builder.map_or(0, |builder| builder.buffered.len()),
        remote_objects: remote.len(),
        next_shard_start: resume.next_shard_start(),
    })
}
