use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroUsize;

use crate::{
    AppendOutcome, Checkpoint, Cursor, DedupLedger, PageEntry, Restored, ResumePoint, Shard,
    ShardBuilder, SourcePage, UploadLedger,
};

pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_SHARD_CAPACITY: NonZeroUsize = match NonZeroUsize::new(200) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestConfig {
    pub page_size: u32,
    pub shard_capacity: NonZeroUsize,
    /// Stop after this many records were accepted in one run.
    pub max_records: Option<u64>,
    /// Drop records whose content is blank instead of shipping them.
    pub skip_empty_content: bool,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            shard_capacity: DEFAULT_SHARD_CAPACITY,
            max_records: None,
            skip_empty_content: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Init,
    Listing,
    Filtering,
    Shipping,
    Done,
    Aborted,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Aborted)
    }
}

/// Why a run stopped pulling pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Exhausted,
    QuotaReached,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Exhausted,
    QuotaReached,
    Interrupted,
    Aborted { reason: String },
}

impl From<StopReason> for RunOutcome {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::Exhausted => RunOutcome::Exhausted,
            StopReason::QuotaReached => RunOutcome::QuotaReached,
            StopReason::Interrupted => RunOutcome::Interrupted,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Exhausted => write!(f, "upstream exhausted"),
            RunOutcome::QuotaReached => write!(f, "record quota reached"),
            RunOutcome::Interrupted => write!(f, "interrupted"),
            RunOutcome::Aborted { reason } => write!(f, "aborted: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunStats {
    pub pages: u64,
    pub accepted: u64,
    pub duplicates: u64,
    pub dropped: u64,
    pub empty_content: u64,
    pub already_delivered: u64,
    pub shards_shipped: u64,
    pub records_shipped: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub stats: RunStats,
    pub next_position: u64,
    pub delivered_index: u64,
    pub buffered: usize,
}

impl RunReport {
    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, RunOutcome::Aborted { .. })
    }
}

/// Page whose records are merged in memory but not yet committed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct PageCommit {
    consumed: u64,
    page_keys: Vec<String>,
}

/// Pipeline state owned by the orchestrator; driven only through `update`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestState {
    config: HarvestConfig,
    phase: Phase,
    cursor: Cursor,
    dedup: DedupLedger,
    builder: ShardBuilder,
    uploads: UploadLedger,
    outbox: VecDeque<Shard>,
    in_flight: Option<PageCommit>,
    committed_keys: Vec<String>,
    checkpoint_due: bool,
    stop: Option<StopReason>,
    drained: bool,
    stats: RunStats,
}

impl HarvestState {
    pub fn new(config: HarvestConfig) -> Self {
        let builder = ShardBuilder::new(config.shard_capacity, 0);
        Self {
            config,
            phase: Phase::Init,
            cursor: Cursor::new(),
            dedup: DedupLedger::new(),
            builder,
            uploads: UploadLedger::default(),
            outbox: VecDeque::new(),
            in_flight: None,
            committed_keys: Vec::new(),
            checkpoint_due: false,
            stop: None,
            drained: false,
            stats: RunStats::default(),
        }
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn dedup(&self) -> &DedupLedger {
        &self.dedup
    }

    pub fn builder(&self) -> &ShardBuilder {
        &self.builder
    }

    pub fn uploads(&self) -> &UploadLedger {
        &self.uploads
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    pub(crate) fn restore(&mut self, restored: Restored) {
        let Restored {
            cursor,
            dedup,
            builder,
            local_uploads,
            remote_listing,
        } = restored;

        let local = UploadLedger::restore(local_uploads);
        let resume = local.resume_point(builder.as_ref(), &remote_listing);
        self.uploads = local.reconciled(&remote_listing);
        self.cursor = cursor;
        self.dedup = dedup;

        self.builder = match builder {
            Some(snapshot) => {
                // The builder file is written first at every commit; when it is
                // ahead of the cursor the commit was cut short after it.
                if snapshot.position > self.cursor.current() {
                    self.cursor.catch_up(snapshot.position);
                    self.checkpoint_due = true;
                }
                self.dedup.extend(snapshot.page_keys.iter().cloned());
                self.dedup
                    .extend(snapshot.buffered.iter().map(|record| record.key().to_string()));
                let capacity = self.config.shard_capacity;
                let builder = match resume {
                    ResumePoint::Replay { shipped_until, .. } => {
                        ShardBuilder::resume(capacity, &snapshot, shipped_until)
                    }
                    other => {
                        self.checkpoint_due = true;
                        ShardBuilder::renumber(capacity, &snapshot, other.next_shard_start())
                    }
                };
                let skipped = snapshot.buffered.len() - builder.buffered().len();
                if skipped > 0 {
                    self.stats.already_delivered += skipped as u64;
                    self.checkpoint_due = true;
                }
                builder
            }
            None => {
                self.checkpoint_due = true;
                ShardBuilder::new(self.config.shard_capacity, resume.next_shard_start())
            }
        };

        while let Some(shard) = self.builder.seal_if_full() {
            self.outbox.push_back(shard);
            self.checkpoint_due = true;
        }
        if self.quota_reached() {
            self.stop = Some(StopReason::QuotaReached);
        }
        self.phase = Phase::Listing;
    }

    pub(crate) fn filter_page(&mut self, page: SourcePage) {
        self.phase = Phase::Filtering;
        let SourcePage { entries, has_more } = page;
        if entries.is_empty() {
            self.stop.get_or_insert(StopReason::Exhausted);
            return;
        }
        self.stats.pages += 1;

        let mut commit = PageCommit::default();
        for entry in entries {
            if self.quota_reached() {
                break;
            }
            commit.consumed += 1;
            let record = match entry {
                PageEntry::Record(record) => record,
                PageEntry::Dropped { .. } => {
                    self.stats.dropped += 1;
                    continue;
                }
            };
            if self.config.skip_empty_content && !record.has_content() {
                self.stats.empty_content += 1;
                continue;
            }
            if self.dedup.contains(record.key()) {
                self.stats.duplicates += 1;
                continue;
            }
            self.dedup.add(record.key());
            commit.page_keys.push(record.key().to_string());
            self.stats.accepted += 1;
            if self.builder.append(record) == AppendOutcome::AlreadyDelivered {
                self.stats.already_delivered += 1;
            }
            while let Some(shard) = self.builder.seal_if_full() {
                self.outbox.push_back(shard);
            }
        }
        self.in_flight = Some(commit);

        if self.quota_reached() {
            self.stop.get_or_insert(StopReason::QuotaReached);
        } else if !has_more {
            self.stop.get_or_insert(StopReason::Exhausted);
        }
    }

    /// Pops the in-flight shard if `name` matches it.
    pub(crate) fn mark_delivered(&mut self, name: crate::ShardName) -> bool {
        match self.outbox.front() {
            Some(shard) if shard.name() == name => {}
            _ => return false,
        }
        if let Some(shard) = self.outbox.pop_front() {
            self.uploads.record_delivered(shard.end());
            self.stats.shards_shipped += 1;
            self.stats.records_shipped += shard.len() as u64;
        }
        true
    }

    pub(crate) fn interrupt(&mut self) {
        self.stop.get_or_insert(StopReason::Interrupted);
    }

    pub(crate) fn next_step(&mut self) -> crate::Effect {
        use crate::Effect;

        if let Some(shard) = self.outbox.front() {
            self.phase = Phase::Shipping;
            self.uploads.announce(shard.name());
            return Effect::ShipShard(shard.clone());
        }
        if let Some(commit) = self.in_flight.take() {
            self.cursor.advance(commit.consumed);
            self.committed_keys = commit.page_keys;
            self.checkpoint_due = true;
        }
        if self.checkpoint_due {
            self.checkpoint_due = false;
            return Effect::PersistCheckpoint(self.checkpoint());
        }
        if let Some(reason) = self.stop {
            if !self.drained {
                self.drained = true;
                if let Some(shard) = self.builder.seal_remainder() {
                    self.outbox.push_back(shard);
                    self.checkpoint_due = true;
                    return self.next_step();
                }
            }
            self.phase = Phase::Done;
            return Effect::Finish(self.report(reason.into()));
        }
        self.phase = Phase::Listing;
        Effect::ListPage {
            position: self.cursor.current(),
            page_size: self.config.page_size,
        }
    }

    pub(crate) fn abort(&mut self, reason: String) -> crate::Effect {
        self.phase = Phase::Aborted;
        crate::Effect::Finish(self.report(RunOutcome::Aborted { reason }))
    }

    fn checkpoint(&mut self) -> Checkpoint {
        let page_keys = std::mem::take(&mut self.committed_keys);
        self.uploads.settle(self.builder.buffer_start());
        Checkpoint {
            builder: self.builder.snapshot(self.cursor.current(), page_keys),
            uploads: self.uploads.snapshot(),
            dedup: self.dedup.snapshot(),
            cursor: self.cursor.snapshot(),
        }
    }

    fn quota_reached(&self) -> bool {
        self.config
            .max_records
            .is_some_and(|quota| self.stats.accepted >= quota)
    }

    fn report(&self, outcome: RunOutcome) -> RunReport {
        RunReport {
            outcome,
            stats: self.stats,
            next_position: self.cursor.current(),
            delivered_index: self.uploads.max_delivered(),
            buffered: self.builder.buffered().len(),
        }
    }
}
