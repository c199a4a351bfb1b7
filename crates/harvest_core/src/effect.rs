use crate::{BuilderSnapshot, CursorSnapshot, DedupSnapshot, RunReport, Shard, UploadSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Request the page starting at `position`; answer with `PageListed` or `ListingFailed`.
    ListPage { position: u64, page_size: u32 },
    /// Persist the upload ledger with the shard announced, upload the shard,
    /// then persist its end index as delivered; answer with
    /// `ShardDelivered`, `ShipFailed` or `PersistFailed`.
    ShipShard(Shard),
    /// Write the builder snapshot, the upload ledger, the dedup ledger and
    /// the cursor, in that order; answer with `CheckpointPersisted` or `PersistFailed`.
    PersistCheckpoint(Checkpoint),
    /// The run is over.
    Finish(RunReport),
}

/// State written at a page boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub builder: BuilderSnapshot,
    pub uploads: UploadSnapshot,
    pub dedup: DedupSnapshot,
    pub cursor: CursorSnapshot,
}
