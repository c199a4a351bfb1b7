use crate::{BuilderSnapshot, Cursor, DedupLedger, ShardName, SourcePage, UploadSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// Persisted state was loaded and the remote store listed.
    Restored(Restored),
    /// The source returned the page requested by `Effect::ListPage`.
    PageListed(SourcePage),
    /// The source failed after exhausting its retries.
    ListingFailed { reason: String },
    /// A shard was uploaded and its end index persisted.
    ShardDelivered { name: ShardName },
    /// A shard could not be delivered.
    ShipFailed { name: ShardName, reason: String },
    /// All state files of a checkpoint were written.
    CheckpointPersisted,
    /// Writing a state file failed.
    PersistFailed { reason: String },
    /// Operator asked the run to stop at the next page boundary.
    Interrupted,
}

/// Everything the pipeline needs to resume, as found at startup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Restored {
    pub cursor: Cursor,
    pub dedup: DedupLedger,
    pub builder: Option<BuilderSnapshot>,
    pub local_uploads: UploadSnapshot,
    pub remote_listing: Vec<String>,
}
