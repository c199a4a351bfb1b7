//! Harvest core: ledgers, shard accounting and the pure pipeline state machine.
mod cursor;
mod dedup;
mod effect;
mod msg;
mod page;
mod record;
mod shard;
mod state;
mod update;
mod upload_ledger;

pub use cursor::{Cursor, CursorSnapshot, InvalidPosition, FIRST_POSITION};
pub use dedup::{DedupLedger, DedupSnapshot};
pub use effect::{Checkpoint, Effect};
pub use msg::{Msg, Restored};
pub use page::{PageEntry, SourcePage};
pub use record::{Record, RecordError, SourceLabel};
pub use shard::{
    AppendOutcome, BuilderSnapshot, Shard, ShardBuilder, ShardName, SHARD_EXTENSION, SHARD_PREFIX,
};
pub use state::{
    HarvestConfig, HarvestState, Phase, RunOutcome, RunReport, RunStats, StopReason,
    DEFAULT_PAGE_SIZE, DEFAULT_SHARD_CAPACITY,
};
pub use update::update;
pub use upload_ledger::{max_remote_end, ResumePoint, UploadLedger, UploadSnapshot};
