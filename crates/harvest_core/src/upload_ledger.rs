use serde::{Deserialize, Serialize};

use crate::{BuilderSnapshot, ShardName};

/// Highest shard end index confirmed delivered to the remote store, plus the
/// shards announced since the last page commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadLedger {
    max_delivered: u64,
    shipping: Vec<ShardName>,
}

/// On-disk form: `{ "lastDeliveredIndex": <int>, "shipping": [<name>, ...] }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSnapshot {
    #[serde(rename = "lastDeliveredIndex")]
    pub last_delivered_index: u64,
    /// Shards written ahead of their upload and not yet covered by a
    /// builder checkpoint.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shipping: Vec<String>,
}

impl UploadSnapshot {
    pub fn delivered(last_delivered_index: u64) -> Self {
        Self {
            last_delivered_index,
            shipping: Vec::new(),
        }
    }
}

/// Where shard numbering continues after a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePoint {
    /// No builder checkpoint: a fresh builder starts at the delivered index.
    Fresh { start: u64 },
    /// The checkpointed page is replayed from `buffer_start`; indices below
    /// `shipped_until` sit in shards this state directory announced and the
    /// remote store lists.
    Replay { buffer_start: u64, shipped_until: u64 },
    /// The remote store holds shards past the checkpoint that this state
    /// directory did not write. Buffered records are renumbered from `start`
    /// and shipped again.
    Renumber { start: u64 },
}

impl ResumePoint {
    /// Start index of the next shard the run will write.
    pub fn next_shard_start(self) -> u64 {
        match self {
            ResumePoint::Fresh { start } | ResumePoint::Renumber { start } => start,
            ResumePoint::Replay { shipped_until, .. } => shipped_until,
        }
    }
}

impl UploadLedger {
    pub fn new(max_delivered: u64) -> Self {
        Self {
            max_delivered,
            shipping: Vec::new(),
        }
    }

    /// Effective delivered index from the local checkpoint and the remote
    /// listing. The remote store wins whenever it is ahead.
    pub fn reconcile<S: AsRef<str>>(local_index: u64, remote_listing: &[S]) -> Self {
        Self::new(local_index).reconciled(remote_listing)
    }

    /// Same ledger with the delivered index raised to the remote listing.
    pub fn reconciled<S: AsRef<str>>(mut self, remote_listing: &[S]) -> Self {
        self.max_delivered = self.max_delivered.max(max_remote_end(remote_listing));
        self
    }

    pub fn max_delivered(&self) -> u64 {
        self.max_delivered
    }

    pub fn record_delivered(&mut self, end_index: u64) {
        self.max_delivered = self.max_delivered.max(end_index);
    }

    /// Shards announced and not yet settled by a page commit.
    pub fn shipping(&self) -> &[ShardName] {
        &self.shipping
    }

    /// Records that `name` is about to be uploaded. Must be persisted before
    /// the upload starts.
    pub fn announce(&mut self, name: ShardName) {
        if !self.shipping.contains(&name) {
            self.shipping.push(name);
        }
    }

    /// Forgets announced shards that lie wholly below a committed buffer start.
    pub fn settle(&mut self, buffer_start: u64) {
        self.shipping.retain(|name| name.end > buffer_start);
    }

    /// Decides how the builder resumes, given this ledger as loaded from the
    /// state directory.
    ///
    /// A replayed page may skip an index only when it lies in a shard that
    /// was announced here and is present remotely, contiguously from the
    /// checkpoint's buffer start. Any other delivered index past that point
    /// was written by someone else, so numbering moves past it.
    pub fn resume_point<S: AsRef<str>>(
        &self,
        builder: Option<&BuilderSnapshot>,
        remote_listing: &[S],
    ) -> ResumePoint {
        let remote: Vec<ShardName> = remote_listing
            .iter()
            .filter_map(|name| ShardName::parse(name.as_ref()))
            .collect();
        let delivered = remote
            .iter()
            .map(|name| name.end)
            .fold(self.max_delivered, u64::max);

        let Some(builder) = builder else {
            return ResumePoint::Fresh { start: delivered };
        };
        let buffer_start = builder.buffer_start;
        let mut shipped_until = buffer_start;
        while let Some(end) = self
            .shipping
            .iter()
            .filter(|name| name.start <= shipped_until && name.end > shipped_until)
            .filter(|name| remote.contains(name))
            .map(|name| name.end)
            .max()
        {
            shipped_until = end;
        }

        if delivered > shipped_until {
            ResumePoint::Renumber { start: delivered }
        } else {
            ResumePoint::Replay {
                buffer_start,
                shipped_until,
            }
        }
    }

    pub fn snapshot(&self) -> UploadSnapshot {
        UploadSnapshot {
            last_delivered_index: self.max_delivered,
            shipping: self.shipping.iter().map(ShardName::to_string).collect(),
        }
    }

    /// Malformed announced names are dropped.
    pub fn restore(snapshot: UploadSnapshot) -> Self {
        Self {
            max_delivered: snapshot.last_delivered_index,
            shipping: snapshot
                .shipping
                .iter()
                .filter_map(|name| ShardName::parse(name))
                .collect(),
        }
    }
}

/// Largest `end` among well-formed shard names; malformed names are ignored.
pub fn max_remote_end<S: AsRef<str>>(remote_listing: &[S]) -> u64 {
    remote_listing
        .iter()
        .filter_map(|name| ShardName::parse(name.as_ref()))
        .map(|name| name.end)
        .max()
        .unwrap_or(0)
}
