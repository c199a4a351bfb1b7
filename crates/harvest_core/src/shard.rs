use std::fmt;
use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::Record;

pub const SHARD_PREFIX: &str = "shard";
pub const SHARD_EXTENSION: &str = "jsonl";
const INDEX_WIDTH: usize = 6;

/// Deterministic shard identity: the half-open record index range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardName {
    pub start: u64,
    pub end: u64,
}

impl ShardName {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Parse `shard_{start}_{end}.{ext}`, ignoring any leading directories.
    /// Returns `None` for anything else, including `start > end`.
    pub fn parse(name: &str) -> Option<Self> {
        let file_name = name.rsplit('/').next()?;
        let (stem, ext) = file_name.rsplit_once('.')?;
        if ext.is_empty() {
            return None;
        }
        let mut parts = stem.split('_');
        if parts.next()? != SHARD_PREFIX {
            return None;
        }
        let start = parse_index(parts.next()?)?;
        let end = parse_index(parts.next()?)?;
        if parts.next().is_some() || start > end {
            return None;
        }
        Some(Self { start, end })
    }
}

fn parse_index(digits: &str) -> Option<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

impl fmt::Display for ShardName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{SHARD_PREFIX}_{start:0width$}_{end:0width$}.{SHARD_EXTENSION}",
            start = self.start,
            end = self.end,
            width = INDEX_WIDTH
        )
    }
}

/// A sealed, immutable batch of records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    name: ShardName,
    records: Vec<Record>,
}

impl Shard {
    pub fn name(&self) -> ShardName {
        self.name
    }

    pub fn start(&self) -> u64 {
        self.name.start
    }

    pub fn end(&self) -> u64 {
        self.name.end
    }

    pub fn destination_name(&self) -> String {
        self.name.to_string()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// One JSON object per line, each line newline-terminated.
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for record in &self.records {
            out.push_str(&record.to_shard_line()?);
            out.push('\n');
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Buffered,
    /// The record's index lies in a shard an interrupted run already
    /// shipped under the same name.
    AlreadyDelivered,
}

/// On-disk form of the builder: the unshipped records plus the page commit
/// they belong to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderSnapshot {
    /// Index of the first buffered record.
    #[serde(rename = "bufferStart")]
    pub buffer_start: u64,
    /// Cursor position this snapshot was committed with.
    pub position: u64,
    /// Keys accepted by the page this snapshot commits.
    #[serde(rename = "pageKeys", default)]
    pub page_keys: Vec<String>,
    #[serde(default)]
    pub buffered: Vec<Record>,
}

/// Accumulates accepted records and seals them into contiguous shards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardBuilder {
    capacity: NonZeroUsize,
    next_index: u64,
    delivered: u64,
    buffer: Vec<Record>,
}

impl ShardBuilder {
    /// Fresh builder whose first shard starts at `start_index`.
    pub fn new(capacity: NonZeroUsize, start_index: u64) -> Self {
        Self {
            capacity,
            next_index: start_index,
            delivered: start_index,
            buffer: Vec::new(),
        }
    }

    /// Rebuild from a checkpoint at its own buffer start. Indices below
    /// `shipped_until` are treated as shipped, both for the buffered records
    /// and for whatever is appended next (a replayed page).
    pub fn resume(capacity: NonZeroUsize, snapshot: &BuilderSnapshot, shipped_until: u64) -> Self {
        let mut builder = Self {
            capacity,
            next_index: snapshot.buffer_start,
            delivered: shipped_until,
            buffer: Vec::new(),
        };
        builder.refill(snapshot);
        builder
    }

    /// Rebuild from a checkpoint with the buffered records moved to
    /// `start_index`. Nothing is skipped.
    pub fn renumber(capacity: NonZeroUsize, snapshot: &BuilderSnapshot, start_index: u64) -> Self {
        let mut builder = Self::new(capacity, start_index);
        builder.refill(snapshot);
        builder
    }

    fn refill(&mut self, snapshot: &BuilderSnapshot) {
        for record in &snapshot.buffered {
            self.append(record.clone());
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Index the next appended record will receive.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn buffer_start(&self) -> u64 {
        self.next_index - self.buffer.len() as u64
    }

    pub fn buffered(&self) -> &[Record] {
        &self.buffer
    }

    pub fn append(&mut self, record: Record) -> AppendOutcome {
        let index = self.next_index;
        self.next_index += 1;
        if index < self.delivered {
            return AppendOutcome::AlreadyDelivered;
        }
        self.buffer.push(record);
        AppendOutcome::Buffered
    }

    pub fn seal_if_full(&mut self) -> Option<Shard> {
        if self.buffer.len() < self.capacity.get() {
            return None;
        }
        let rest = self.buffer.split_off(self.capacity.get());
        let records = std::mem::replace(&mut self.buffer, rest);
        Some(self.seal(records))
    }

    /// Seal whatever is buffered, even under capacity. `None` when empty.
    pub fn seal_remainder(&mut self) -> Option<Shard> {
        if self.buffer.is_empty() {
            return None;
        }
        let records = std::mem::take(&mut self.buffer);
        Some(self.seal(records))
    }

    fn seal(&self, records: Vec<Record>) -> Shard {
        // Called after the sealed records left the buffer.
        let end = self.buffer_start();
        let start = end - records.len() as u64;
        Shard {
            name: ShardName::new(start, end),
            records,
        }
    }

    pub fn snapshot(&self, position: u64, page_keys: Vec<String>) -> BuilderSnapshot {
        BuilderSnapshot {
            buffer_start: self.buffer_start(),
            position,
            page_keys,
            buffered: self.buffer.clone(),
        }
    }
}
