use serde::{Deserialize, Serialize};

pub const FIRST_POSITION: u64 = 1;

/// Persisted pagination position into the upstream listing.
///
/// Positions are 1-based and only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    next_position: u64,
}

/// On-disk form: `{ "nextPosition": <int> }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorSnapshot {
    #[serde(rename = "nextPosition")]
    pub next_position: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cursor position must be at least {FIRST_POSITION}, found {0}")]
pub struct InvalidPosition(pub u64);

impl Default for Cursor {
    fn default() -> Self {
        Self::new()
    }
}

impl Cursor {
    pub fn new() -> Self {
        Self {
            next_position: FIRST_POSITION,
        }
    }

    pub fn at(position: u64) -> Result<Self, InvalidPosition> {
        if position < FIRST_POSITION {
            return Err(InvalidPosition(position));
        }
        Ok(Self {
            next_position: position,
        })
    }

    pub fn current(&self) -> u64 {
        self.next_position
    }

    pub fn advance(&mut self, by: u64) {
        self.next_position = self.next_position.saturating_add(by);
    }

    /// Move forward to `position` if it lies ahead; never moves back.
    pub fn catch_up(&mut self, position: u64) {
        self.next_position = self.next_position.max(position);
    }

    pub fn is_at_start(&self) -> bool {
        self.next_position == FIRST_POSITION
    }

    pub fn snapshot(&self) -> CursorSnapshot {
        CursorSnapshot {
            next_position: self.next_position,
        }
    }

    pub fn restore(snapshot: CursorSnapshot) -> Result<Self, InvalidPosition> {
        Self::at(snapshot.next_position)
    }
}
