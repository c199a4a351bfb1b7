use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Set of record keys that have already been accepted for shipping.
///
/// Keys are never removed: the same upstream record must not be shipped
/// twice for the life of the target dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupLedger {
    seen: HashSet<String>,
}

/// On-disk form: `{ "seenKeys": [<string>, ...] }`, sorted for stable files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupSnapshot {
    #[serde(rename = "seenKeys")]
    pub seen_keys: Vec<String>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    /// Returns `true` when the key was not yet present.
    pub fn add(&mut self, key: impl Into<String>) -> bool {
        self.seen.insert(key.into())
    }

    pub fn extend<I, K>(&mut self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.seen.extend(keys.into_iter().map(Into::into));
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn snapshot(&self) -> DedupSnapshot {
        let mut seen_keys: Vec<String> = self.seen.iter().cloned().collect();
        seen_keys.sort_unstable();
        DedupSnapshot { seen_keys }
    }

    pub fn restore(snapshot: DedupSnapshot) -> Self {
        Self {
            seen: snapshot.seen_keys.into_iter().collect(),
        }
    }
}
