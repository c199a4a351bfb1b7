use crate::Record;

/// One upstream position in a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEntry {
    Record(Record),
    /// The position exists upstream but no usable record could be extracted.
    Dropped { reason: String },
}

/// One page returned by a record source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourcePage {
    pub entries: Vec<PageEntry>,
    pub has_more: bool,
}

impl SourcePage {
    pub fn new(entries: Vec<PageEntry>, has_more: bool) -> Self {
        Self { entries, has_more }
    }

    /// An empty page: the listing is exhausted.
    pub fn exhausted() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Vec<Record>> for SourcePage {
    fn from(records: Vec<Record>) -> Self {
        let has_more = !records.is_empty();
        Self {
            entries: records.into_iter().map(PageEntry::Record).collect(),
            has_more,
        }
    }
}
