use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Upstream collection a record was harvested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceLabel {
    #[serde(rename = "Officiële Publicaties")]
    OfficielePublicaties,
    #[serde(rename = "Lokale Bekendmakingen")]
    LokaleBekendmakingen,
}

impl SourceLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceLabel::OfficielePublicaties => "Officiële Publicaties",
            SourceLabel::LokaleBekendmakingen => "Lokale Bekendmakingen",
        }
    }
}

impl fmt::Display for SourceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("record key must not be empty")]
    EmptyKey,
    #[error("unknown source label {0:?}")]
    UnknownSource(String),
}

impl FromStr for SourceLabel {
    type Err = RecordError;

    /// Accepts the display label as well as the collection slug used in
    /// repository paths (`officielepublicaties`, `lokalebekendmakingen`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .map(|c| if c == 'ë' { 'e' } else { c })
            .collect();
        match folded.as_str() {
            "officielepublicaties" | "op" => Ok(SourceLabel::OfficielePublicaties),
            "lokalebekendmakingen" | "lb" => Ok(SourceLabel::LokaleBekendmakingen),
            _ => Err(RecordError::UnknownSource(s.to_string())),
        }
    }
}

/// One harvested unit. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    key: String,
    url: String,
    content: String,
    source: SourceLabel,
}

impl Record {
    pub fn new(
        key: impl Into<String>,
        url: impl Into<String>,
        content: impl Into<String>,
        source: SourceLabel,
    ) -> Result<Self, RecordError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(RecordError::EmptyKey);
        }
        Ok(Self {
            key,
            url: url.into(),
            content: content.into(),
            source,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn source(&self) -> SourceLabel {
        self.source
    }

    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }

    /// Serialize as one shard line: `{"url": .., "content": .., "source": ..}`.
    pub fn to_shard_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&ShardLine {
            url: &self.url,
            content: &self.content,
            source: self.source.as_str(),
        })
    }
}

#[derive(Serialize)]
struct ShardLine<'a> {
    url: &'a str,
    content: &'a str,
    source: &'a str,
}
