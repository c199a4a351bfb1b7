use std::time::Duration;

use async_trait::async_trait;
use harvest_core::{PageEntry, Record, SourceLabel, SourcePage};
use harvest_logging::{harvest_debug, harvest_info, harvest_warn};
use tokio::sync::Mutex;
use url::Url;

use crate::decode::decode_document;
use crate::extract::{parse_search_response, plain_text, SruRecord, SruResponse};
use crate::pace::Pacer;
use crate::{FetchError, RetryingFetcher};

pub const SRU_VERSION: &str = "2.0";

/// Paginated upstream listing, addressed by 1-based position.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Up to `page_size` entries starting at `position`. An empty page means
    /// the listing is exhausted.
    async fn list(&self, position: u64, page_size: u32) -> Result<SourcePage, SourceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("listing request failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("malformed listing response: {0}")]
    Malformed(String),
    #[error("invalid endpoint {endpoint}: {message}")]
    InvalidEndpoint { endpoint: String, message: String },
}

#[derive(Debug, Clone)]
pub struct SruSettings {
    pub endpoint: String,
    /// CQL query, e.g. `c.product-area==lokalebekendmakingen`.
    pub query: String,
    pub record_schema: Option<String>,
    pub source: SourceLabel,
    /// Download each record's document and use its text as content.
    pub fetch_documents: bool,
    /// Pause between document downloads within one page.
    pub document_interval: Duration,
}

impl SruSettings {
    pub fn new(endpoint: impl Into<String>, query: impl Into<String>, source: SourceLabel) -> Self {
        Self {
            endpoint: endpoint.into(),
            query: query.into(),
            record_schema: None,
            source,
            fetch_documents: false,
            document_interval: Duration::from_millis(500),
        }
    }
}

/// SRU 2.0 `searchRetrieve` listing.
#[derive(Debug)]
pub struct SruRecordSource {
    settings: SruSettings,
    endpoint: Url,
    fetcher: RetryingFetcher,
    documents: Mutex<Pacer>,
}

impl SruRecordSource {
    pub fn new(settings: SruSettings, fetcher: RetryingFetcher) -> Result<Self, SourceError> {
        let endpoint =
            Url::parse(&settings.endpoint).map_err(|err| SourceError::InvalidEndpoint {
                endpoint: settings.endpoint.clone(),
                message: err.to_string(),
            })?;
        let documents = Mutex::new(Pacer::new(settings.document_interval));
        Ok(Self {
            settings,
            endpoint,
            fetcher,
            documents,
        })
    }

    pub fn settings(&self) -> &SruSettings {
        &self.settings
    }

    pub fn search_url(&self, position: u64, page_size: u32) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("version", SRU_VERSION)
                .append_pair("operation", "searchRetrieve")
                .append_pair("query", &self.settings.query)
                .append_pair("startRecord", &position.to_string())
                .append_pair("maximumRecords", &page_size.to_string());
            if let Some(schema) = &self.settings.record_schema {
                pairs.append_pair("recordSchema", schema);
            }
        }
        url
    }

    async fn entry(&self, record: SruRecord) -> PageEntry {
        let Some(key) = record.key() else {
            return dropped("record has neither identifier nor url");
        };
        let url = record.best_url().unwrap_or(key);

        let content = if self.settings.fetch_documents {
            let Some(document_url) = record.document_url() else {
                return dropped(format!("{key}: no document url"));
            };
            match self.fetch_document(document_url).await {
                Ok(text) => text,
                Err(err) => {
                    harvest_warn!("Dropping {key}: document {document_url} failed: {err}");
                    return dropped(format!("{key}: {err}"));
                }
            }
        } else {
            record.text.clone()
        };

        match Record::new(key, url, content, self.settings.source) {
            Ok(record) => PageEntry::Record(record),
            Err(err) => dropped(err.to_string()),
        }
    }

    async fn fetch_document(&self, url: &str) -> Result<String, SourceError> {
        self.documents.lock().await.wait().await;
        let output = self.fetcher.get(url).await?;
        let decoded = decode_document(&output.bytes, output.metadata.content_type.as_deref())
            .map_err(|err| SourceError::Malformed(err.to_string()))?;
        Ok(plain_text(&decoded.text))
    }
}

#[async_trait]
impl RecordSource for SruRecordSource {
    async fn list(&self, position: u64, page_size: u32) -> Result<SourcePage, SourceError> {
        let url = self.search_url(position, page_size);
        let output = self.fetcher.get(url.as_str()).await?;
        let decoded = decode_document(&output.bytes, output.metadata.content_type.as_deref())
            .map_err(|err| SourceError::Malformed(err.to_string()))?;
        let response = parse_search_response(&decoded.text)
            .map_err(|err| SourceError::Malformed(err.to_string()))?;

        let has_more = has_more(&response, position);
        harvest_info!(
            "Listed {} records at position {position} (total {:?}, more: {has_more})",
            response.records.len(),
            response.number_of_records
        );

        let mut entries = Vec::with_capacity(response.records.len());
        for record in response.records {
            entries.push(self.entry(record).await);
        }
        Ok(SourcePage::new(entries, has_more))
    }
}

fn has_more(response: &SruResponse, position: u64) -> bool {
    let count = response.records.len() as u64;
    if count == 0 {
        return false;
    }
    if let Some(next) = response.next_record_position {
        return next > position;
    }
    match response.number_of_records {
        Some(total) => position - 1 + count < total,
        None => true,
    }
}

fn dropped(reason: impl Into<String>) -> PageEntry {
    let reason = reason.into();
    harvest_debug!("Dropped entry: {reason}");
    PageEntry::Dropped { reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(records: usize, total: Option<u64>, next: Option<u64>) -> SruResponse {
        SruResponse {
            records: vec![SruRecord::default(); records],
            number_of_records: total,
            next_record_position: next,
        }
    }

    #[test]
    fn next_record_position_decides_first() {
        assert!(has_more(&response(2, Some(2), Some(3)), 1));
        assert!(!has_more(&response(2, Some(100), Some(0)), 1));
    }

    #[test]
    fn total_count_is_the_fallback() {
        assert!(has_more(&response(10, Some(25), None), 11));
        assert!(!has_more(&response(5, Some(25), None), 21));
        assert!(has_more(&response(5, None, None), 21));
        assert!(!has_more(&response(0, Some(25), None), 26));
    }
}
