use std::fs;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use harvest_logging::{harvest_debug, harvest_info};
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;

use crate::persist::{AtomicFileWriter, PersistError};
use crate::{FailureKind, FetchError, RetryingFetcher};

pub const DEFAULT_HUB_ENDPOINT: &str = "https://huggingface.co";
pub const DEFAULT_REVISION: &str = "main";
pub const DEFAULT_PATH_PREFIX: &str = "data";

/// Remote shard store. Writing an existing name overwrites it.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn put(&self, payload: Bytes, destination: &str) -> Result<(), UploadError>;

    /// Names of every stored object, possibly with a directory prefix.
    async fn list(&self) -> Result<Vec<String>, UploadError>;
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("upload request failed: {0}")]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("remote store rejected the request: {0}")]
    Rejected(String),
}

/// Stores shards as files in a local directory.
#[derive(Debug, Clone)]
pub struct DirectoryUploader {
    writer: AtomicFileWriter,
}

impl DirectoryUploader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            writer: AtomicFileWriter::new(dir),
        }
    }
}

#[async_trait]
impl Uploader for DirectoryUploader {
    async fn put(&self, payload: Bytes, destination: &str) -> Result<(), UploadError> {
        let path = self.writer.write(destination, &payload)?;
        harvest_debug!("Wrote {} bytes to {}", payload.len(), path.display());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, UploadError> {
        let dir = self.writer.dir();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(UploadError::Io {
                    path: dir.to_path_buf(),
                    source,
                })
            }
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| UploadError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            if entry.file_type().is_ok_and(|kind| kind.is_file()) {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[derive(Debug, Clone)]
pub struct HubSettings {
    pub endpoint: String,
    /// `owner/name` of the dataset repository.
    pub repo_id: String,
    pub token: String,
    pub revision: String,
    /// Directory inside the repository holding the shards.
    pub path_prefix: String,
}

impl HubSettings {
    pub fn new(repo_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_HUB_ENDPOINT.to_string(),
            repo_id: repo_id.into(),
            token: token.into(),
            revision: DEFAULT_REVISION.to_string(),
            path_prefix: DEFAULT_PATH_PREFIX.to_string(),
        }
    }
}

/// Dataset hub repository: one commit per shard, listing through the
/// repository tree API.
#[derive(Debug, Clone)]
pub struct HubUploader {
    settings: HubSettings,
    fetcher: RetryingFetcher,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
}

impl HubUploader {
    pub fn new(settings: HubSettings, fetcher: RetryingFetcher) -> Self {
        Self { settings, fetcher }
    }

    pub fn remote_path(&self, destination: &str) -> String {
        let prefix = self.settings.path_prefix.trim_matches('/');
        if prefix.is_empty() {
            destination.to_string()
        } else {
            format!("{prefix}/{destination}")
        }
    }

    fn api_url(&self, tail: &str) -> Result<Url, FetchError> {
        let raw = format!(
            "{}/api/datasets/{}/{tail}",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.repo_id
        );
        Url::parse(&raw)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, format!("{raw}: {err}")))
    }

    /// NDJSON commit body: a header line, then the file as base64.
    fn commit_body(&self, payload: &[u8], path: &str) -> String {
        let header = json!({
            "key": "header",
            "value": { "summary": format!("Add {path}"), "description": "" },
        });
        let file = json!({
            "key": "file",
            "value": { "content": BASE64.encode(payload), "path": path, "encoding": "base64" },
        });
        format!("{header}\n{file}\n")
    }
}

#[async_trait]
impl Uploader for HubUploader {
    async fn put(&self, payload: Bytes, destination: &str) -> Result<(), UploadError> {
        let path = self.remote_path(destination);
        let url = self.api_url(&format!("commit/{}", self.settings.revision))?;
        let body = self.commit_body(&payload, &path);
        let request = self
            .fetcher
            .client()
            .post(url)
            .bearer_auth(&self.settings.token)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .build()
            .map_err(|err| FetchError::new(FailureKind::InvalidRequest, err.to_string()))?;

        let output = self.fetcher.fetch(request).await?;
        harvest_info!(
            "Committed {path} ({} bytes) to {} after {} attempt(s)",
            payload.len(),
            self.settings.repo_id,
            output.metadata.attempts
        );
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, UploadError> {
        let prefix = self.settings.path_prefix.trim_matches('/');
        let mut next = Some(self.api_url(&format!("tree/{}/{prefix}", self.settings.revision))?);
        let mut names = Vec::new();

        while let Some(url) = next.take() {
            let request = self
                .fetcher
                .client()
                .get(url)
                .bearer_auth(&self.settings.token)
                .build()
                .map_err(|err| FetchError::new(FailureKind::InvalidRequest, err.to_string()))?;
            let output = match self.fetcher.fetch(request).await {
                Ok(output) => output,
                // Repository or directory without any file yet.
                Err(err) if err.kind == FailureKind::HttpStatus(404) => break,
                Err(err) => return Err(err.into()),
            };
            let entries: Vec<TreeEntry> = serde_json::from_slice(&output.bytes)
                .map_err(|err| UploadError::Rejected(format!("unexpected tree listing: {err}")))?;
            names.extend(
                entries
                    .into_iter()
                    .filter(|entry| entry.kind == "file")
                    .map(|entry| entry.path),
            );
            next = output
                .metadata
                .link
                .as_deref()
                .and_then(next_link)
                .and_then(|link| Url::parse(&link).ok());
        }
        Ok(names)
    }
}

/// Target of the `rel="next"` entry of a `Link` header.
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|param| param.trim().replace(' ', "") == "rel=\"next\"");
        is_next.then(|| {
            target
                .trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string()
        })
    })
}
