//! Harvest engine: HTTP fetching with retries, state files, record sources,
//! uploaders, and the runner that executes core effects.
mod decode;
mod extract;
mod fetch;
mod pace;
mod persist;
mod pipeline;
mod source;
mod state;
mod types;
mod upload;

pub use decode::{decode_document, DecodeError, DecodedDocument};
pub use extract::{parse_search_response, plain_text, ExtractError, SruRecord, SruResponse};
pub use fetch::{FetchSettings, RetryPolicy, RetryingFetcher, DEFAULT_USER_AGENT};
pub use pace::Pacer;
pub use persist::{ensure_dir, AtomicFileWriter, PersistError};
pub use pipeline::{
    status, AbortCause, HarvestPipeline, PipelineError, StatusReport, DEFAULT_POLITENESS,
};
pub use source::{RecordSource, SourceError, SruRecordSource, SruSettings, SRU_VERSION};
pub use state::{
    LocalState, StateError, StateStore, BUILDER_FILE, CURSOR_FILE, DEDUP_FILE, STATE_FILES,
    UPLOAD_FILE,
};
pub use types::{ErrorClass, FailureKind, FetchError, FetchMetadata, FetchOutput};
pub use upload::{
    DirectoryUploader, HubSettings, HubUploader, UploadError, Uploader, DEFAULT_HUB_ENDPOINT,
    DEFAULT_PATH_PREFIX, DEFAULT_REVISION,
};
