use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use harvest_core::{
    BuilderSnapshot, Checkpoint, Cursor, CursorSnapshot, DedupLedger, DedupSnapshot, Restored,
    UploadSnapshot,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::persist::{AtomicFileWriter, PersistError};

pub const CURSOR_FILE: &str = "cursor.json";
pub const DEDUP_FILE: &str = "seen_keys.json";
pub const UPLOAD_FILE: &str = "upload_progress.json";
pub const BUILDER_FILE: &str = "shard_buffer.json";

/// Every file the store owns, in checkpoint write order.
pub const STATE_FILES: [&str; 4] = [BUILDER_FILE, UPLOAD_FILE, DEDUP_FILE, CURSOR_FILE];

#[derive(Debug, Error)]
pub enum StateError {
    /// The file exists but cannot be trusted. Never treated as a fresh start.
    #[error("state file {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },
    #[error("cannot access state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot encode state file {path}: {message}")]
    Encode { path: PathBuf, message: String },
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Everything found in the state directory at startup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalState {
    pub cursor: Cursor,
    pub dedup: DedupLedger,
    pub builder: Option<BuilderSnapshot>,
    pub uploads: UploadSnapshot,
}

impl LocalState {
    pub fn into_restored(self, remote_listing: Vec<String>) -> Restored {
        Restored {
            cursor: self.cursor,
            dedup: self.dedup,
            builder: self.builder,
            local_uploads: self.uploads,
            remote_listing,
        }
    }
}

/// JSON state files in one directory, each written atomically.
/// A missing file means "nothing recorded yet".
#[derive(Debug, Clone)]
pub struct StateStore {
    writer: AtomicFileWriter,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            writer: AtomicFileWriter::new(dir),
        }
    }

    pub fn dir(&self) -> &Path {
        self.writer.dir()
    }

    pub fn load(&self) -> Result<LocalState, StateError> {
        Ok(LocalState {
            cursor: self.load_cursor()?,
            dedup: self.load_dedup()?,
            builder: self.load_builder()?,
            uploads: self.load_uploads()?,
        })
    }

    pub fn load_cursor(&self) -> Result<Cursor, StateError> {
        match self.read::<CursorSnapshot>(CURSOR_FILE)? {
            Some(snapshot) => Cursor::restore(snapshot).map_err(|err| StateError::Corrupt {
                path: self.path(CURSOR_FILE),
                message: err.to_string(),
            }),
            None => Ok(Cursor::new()),
        }
    }

    pub fn load_dedup(&self) -> Result<DedupLedger, StateError> {
        Ok(self
            .read::<DedupSnapshot>(DEDUP_FILE)?
            .map(DedupLedger::restore)
            .unwrap_or_default())
    }

    pub fn load_uploads(&self) -> Result<UploadSnapshot, StateError> {
        Ok(self.read::<UploadSnapshot>(UPLOAD_FILE)?.unwrap_or_default())
    }

    pub fn load_builder(&self) -> Result<Option<BuilderSnapshot>, StateError> {
        let snapshot = self.read::<BuilderSnapshot>(BUILDER_FILE)?;
        if let Some(snapshot) = &snapshot {
            if snapshot.position < harvest_core::FIRST_POSITION {
                return Err(StateError::Corrupt {
                    path: self.path(BUILDER_FILE),
                    message: format!("position {} is below 1", snapshot.position),
                });
            }
        }
        Ok(snapshot)
    }

    pub fn persist_cursor(&self, snapshot: &CursorSnapshot) -> Result<(), StateError> {
        self.write(CURSOR_FILE, snapshot)
    }

    pub fn persist_dedup(&self, snapshot: &DedupSnapshot) -> Result<(), StateError> {
        self.write(DEDUP_FILE, snapshot)
    }

    pub fn persist_delivered(&self, snapshot: &UploadSnapshot) -> Result<(), StateError> {
        self.write(UPLOAD_FILE, snapshot)
    }

    pub fn persist_builder(&self, snapshot: &BuilderSnapshot) -> Result<(), StateError> {
        self.write(BUILDER_FILE, snapshot)
    }

    /// Builder first, then the upload and dedup ledgers, then the cursor.
    pub fn persist_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StateError> {
        self.persist_builder(&checkpoint.builder)?;
        self.persist_delivered(&checkpoint.uploads)?;
        self.persist_dedup(&checkpoint.dedup)?;
        self.persist_cursor(&checkpoint.cursor)
    }

    /// Deletes the state files and returns the ones that existed.
    pub fn reset(&self) -> Result<Vec<PathBuf>, StateError> {
        let mut removed = Vec::new();
        for name in STATE_FILES {
            let path = self.path(name);
            match fs::remove_file(&path) {
                Ok(()) => removed.push(path),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(StateError::Io { path, source }),
            }
        }
        Ok(removed)
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir().join(name)
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StateError> {
        let path = self.path(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StateError::Io { path, source }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| StateError::Corrupt {
                path,
                message: err.to_string(),
            })
    }

    fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StateError> {
        let json = serde_json::to_vec_pretty(value).map_err(|err| StateError::Encode {
            path: self.path(name),
            message: err.to_string(),
        })?;
        self.writer.write(name, &json)?;
        Ok(())
    }
}
