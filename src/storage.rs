//! Blob storage and the shared file catalog
//!
//! Uploaded files land in a flat directory under their sanitized base name;
//! the catalog keeps (name, size, owner) per blob and is replayed to every
//! new joiner. A re-upload of an existing name replaces the blob and its
//! catalog entry (last writer wins).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, TransferError};

/// Catalog entry for one uploaded blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub name: String,
    pub size: u64,
    pub owner: String,
}

/// Owner recorded for blobs already on disk when the server starts
pub const SERVER_OWNER: &str = "Server";

/// Blob directory plus the in-memory catalog
pub struct FileStore {
    dir: PathBuf,
    catalog: Mutex<HashMap<String, FileRecord>>,
}

impl FileStore {
    /// Open the store, creating the directory if needed and rebuilding the
    /// catalog from blobs already present (attributed to the server).
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let mut catalog = HashMap::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            catalog.insert(
                name.clone(),
                FileRecord {
                    name,
                    size: meta.len(),
                    owner: SERVER_OWNER.to_string(),
                },
            );
        }
        tracing::info!(dir = %dir.display(), blobs = catalog.len(), "file store opened");

        Ok(Self {
            dir,
            catalog: Mutex::new(catalog),
        })
    }

    /// Strip directory components from a client-supplied file name so an
    /// upload can never escape the blob directory.
    pub fn sanitize(name: &str) -> std::result::Result<String, TransferError> {
        let base = name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or("")
            .trim()
            .to_string();
        if base.is_empty() || base == "." || base == ".." {
            return Err(TransferError::EmptyName);
        }
        Ok(base)
    }

    /// Filesystem path for a sanitized blob name.
    pub fn blob_path(&self, sanitized: &str) -> PathBuf {
        self.dir.join(sanitized)
    }

    /// Record a completed upload, replacing any previous entry for the name.
    pub fn insert(&self, record: FileRecord) {
        self.catalog.lock().insert(record.name.clone(), record);
    }

    /// Look up one catalog entry.
    pub fn record(&self, name: &str) -> Option<FileRecord> {
        self.catalog.lock().get(name).cloned()
    }

    /// Snapshot of the catalog, ordered by name for a deterministic replay.
    pub fn list(&self) -> Vec<FileRecord> {
        let mut records: Vec<_> = self.catalog.lock().values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
