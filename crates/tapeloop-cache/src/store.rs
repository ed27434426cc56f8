//! Flat keyed blob store on the local filesystem.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tapeloop_core::{ByteStream, ContentKey, Error, Result};
use tokio::fs::OpenOptions;
use tokio::sync::watch;
use tracing::debug;

use crate::reader;
use crate::types::WriteProgress;
use crate::writer::{CacheWriter, WriterClaim, WriterSet};

/// Blobs smaller than this are treated as leftovers of a failed fetch.
pub const DEFAULT_MIN_COMPLETE_BYTES: u64 = 256;

const PARTIAL_SUFFIX: &str = ".part";

/// Maps content keys to blobs under `root_dir`.
///
/// At most one [`CacheWriter`] exists per key at a time. The backing
/// directory is created lazily on the first write.
#[derive(Clone)]
pub struct CacheStore {
    root_dir: PathBuf,
    min_complete_bytes: u64,
    writers: WriterSet,
}

impl CacheStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            min_complete_bytes: DEFAULT_MIN_COMPLETE_BYTES,
            writers: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_min_complete_bytes(mut self, bytes: u64) -> Self {
        self.min_complete_bytes = bytes;
        self
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn min_complete_bytes(&self) -> u64 {
        self.min_complete_bytes
    }

    fn blob_path(&self, key: &ContentKey) -> PathBuf {
        self.root_dir.join(key.as_str())
    }

    fn partial_path(&self, key: &ContentKey) -> PathBuf {
        self.root_dir.join(format!("{}{}", key.as_str(), PARTIAL_SUFFIX))
    }

    /// Whether a complete, servable blob exists for `key`.
    pub async fn exists(&self, key: &ContentKey) -> bool {
        self.size(key).await.is_ok()
    }

    /// Size of the complete blob for `key`.
    pub async fn size(&self, key: &ContentKey) -> Result<u64> {
        match tokio::fs::metadata(self.blob_path(key)).await {
            Ok(meta) if meta.is_file() && meta.len() >= self.min_complete_bytes => Ok(meta.len()),
            Ok(_) => Err(Error::NotFound(key.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a writer currently holds `key`.
    pub fn is_writing(&self, key: &ContentKey) -> bool {
        self.writers
            .lock()
            .map(|active| active.contains(key))
            .unwrap_or(false)
    }

    /// Read bytes `start..=end` of a complete blob; `end` defaults to the
    /// last byte and is clamped to it.
    pub async fn open_for_read(
        &self,
        key: &ContentKey,
        start: u64,
        end: Option<u64>,
    ) -> Result<ByteStream> {
        let size = self.size(key).await?;
        if start >= size {
            return Err(Error::RangeUnsatisfiable { length: Some(size) });
        }
        let end = end.map_or(size - 1, |end| end.min(size - 1));
        if end < start {
            return Err(Error::RangeUnsatisfiable { length: Some(size) });
        }

        debug!(key = %key.short(), start, end, size, "Opening cache entry for read");
        Ok(Box::pin(reader::read_range(
            self.blob_path(key),
            start,
            end - start + 1,
        )))
    }

    /// Start writing `key`. Fails with `AlreadyWriting` if another writer
    /// holds it. Any stale partial file is truncated.
    pub async fn open_for_write(&self, key: &ContentKey) -> Result<CacheWriter> {
        let claim = WriterClaim::acquire(&self.writers, key)?;

        tokio::fs::create_dir_all(&self.root_dir).await?;
        let partial_path = self.partial_path(key);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&partial_path)
            .await?;

        debug!(key = %key.short(), path = %partial_path.display(), "Opened cache entry for write");
        Ok(CacheWriter::new(
            key.clone(),
            file,
            partial_path,
            self.blob_path(key),
            claim,
        ))
    }

    /// Tail an entry that is still being written, starting at `start` and
    /// stopping after `end` (inclusive) or when the writer commits.
    pub fn follow(
        &self,
        key: &ContentKey,
        start: u64,
        end: Option<u64>,
        progress: watch::Receiver<WriteProgress>,
    ) -> ByteStream {
        Box::pin(reader::follow_growing(
            self.partial_path(key),
            self.blob_path(key),
            start,
            end,
            progress,
        ))
    }
}
