//! Append-only cache writer.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tapeloop_core::{CacheSink, ContentKey, Error, Result};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::types::{WriteProgress, WriteState};

pub(crate) type WriterSet = Arc<Mutex<HashSet<ContentKey>>>;

/// Exclusive right to write one key; released on drop.
pub(crate) struct WriterClaim {
    key: ContentKey,
    writers: WriterSet,
}

impl WriterClaim {
    pub(crate) fn acquire(writers: &WriterSet, key: &ContentKey) -> Result<Self> {
        let mut active = writers
            .lock()
            .map_err(|_| Error::Internal("writer registry poisoned".to_string()))?;
        if !active.insert(key.clone()) {
            return Err(Error::AlreadyWriting(key.to_string()));
        }
        Ok(Self {
            key: key.clone(),
            writers: writers.clone(),
        })
    }
}

impl Drop for WriterClaim {
    fn drop(&mut self) {
        if let Ok(mut active) = self.writers.lock() {
            active.remove(&self.key);
        }
    }
}

/// Writes one cache entry under its `.part` name and renames it into place
/// on commit. Dropping an uncommitted writer discards the partial file.
pub struct CacheWriter {
    key: ContentKey,
    file: Option<File>,
    partial_path: PathBuf,
    blob_path: PathBuf,
    written: u64,
    progress: watch::Sender<WriteProgress>,
    finished: bool,
    _claim: WriterClaim,
}

impl CacheWriter {
    pub(crate) fn new(
        key: ContentKey,
        file: File,
        partial_path: PathBuf,
        blob_path: PathBuf,
        claim: WriterClaim,
    ) -> Self {
        let (progress, _) = watch::channel(WriteProgress::started());
        Self {
            key,
            file: Some(file),
            partial_path,
            blob_path,
            written: 0,
            progress,
            finished: false,
            _claim: claim,
        }
    }

    pub fn key(&self) -> &ContentKey {
        &self.key
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Watch this writer's progress; used by readers tailing the entry.
    pub fn subscribe(&self) -> watch::Receiver<WriteProgress> {
        self.progress.subscribe()
    }

    fn publish(&self, state: WriteState) {
        let written = self.written;
        self.progress.send_modify(|p| {
            p.written = written;
            p.state = state;
        });
    }

    async fn finalize(&mut self, file: File) -> Result<()> {
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&self.partial_path, &self.blob_path).await?;
        Ok(())
    }
}

#[async_trait]
impl CacheSink for CacheWriter {
    async fn append(&mut self, chunk: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::CacheAborted("writer already closed".to_string()))?;
        file.write_all(chunk).await?;
        // Readers tail the file, so bytes must be visible before progress says so.
        file.flush().await?;
        self.written += chunk.len() as u64;
        self.publish(WriteState::Writing);
        Ok(())
    }

    async fn commit(&mut self) -> Result<u64> {
        let file = self
            .file
            .take()
            .ok_or_else(|| Error::CacheAborted("writer already closed".to_string()))?;

        if let Err(e) = self.finalize(file).await {
            warn!(key = %self.key, error = %e, "Failed to commit cache entry");
            self.discard().await;
            return Err(e);
        }

        self.finished = true;
        self.publish(WriteState::Committed);
        debug!(key = %self.key, bytes = self.written, "Committed cache entry");
        Ok(self.written)
    }

    async fn discard(&mut self) {
        if self.finished {
            return;
        }
        self.file.take();
        if let Err(e) = tokio::fs::remove_file(&self.partial_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(key = %self.key, error = %e, "Failed to remove partial cache entry");
            }
        }
        self.finished = true;
        self.publish(WriteState::Discarded);
        debug!(key = %self.key, bytes = self.written, "Discarded partial cache entry");
    }
}

impl Drop for CacheWriter {
    fn drop(&mut self) {
        if !self.finished {
            self.file.take();
            let _ = std::fs::remove_file(&self.partial_path);
            self.publish(WriteState::Discarded);
        }
    }
}
