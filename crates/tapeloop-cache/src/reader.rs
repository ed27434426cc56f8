//! Byte streams over cached blobs.

use async_stream::try_stream;
use bytes::{Bytes, BytesMut};
use futures::Stream;
use std::io::{ErrorKind, SeekFrom};
use std::path::PathBuf;
use tapeloop_core::{Error, Result};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;

use crate::types::{WriteProgress, WriteState};

/// Largest chunk yielded by cache readers.
pub const READ_CHUNK_BYTES: usize = 64 * 1024;

async fn read_chunk(file: &mut File, want: u64) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(want as usize);
    let n = file.take(want).read_buf(&mut buf).await?;
    if n == 0 {
        return Err(Error::StreamAborted("cache blob ended early".to_string()));
    }
    Ok(buf.freeze())
}

/// Stream `len` bytes of a complete blob starting at `start`.
pub fn read_range(path: PathBuf, start: u64, len: u64) -> impl Stream<Item = Result<Bytes>> + Send {
    try_stream! {
        let mut file = File::open(&path).await?;
        file.seek(SeekFrom::Start(start)).await?;

        let mut remaining = len;
        while remaining > 0 {
            let chunk = read_chunk(&mut file, remaining.min(READ_CHUNK_BYTES as u64)).await?;
            remaining -= chunk.len() as u64;
            yield chunk;
        }
    }
}

/// Stream a blob that is still being written, following the writer's
/// progress until it commits. `end` is inclusive.
///
/// Fails with `CacheAborted` if the writer discards the entry before the
/// requested bytes were produced.
pub fn follow_growing(
    partial_path: PathBuf,
    blob_path: PathBuf,
    start: u64,
    end: Option<u64>,
    mut progress: watch::Receiver<WriteProgress>,
) -> impl Stream<Item = Result<Bytes>> + Send {
    try_stream! {
        // The writer may have committed (renamed) before we got here.
        let opened = match File::open(&partial_path).await {
            Err(e) if e.kind() == ErrorKind::NotFound => File::open(&blob_path).await,
            other => other,
        };
        let mut file = match opened {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound
                && progress.borrow().state == WriteState::Discarded =>
            {
                Err::<File, Error>(Error::CacheAborted(
                    "live session ended before completion".to_string(),
                ))?
            }
            Err(e) => Err::<File, Error>(e.into())?,
        };
        file.seek(SeekFrom::Start(start)).await?;

        let limit = end.map(|e| e + 1);
        let mut position = start;
        loop {
            if limit.is_some_and(|limit| position >= limit) {
                break;
            }

            let snapshot = *progress.borrow_and_update();
            if position < snapshot.written {
                let mut want = (snapshot.written - position).min(READ_CHUNK_BYTES as u64);
                if let Some(limit) = limit {
                    want = want.min(limit - position);
                }
                let chunk = read_chunk(&mut file, want).await?;
                position += chunk.len() as u64;
                yield chunk;
                continue;
            }

            match snapshot.state {
                WriteState::Committed => break,
                WriteState::Discarded => {
                    Err::<(), Error>(Error::CacheAborted(
                        "live session ended before completion".to_string(),
                    ))?;
                }
                WriteState::Writing => {
                    if progress.changed().await.is_err() && !progress.borrow().state.is_terminal() {
                        Err::<(), Error>(Error::CacheAborted("cache writer went away".to_string()))?;
                    }
                }
            }
        }
    }
}
