//! Bounded single-producer, single-consumer byte buffers, one per sink.
//!
//! Capacity is counted in bytes. A chunk is accepted when it fits, or when
//! the buffer is empty (so a chunk larger than the capacity still moves).

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tapeloop_core::{ByteStream, Error};
use tokio::sync::Notify;

/// How a buffer's producer ended the stream.
#[derive(Debug, Clone)]
pub enum StreamEnd {
    Completed,
    Failed(Arc<Error>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// No room for the chunk right now.
    Full,
    /// The reader is gone or the stream was already finished.
    Closed,
}

struct State {
    chunks: VecDeque<Bytes>,
    buffered: usize,
    end: Option<StreamEnd>,
    reader_gone: bool,
}

struct Shared {
    capacity: usize,
    state: Mutex<State>,
    /// Signalled when data or the end marker arrives.
    data: Notify,
    /// Signalled when room frees up or the reader goes away.
    space: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create a buffer holding at most `capacity` bytes.
pub fn sink_buffer(capacity: usize) -> (SinkWriter, SinkReader) {
    let shared = Arc::new(Shared {
        capacity,
        state: Mutex::new(State {
            chunks: VecDeque::new(),
            buffered: 0,
            end: None,
            reader_gone: false,
        }),
        data: Notify::new(),
        space: Notify::new(),
    });
    (
        SinkWriter {
            shared: shared.clone(),
        },
        SinkReader {
            shared,
            done: false,
        },
    )
}

/// Producer half.
pub struct SinkWriter {
    shared: Arc<Shared>,
}

impl SinkWriter {
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn buffered(&self) -> usize {
        self.shared.lock().buffered
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().reader_gone
    }

    /// Enqueue without waiting.
    pub fn try_push(&self, chunk: Bytes) -> Result<(), PushError> {
        let mut state = self.shared.lock();
        if state.reader_gone || state.end.is_some() {
            return Err(PushError::Closed);
        }
        if state.buffered > 0 && state.buffered + chunk.len() > self.shared.capacity {
            return Err(PushError::Full);
        }
        state.buffered += chunk.len();
        state.chunks.push_back(chunk);
        drop(state);
        self.shared.data.notify_one();
        Ok(())
    }

    /// Enqueue, waiting for room. Returns `Closed` as soon as the reader
    /// goes away.
    pub async fn push(&self, chunk: Bytes) -> Result<(), PushError> {
        loop {
            match self.try_push(chunk.clone()) {
                Err(PushError::Full) => self.shared.space.notified().await,
                other => return other,
            }
        }
    }

    /// Resolves once the reader has been dropped.
    pub async fn closed(&self) {
        while !self.is_closed() {
            self.shared.space.notified().await;
        }
    }

    /// Mark the end of the stream. Only the first call has an effect.
    pub fn finish(&self, end: StreamEnd) {
        let mut state = self.shared.lock();
        if state.end.is_none() {
            state.end = Some(end);
        }
        drop(state);
        self.shared.data.notify_one();
    }

    /// End the stream with `error`, dropping anything still queued so the
    /// reader sees the failure next.
    pub fn abort(&self, error: Arc<Error>) {
        let mut state = self.shared.lock();
        if state.end.is_none() {
            state.chunks.clear();
            state.buffered = 0;
            state.end = Some(StreamEnd::Failed(error));
        }
        drop(state);
        self.shared.data.notify_one();
        self.shared.space.notify_one();
    }
}

impl Drop for SinkWriter {
    fn drop(&mut self) {
        self.finish(StreamEnd::Failed(Arc::new(Error::StreamAborted(
            "producer went away".to_string(),
        ))));
    }
}

/// Consumer half. Dropping it closes the buffer for the producer.
pub struct SinkReader {
    shared: Arc<Shared>,
    done: bool,
}

impl SinkReader {
    /// Next chunk in order. After a failure end, yields the error once;
    /// after a completed end, yields `None`.
    pub async fn next(&mut self) -> Option<Result<Bytes, Arc<Error>>> {
        if self.done {
            return None;
        }
        loop {
            {
                let mut state = self.shared.lock();
                if let Some(chunk) = state.chunks.pop_front() {
                    state.buffered -= chunk.len();
                    drop(state);
                    self.shared.space.notify_one();
                    return Some(Ok(chunk));
                }
                if let Some(end) = &state.end {
                    self.done = true;
                    return match end {
                        StreamEnd::Completed => None,
                        StreamEnd::Failed(e) => Some(Err(e.clone())),
                    };
                }
            }
            self.shared.data.notified().await;
        }
    }

    /// Adapt into a [`ByteStream`] for an HTTP body.
    pub fn into_stream(self) -> ByteStream {
        Box::pin(futures::stream::unfold(self, |mut reader| async move {
            let item = reader.next().await?;
            Some((
                item.map_err(|e| Error::StreamAborted(e.to_string())),
                reader,
            ))
        }))
    }
}

impl Drop for SinkReader {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.reader_gone = true;
        state.chunks.clear();
        state.buffered = 0;
        drop(state);
        self.shared.space.notify_one();
    }
}
