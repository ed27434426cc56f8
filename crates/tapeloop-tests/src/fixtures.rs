//! Test fixtures: a scripted media fetcher and sample data.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tapeloop_core::{ByteStream, Error, MediaFetcher, Result, SourceRequest, TrackInfo};

/// Deterministic, non-repeating-looking bytes standing in for audio.
pub fn audio_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + 7) % 256) as u8).collect()
}

/// How a [`ScriptedFetcher`] misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// `fetch_audio` itself fails.
    Launch,
    /// The stream fails after this many bytes.
    AfterBytes(usize),
    /// The stream ends without producing anything.
    Empty,
    /// The stream never produces anything.
    Stall,
}

/// In-memory [`MediaFetcher`] that replays a payload.
pub struct ScriptedFetcher {
    payload: Bytes,
    chunk_size: usize,
    delay: Duration,
    failure: Option<Failure>,
    tracks: Option<Vec<TrackInfo>>,
    audio_calls: AtomicUsize,
    info_calls: AtomicUsize,
    streams_dropped: Arc<AtomicUsize>,
}

impl ScriptedFetcher {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            chunk_size: 256,
            delay: Duration::ZERO,
            failure: None,
            tracks: None,
            audio_calls: AtomicUsize::new(0),
            info_calls: AtomicUsize::new(0),
            streams_dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Pause before each chunk.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, failure: Failure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Tracks returned by `fetch_info`; without them the lookup fails.
    pub fn with_tracks(mut self, tracks: Vec<TrackInfo>) -> Self {
        self.tracks = Some(tracks);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn audio_calls(&self) -> usize {
        self.audio_calls.load(Ordering::SeqCst)
    }

    pub fn info_calls(&self) -> usize {
        self.info_calls.load(Ordering::SeqCst)
    }

    /// Number of audio streams that have been dropped, finished or not.
    pub fn streams_dropped(&self) -> usize {
        self.streams_dropped.load(Ordering::SeqCst)
    }
}

struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaFetcher for ScriptedFetcher {
    async fn fetch_audio(&self, request: &SourceRequest) -> Result<ByteStream> {
        self.audio_calls.fetch_add(1, Ordering::SeqCst);
        if self.failure == Some(Failure::Launch) {
            return Err(Error::LaunchFailure(format!(
                "scripted launch failure for {request}"
            )));
        }

        let counter = DropCounter(self.streams_dropped.clone());
        let payload = self.payload.clone();
        let chunk_size = self.chunk_size;
        let delay = self.delay;
        let failure = self.failure;

        Ok(Box::pin(async_stream::stream! {
            let _counter = counter;
            if failure == Some(Failure::Stall) {
                futures::future::pending::<()>().await;
            }
            let limit = match failure {
                Some(Failure::Empty) => 0,
                Some(Failure::AfterBytes(n)) => n.min(payload.len()),
                _ => payload.len(),
            };
            let mut offset = 0;
            while offset < limit {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let end = (offset + chunk_size).min(limit);
                yield Ok(payload.slice(offset..end));
                offset = end;
            }
            if let Some(Failure::AfterBytes(_)) = failure {
                yield Err(Error::FetchFailed {
                    exit_code: 1,
                    message: "ERROR: scripted failure".to_string(),
                });
            }
        }))
    }

    async fn fetch_info(&self, url: &str) -> Result<Vec<TrackInfo>> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        self.tracks.clone().ok_or_else(|| Error::FetchFailed {
            exit_code: 1,
            message: format!("ERROR: Unsupported URL: {url}"),
        })
    }
}

/// Factory for track metadata.
pub struct TrackFixture;

impl TrackFixture {
    pub fn single(url: &str) -> TrackInfo {
        TrackInfo {
            title: "Test Track".to_string(),
            uploader: Some("Test Artist".to_string()),
            duration: Some(215.5),
            thumbnail: Some("https://img.example.com/t.jpg".to_string()),
            url: url.to_string(),
        }
    }

    pub fn playlist(base: &str, count: usize) -> Vec<TrackInfo> {
        (1..=count)
            .map(|i| TrackInfo {
                title: format!("Track {i}"),
                uploader: None,
                duration: None,
                thumbnail: None,
                url: format!("{base}/{i}"),
            })
            .collect()
    }
}
