//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the streaming core and its
//! external adapters: the media fetcher process and the cache writer.

use crate::Result;
use crate::source::{SourceRequest, TrackInfo};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// Lazy, finite, non-restartable sequence of raw bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// External collaborator producing audio bytes and metadata for a source URL.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Start fetching encoded audio. Fails with `LaunchFailure` if the fetch
    /// cannot start; later failures surface as the stream's final item.
    async fn fetch_audio(&self, request: &SourceRequest) -> Result<ByteStream>;

    /// Fetch metadata: one entry per playlist item, or a single entry.
    async fn fetch_info(&self, url: &str) -> Result<Vec<TrackInfo>>;
}

/// Append-only writer for one cache entry.
///
/// After `commit` or `discard` returns, the sink accepts no further calls.
#[async_trait]
pub trait CacheSink: Send {
    /// Append bytes to the in-progress entry.
    async fn append(&mut self, chunk: &[u8]) -> Result<()>;

    /// Mark the entry complete. Returns its final length.
    async fn commit(&mut self) -> Result<u64>;

    /// Drop the partial entry so it is never served.
    async fn discard(&mut self);
}
