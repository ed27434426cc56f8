//! Tee pipeline: one upstream, two sinks.
//!
//! The primary sink (the live HTTP response) must keep up: when its buffer
//! is full the upstream is paused. The secondary sink (the cache writer) is
//! best effort: when its buffer is full it is aborted and its partial entry
//! discarded, and the primary carries on unaffected.
//!
//! Readers tailing the cache entry depend on the secondary sink. While any
//! are attached, a full secondary buffer pauses the upstream instead of
//! aborting the sink.

use crate::buffer::{PushError, SinkReader, SinkWriter, StreamEnd, sink_buffer};
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tapeloop_core::{ByteStream, CacheSink, Error, Result};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// What to do with the cache write once the live client is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonPolicy {
    /// Stop the fetch and discard the partial entry, unless followers are
    /// still attached.
    #[default]
    Stop,
    /// Keep fetching until the cache entry is complete.
    ContinueCaching,
}

#[derive(Debug, Clone)]
pub struct TeeConfig {
    pub primary_capacity: usize,
    pub secondary_capacity: usize,
    pub abandon: AbandonPolicy,
    /// How long to wait for the first upstream byte.
    pub stall_timeout: Duration,
}

impl Default for TeeConfig {
    fn default() -> Self {
        Self {
            primary_capacity: 256 * 1024,
            secondary_capacity: 4 * 1024 * 1024,
            abandon: AbandonPolicy::Stop,
            stall_timeout: Duration::from_secs(30),
        }
    }
}

impl TeeConfig {
    pub fn with_capacities(mut self, primary: usize, secondary: usize) -> Self {
        self.primary_capacity = primary;
        self.secondary_capacity = secondary;
        self
    }

    pub fn with_abandon_policy(mut self, abandon: AbandonPolicy) -> Self {
        self.abandon = abandon;
        self
    }

    pub fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkPolicy {
    /// Backpressure the upstream when full.
    MustKeepUp,
    /// Abort this sink when full.
    BestEffort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Disconnected,
    Overflow,
    WriteFailed,
    Upstream,
    Abandoned,
}

/// Per-sink state. Moves out of `Active` at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Active,
    Completed,
    Aborted(AbortReason),
}

impl SinkState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SinkState::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Completed,
    Aborted,
}

/// Summary of a finished pipeline run.
#[derive(Debug, Clone)]
pub struct TeeReport {
    pub bytes_in: u64,
    pub primary: SinkState,
    pub secondary: SinkState,
    pub status: SessionStatus,
    pub error: Option<String>,
    pub elapsed: Duration,
}

struct Lane {
    name: &'static str,
    writer: SinkWriter,
    policy: SinkPolicy,
    state: SinkState,
}

impl Lane {
    fn new(name: &'static str, writer: SinkWriter, policy: SinkPolicy) -> Self {
        Self {
            name,
            writer,
            policy,
            state: SinkState::Active,
        }
    }

    fn is_active(&self) -> bool {
        self.state == SinkState::Active
    }

    fn transition(&mut self, next: SinkState) {
        if self.is_active() && next.is_terminal() {
            self.state = next;
        }
    }

    /// `followed` makes a best-effort lane wait for room like a primary one.
    async fn deliver(&mut self, chunk: Bytes, followed: bool) {
        if !self.is_active() {
            return;
        }
        let pushed = match self.policy {
            SinkPolicy::MustKeepUp => self.writer.push(chunk).await,
            SinkPolicy::BestEffort if followed => self.writer.push(chunk).await,
            SinkPolicy::BestEffort => self.writer.try_push(chunk),
        };
        match pushed {
            Ok(()) => {}
            Err(PushError::Closed) => {
                debug!(sink = self.name, "Sink detached");
                let reason = match self.policy {
                    SinkPolicy::MustKeepUp => AbortReason::Disconnected,
                    SinkPolicy::BestEffort => AbortReason::WriteFailed,
                };
                self.transition(SinkState::Aborted(reason));
            }
            Err(PushError::Full) => {
                warn!(
                    sink = self.name,
                    buffered = self.writer.buffered(),
                    capacity = self.writer.capacity(),
                    "Sink fell behind upstream, aborting it"
                );
                self.abort(
                    Error::CacheAborted("sink fell behind upstream".to_string()),
                    AbortReason::Overflow,
                );
            }
        }
    }

    fn abort(&mut self, error: Error, reason: AbortReason) {
        if self.is_active() {
            self.writer.abort(Arc::new(error));
            self.transition(SinkState::Aborted(reason));
        }
    }

    fn finish(&mut self, end: &StreamEnd) {
        if self.is_active() {
            self.writer.finish(end.clone());
            self.transition(match end {
                StreamEnd::Completed => SinkState::Completed,
                StreamEnd::Failed(_) => SinkState::Aborted(AbortReason::Upstream),
            });
        }
    }
}

/// A single fetch fanned out to the live response and the cache.
pub struct TeePipeline {
    label: String,
    upstream: ByteStream,
    primary: SinkWriter,
    secondary: SinkWriter,
    secondary_reader: SinkReader,
    sink: Box<dyn CacheSink>,
    followers: watch::Receiver<usize>,
    status: watch::Sender<SessionStatus>,
    cache_state: watch::Sender<SinkState>,
    config: TeeConfig,
}

impl TeePipeline {
    /// Build a pipeline. The returned reader is the primary sink's output.
    pub fn new(
        label: impl Into<String>,
        upstream: ByteStream,
        sink: Box<dyn CacheSink>,
        config: TeeConfig,
    ) -> (Self, SinkReader) {
        let (primary, primary_reader) = sink_buffer(config.primary_capacity);
        let (secondary, secondary_reader) = sink_buffer(config.secondary_capacity);
        let (status, _) = watch::channel(SessionStatus::Active);
        let (cache_state, _) = watch::channel(SinkState::Active);
        let (_, followers) = watch::channel(0);

        let pipeline = Self {
            label: label.into(),
            upstream,
            primary,
            secondary,
            secondary_reader,
            sink,
            followers,
            status,
            cache_state,
            config,
        };
        (pipeline, primary_reader)
    }

    /// Count of readers tailing the cache entry. Consulted when the primary
    /// goes away under [`AbandonPolicy::Stop`].
    pub fn with_followers(mut self, followers: watch::Receiver<usize>) -> Self {
        self.followers = followers;
        self
    }

    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// State of the cache lane. Leaves `Active` as soon as the lane is
    /// aborted, before the partial entry has been discarded.
    pub fn cache_state(&self) -> watch::Receiver<SinkState> {
        self.cache_state.subscribe()
    }

    /// Pump the upstream until it ends or no sink is left.
    pub async fn run(self) -> TeeReport {
        let TeePipeline {
            label,
            mut upstream,
            primary,
            secondary,
            secondary_reader,
            sink,
            mut followers,
            status,
            cache_state,
            config,
        } = self;

        let started = Instant::now();
        let drain = tokio::spawn(drain_secondary(secondary_reader, sink));
        let mut primary = Lane::new("primary", primary, SinkPolicy::MustKeepUp);
        let mut secondary = Lane::new("secondary", secondary, SinkPolicy::BestEffort);
        let mut followers_live = true;
        let mut bytes_in: u64 = 0;

        let end = loop {
            if !primary.is_active() {
                if !secondary.is_active() {
                    break None;
                }
                if config.abandon == AbandonPolicy::Stop && *followers.borrow() == 0 {
                    info!(session = %label, bytes_in, "No listeners left, stopping fetch");
                    secondary.abort(Error::ClientDisconnected, AbortReason::Abandoned);
                    publish(&cache_state, secondary.state);
                    break None;
                }
            }

            let item = tokio::select! {
                biased;
                _ = primary.writer.closed(), if primary.is_active() => {
                    debug!(session = %label, bytes_in, "Live client disconnected");
                    primary.transition(SinkState::Aborted(AbortReason::Disconnected));
                    continue;
                }
                changed = followers.changed(), if followers_live && !primary.is_active() => {
                    if changed.is_err() {
                        followers_live = false;
                    }
                    continue;
                }
                item = next_chunk(&mut upstream, bytes_in, config.stall_timeout) => item,
            };

            match item {
                Some(Ok(chunk)) if chunk.is_empty() => {}
                Some(Ok(chunk)) => {
                    bytes_in += chunk.len() as u64;
                    let followed = *followers.borrow() > 0;
                    secondary.deliver(chunk.clone(), followed).await;
                    publish(&cache_state, secondary.state);
                    primary.deliver(chunk, false).await;
                }
                Some(Err(e)) => {
                    warn!(session = %label, bytes_in, error = %e, "Upstream failed");
                    break Some(StreamEnd::Failed(Arc::new(e)));
                }
                None if bytes_in == 0 => {
                    break Some(StreamEnd::Failed(Arc::new(Error::EmptyResult)));
                }
                None => break Some(StreamEnd::Completed),
            }
        };

        // Dropping the upstream terminates the fetch.
        drop(upstream);
        if let Some(end) = &end {
            primary.finish(end);
            secondary.finish(end);
        }

        let drained = match drain.await {
            Ok(state) => state,
            Err(e) => {
                error!(session = %label, error = %e, "Cache drain task failed");
                SinkState::Aborted(AbortReason::WriteFailed)
            }
        };
        let secondary_state = match secondary.state {
            SinkState::Aborted(reason) => SinkState::Aborted(reason),
            _ => drained,
        };
        publish(&cache_state, secondary_state);

        let session_status = match end {
            Some(StreamEnd::Completed) => SessionStatus::Completed,
            _ => SessionStatus::Aborted,
        };
        status.send_replace(session_status);

        let report = TeeReport {
            bytes_in,
            primary: primary.state,
            secondary: secondary_state,
            status: session_status,
            error: match &end {
                Some(StreamEnd::Failed(e)) => Some(e.to_string()),
                _ => None,
            },
            elapsed: started.elapsed(),
        };
        info!(
            session = %label,
            bytes_in = report.bytes_in,
            primary = ?report.primary,
            secondary = ?report.secondary,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Tee pipeline finished"
        );
        report
    }
}

fn publish(tx: &watch::Sender<SinkState>, state: SinkState) {
    tx.send_if_modified(|current| {
        if *current == state {
            return false;
        }
        *current = state;
        true
    });
}

/// Next upstream item. The stall timeout only guards the first byte.
async fn next_chunk(
    upstream: &mut ByteStream,
    bytes_in: u64,
    stall_timeout: Duration,
) -> Option<Result<Bytes>> {
    if bytes_in > 0 {
        return upstream.next().await;
    }
    match tokio::time::timeout(stall_timeout, upstream.next()).await {
        Ok(item) => item,
        Err(_) => Some(Err(Error::FetchStalled {
            seconds: stall_timeout.as_secs(),
        })),
    }
}

async fn drain_secondary(mut reader: SinkReader, mut sink: Box<dyn CacheSink>) -> SinkState {
    while let Some(item) = reader.next().await {
        match item {
            Ok(chunk) => {
                if let Err(e) = sink.append(&chunk).await {
                    warn!(error = %e, "Cache write failed, discarding entry");
                    drop(reader);
                    sink.discard().await;
                    return SinkState::Aborted(AbortReason::WriteFailed);
                }
            }
            Err(e) => {
                debug!(reason = %e, "Discarding partial cache entry");
                sink.discard().await;
                return SinkState::Aborted(AbortReason::Upstream);
            }
        }
    }
    match sink.commit().await {
        Ok(bytes) => {
            debug!(bytes, "Cache entry committed");
            SinkState::Completed
        }
        Err(e) => {
            warn!(error = %e, "Cache commit failed");
            SinkState::Aborted(AbortReason::WriteFailed)
        }
    }
}
