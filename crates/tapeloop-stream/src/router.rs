//! Per-request routing: cached blob, joined session, or a new live fetch.

use crate::range::{Negotiation, RangeSpec, ResourceLength, negotiate};
use crate::session::{Attachments, Claim, LiveSession, SessionRegistry, VacantSlot};
use crate::tee::{TeeConfig, TeePipeline};
use futures::StreamExt;
use std::sync::Arc;
use tapeloop_cache::CacheStore;
use tapeloop_core::{ByteStream, ContentKey, Error, MediaFetcher, Result, SourceRequest};
use tracing::{debug, info};

/// Where a response body comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverySource {
    /// A complete cache entry.
    Cache,
    /// A new fetch, teed into the cache.
    Live,
    /// Tailing the cache entry of a fetch already in progress.
    Joined,
}

impl DeliverySource {
    /// Value of the `X-Cache` response header.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliverySource::Cache => "HIT",
            DeliverySource::Live => "MISS",
            DeliverySource::Joined => "JOIN",
        }
    }
}

/// A routed response, ready to be written out.
pub struct Delivery {
    pub source: DeliverySource,
    pub negotiation: Negotiation,
    pub content_type: &'static str,
    pub body: ByteStream,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("source", &self.source)
            .field("negotiation", &self.negotiation)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct StreamRouter {
    store: CacheStore,
    fetcher: Arc<dyn MediaFetcher>,
    sessions: SessionRegistry,
    tee: TeeConfig,
}

impl StreamRouter {
    pub fn new(store: CacheStore, fetcher: Arc<dyn MediaFetcher>, tee: TeeConfig) -> Self {
        Self {
            store,
            fetcher,
            sessions: SessionRegistry::new(),
            tee,
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Route one audio request with an optional raw `Range` header.
    pub async fn route(&self, request: &SourceRequest, range: Option<&str>) -> Result<Delivery> {
        let spec = range.map(RangeSpec::parse).transpose()?;
        let key = ContentKey::derive(request);
        let content_type = request.hint.content_type();

        if let Some(delivery) = self.serve_cached(&key, spec, content_type).await? {
            return Ok(delivery);
        }

        match self.sessions.claim(&key).await {
            Claim::Joined(session) => self.join(&session, spec, content_type),
            Claim::Vacant(slot) => {
                // A session may have committed between the first check and the claim.
                if let Some(delivery) = self.serve_cached(&key, spec, content_type).await? {
                    return Ok(delivery);
                }
                self.originate(slot, request, content_type).await
            }
        }
    }

    async fn serve_cached(
        &self,
        key: &ContentKey,
        spec: Option<RangeSpec>,
        content_type: &'static str,
    ) -> Result<Option<Delivery>> {
        let size = match self.store.size(key).await {
            Ok(size) => size,
            Err(Error::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let negotiation = negotiate(spec, ResourceLength::Known(size))?;
        let (start, end) = negotiation.window();
        let body = self.store.open_for_read(key, start, end).await?;

        info!(key = %key.short(), status = negotiation.status_code(), "Serving from cache");
        Ok(Some(Delivery {
            source: DeliverySource::Cache,
            negotiation,
            content_type,
            body,
        }))
    }

    fn join(
        &self,
        session: &LiveSession,
        spec: Option<RangeSpec>,
        content_type: &'static str,
    ) -> Result<Delivery> {
        let guard = session.attach();
        let progress = session.progress();
        let negotiation = match spec {
            Some(spec) if !spec.is_whole() => negotiate(
                Some(spec),
                ResourceLength::Growing {
                    available: progress.borrow().written,
                },
            )?,
            _ => Negotiation::Full { length: None },
        };

        let (start, end) = negotiation.window();
        let mut tail = self.store.follow(session.key(), start, end, progress);
        let body = async_stream::stream! {
            let _guard = guard;
            while let Some(item) = tail.next().await {
                yield item;
            }
        };

        info!(
            key = %session.key().short(),
            followers = session.followers(),
            available = session.available(),
            "Joining live session"
        );
        Ok(Delivery {
            source: DeliverySource::Joined,
            negotiation,
            content_type,
            body: Box::pin(body),
        })
    }

    async fn originate(
        &self,
        slot: VacantSlot,
        request: &SourceRequest,
        content_type: &'static str,
    ) -> Result<Delivery> {
        let key = slot.key().clone();
        let writer = self.store.open_for_write(&key).await?;
        let progress = writer.subscribe();
        let upstream = self.fetcher.fetch_audio(request).await?;

        let (pipeline, primary) = TeePipeline::new(
            key.short().to_string(),
            upstream,
            Box::new(writer),
            self.tee.clone(),
        );
        let attachments = Attachments::new();
        let pipeline = pipeline.with_followers(attachments.subscribe());
        let session = Arc::new(LiveSession::new(
            key.clone(),
            progress,
            attachments,
            pipeline.status(),
            pipeline.cache_state(),
        ));
        slot.insert(session.clone());

        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            let report = pipeline.run().await;
            sessions.release(session.key(), &session);
            debug!(
                key = %session.key().short(),
                status = ?report.status,
                bytes = report.bytes_in,
                "Live session closed"
            );
        });

        info!(key = %key.short(), source = %request, "Starting live fetch");

        // Hold the headers until the first chunk so fetch failures that
        // happen before any audio still get a proper status code.
        let mut primary = primary;
        let body: ByteStream = match primary.next().await {
            Some(Ok(first)) => Box::pin(
                futures::stream::once(async move { Ok(first) }).chain(primary.into_stream()),
            ),
            Some(Err(e)) => return Err(detach(&e)),
            None => Box::pin(futures::stream::empty()),
        };
        Ok(Delivery {
            source: DeliverySource::Live,
            negotiation: Negotiation::Full { length: None },
            content_type,
            body,
        })
    }
}

/// Owned copy of a shared pipeline error, keeping the variants that map to
/// distinct HTTP statuses.
fn detach(err: &Error) -> Error {
    match err {
        Error::LaunchFailure(msg) => Error::LaunchFailure(msg.clone()),
        Error::FetchFailed { exit_code, message } => Error::FetchFailed {
            exit_code: *exit_code,
            message: message.clone(),
        },
        Error::EmptyResult => Error::EmptyResult,
        Error::FetchStalled { seconds } => Error::FetchStalled { seconds: *seconds },
        other => Error::StreamAborted(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tapeloop_core::TrackInfo;
    use tempfile::TempDir;

    struct PacedFetcher {
        payload: Vec<u8>,
        chunk: usize,
        delay: Duration,
        calls: AtomicUsize,
        fail_launch: bool,
    }

    impl PacedFetcher {
        fn new(len: usize, delay: Duration) -> Self {
            Self {
                payload: (0..len).map(|i| (i % 239) as u8).collect(),
                chunk: 100,
                delay,
                calls: AtomicUsize::new(0),
                fail_launch: false,
            }
        }
    }

    #[async_trait]
    impl MediaFetcher for PacedFetcher {
        async fn fetch_audio(&self, _request: &SourceRequest) -> Result<ByteStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_launch {
                return Err(Error::LaunchFailure("no such program".to_string()));
            }
            let chunks: Vec<Bytes> = self
                .payload
                .chunks(self.chunk)
                .map(Bytes::copy_from_slice)
                .collect();
            let delay = self.delay;
            Ok(Box::pin(async_stream::stream! {
                for chunk in chunks {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    yield Ok(chunk);
                }
            }))
        }

        async fn fetch_info(&self, _url: &str) -> Result<Vec<TrackInfo>> {
            Ok(Vec::new())
        }
    }

    fn router(fetcher: Arc<PacedFetcher>) -> (StreamRouter, TempDir) {
        router_with(fetcher, TeeConfig::default())
    }

    fn router_with(fetcher: Arc<PacedFetcher>, tee: TeeConfig) -> (StreamRouter, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        (StreamRouter::new(store, fetcher, tee), dir)
    }

    async fn body(delivery: Delivery) -> Vec<u8> {
        let mut out = Vec::new();
        let mut stream = delivery.body;
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    async fn wait_idle(router: &StreamRouter) {
        for _ in 0..200 {
            if router.sessions().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("live session never closed");
    }

    fn request() -> SourceRequest {
        SourceRequest::new("https://example.com/watch?v=abc")
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let fetcher = Arc::new(PacedFetcher::new(1000, Duration::ZERO));
        let (router, _dir) = router(fetcher.clone());

        let live = router.route(&request(), None).await.unwrap();
        assert_eq!(live.source, DeliverySource::Live);
        assert_eq!(live.negotiation.content_length(), None);
        assert_eq!(body(live).await, fetcher.payload);
        wait_idle(&router).await;

        let cached = router.route(&request(), None).await.unwrap();
        assert_eq!(cached.source, DeliverySource::Cache);
        assert_eq!(cached.negotiation, Negotiation::Full { length: Some(1000) });
        assert_eq!(body(cached).await, fetcher.payload);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_range_on_cached_entry() {
        let fetcher = Arc::new(PacedFetcher::new(1000, Duration::ZERO));
        let (router, _dir) = router(fetcher.clone());
        body(router.route(&request(), None).await.unwrap()).await;
        wait_idle(&router).await;

        let partial = router
            .route(&request(), Some("bytes=100-199"))
            .await
            .unwrap();
        assert_eq!(partial.negotiation.status_code(), 206);
        assert_eq!(
            partial.negotiation.content_range().as_deref(),
            Some("bytes 100-199/1000")
        );
        assert_eq!(body(partial).await, &fetcher.payload[100..200]);

        assert!(matches!(
            router.route(&request(), Some("bytes=1000-")).await,
            Err(Error::RangeUnsatisfiable { length: Some(1000) })
        ));
    }

    #[tokio::test]
    async fn test_invalid_range_is_rejected_before_fetching() {
        let fetcher = Arc::new(PacedFetcher::new(1000, Duration::ZERO));
        let (router, _dir) = router(fetcher.clone());
        assert!(matches!(
            router.route(&request(), Some("lines=1-2")).await,
            Err(Error::InvalidRange(_))
        ));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_request_joins_live_session() {
        let fetcher = Arc::new(PacedFetcher::new(2000, Duration::from_millis(5)));
        let (router, _dir) = router(fetcher.clone());

        let live = router.route(&request(), None).await.unwrap();
        let first = tokio::spawn(body(live));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let joined = router.route(&request(), None).await.unwrap();
        assert_eq!(joined.source, DeliverySource::Joined);
        let second = body(joined).await;

        assert_eq!(first.await.unwrap(), fetcher.payload);
        assert_eq!(second, fetcher.payload);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_joined_range_beyond_progress() {
        let fetcher = Arc::new(PacedFetcher::new(5000, Duration::from_millis(10)));
        let (router, _dir) = router(fetcher.clone());

        let live = router.route(&request(), None).await.unwrap();
        let first = tokio::spawn(body(live));
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(matches!(
            router.route(&request(), Some("bytes=4000-")).await,
            Err(Error::RangeNotYetAvailable { .. })
        ));

        let partial = router
            .route(&request(), Some("bytes=0-49"))
            .await
            .unwrap();
        assert_eq!(partial.source, DeliverySource::Joined);
        assert_eq!(
            partial.negotiation.content_range().as_deref(),
            Some("bytes 0-49/*")
        );
        assert_eq!(body(partial).await, &fetcher.payload[..50]);
        first.await.unwrap();
    }

    #[tokio::test]
    async fn test_session_with_dropped_cache_lane_is_not_joined() {
        let fetcher = Arc::new(PacedFetcher::new(2_000_000, Duration::ZERO));
        let tee = TeeConfig::default().with_capacities(256 * 1024, 100);
        let (router, _dir) = router_with(fetcher.clone(), tee);

        // The first client stays connected without reading, so its session
        // keeps running after the cache lane overflows.
        let stalled = router.route(&request(), None).await.unwrap();
        assert_eq!(stalled.source, DeliverySource::Live);
        tokio::time::sleep(Duration::from_millis(200)).await;
        let key = ContentKey::derive(&request());
        let first = router.sessions().get(&key).unwrap();
        assert!(first.is_active());
        assert!(!first.is_joinable());

        let second = router.route(&request(), None).await.unwrap();
        assert_eq!(second.source, DeliverySource::Live);
        assert_eq!(body(second).await, fetcher.payload);
        assert_eq!(body(stalled).await, fetcher.payload);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);

        wait_idle(&router).await;
        assert!(!router.store().exists(&key).await);
    }

    #[tokio::test]
    async fn test_launch_failure_leaves_nothing_behind() {
        let mut fetcher = PacedFetcher::new(1000, Duration::ZERO);
        fetcher.fail_launch = true;
        let fetcher = Arc::new(fetcher);
        let (router, _dir) = router(fetcher.clone());

        assert!(matches!(
            router.route(&request(), None).await,
            Err(Error::LaunchFailure(_))
        ));
        assert!(router.sessions().is_empty());
        let key = ContentKey::derive(&request());
        assert!(!router.store().is_writing(&key));
        assert!(!router.store().exists(&key).await);
    }

    #[tokio::test]
    async fn test_empty_fetch_fails_before_headers() {
        let fetcher = Arc::new(PacedFetcher::new(0, Duration::ZERO));
        let (router, _dir) = router(fetcher.clone());

        assert!(matches!(
            router.route(&request(), None).await,
            Err(Error::EmptyResult)
        ));
        wait_idle(&router).await;
        assert!(!router.store().exists(&ContentKey::derive(&request())).await);
    }

    #[test]
    fn test_detach_keeps_fetch_variants() {
        assert!(matches!(
            detach(&Error::FetchStalled { seconds: 30 }),
            Error::FetchStalled { seconds: 30 }
        ));
        assert!(matches!(
            detach(&Error::CacheAborted("x".into())),
            Error::StreamAborted(_)
        ));
    }

    #[tokio::test]
    async fn test_format_hint_selects_distinct_entries() {
        let fetcher = Arc::new(PacedFetcher::new(1000, Duration::ZERO));
        let (router, _dir) = router(fetcher.clone());
        body(router.route(&request(), None).await.unwrap()).await;
        wait_idle(&router).await;

        let mp3 = request().with_hint(tapeloop_core::FormatHint::new(
            tapeloop_core::AudioFormat::Mp3,
            tapeloop_core::Quality::Best,
        ));
        let delivery = router.route(&mp3, None).await.unwrap();
        assert_eq!(delivery.source, DeliverySource::Live);
        assert_eq!(delivery.content_type, "audio/mpeg");
        body(delivery).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }
}
