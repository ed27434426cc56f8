//! End-to-end tests for `GET /stream`.

use reqwest::StatusCode;
use std::time::Duration;
use tapeloop_stream::{AbandonPolicy, TeeConfig};
use tapeloop_tests::{Failure, ScriptedFetcher, audio_payload, header, start_test_server};

const SOURCE: &str = "https://media.example.com/watch?v=abc123";

#[tokio::test]
async fn test_miss_then_hit_is_byte_identical() {
    tapeloop_tests::init_test_logging();
    let fetcher = ScriptedFetcher::new(audio_payload(10_000)).shared();
    let server = start_test_server(fetcher.clone(), TeeConfig::default())
        .await
        .unwrap();
    let client = server.client();

    let live = client.stream(SOURCE, None).await.unwrap();
    assert_eq!(live.status(), StatusCode::OK);
    assert_eq!(header(&live, "x-cache"), Some("MISS"));
    assert_eq!(header(&live, "content-type"), Some("audio/mp4"));
    assert!(header(&live, "content-length").is_none());
    let first = live.bytes().await.unwrap();
    assert_eq!(first.as_ref(), fetcher.payload());

    server.wait_until_idle().await.unwrap();
    assert!(server.is_cached(SOURCE).await);

    for _ in 0..3 {
        let cached = client.stream(SOURCE, None).await.unwrap();
        assert_eq!(cached.status(), StatusCode::OK);
        assert_eq!(header(&cached, "x-cache"), Some("HIT"));
        assert_eq!(header(&cached, "content-length"), Some("10000"));
        assert_eq!(header(&cached, "accept-ranges"), Some("bytes"));
        assert_eq!(cached.bytes().await.unwrap(), first);
    }
    assert_eq!(fetcher.audio_calls(), 1);
}

#[tokio::test]
async fn test_ranges_on_cached_entry() {
    let fetcher = ScriptedFetcher::new(audio_payload(1000)).shared();
    let server = start_test_server(fetcher.clone(), TeeConfig::default())
        .await
        .unwrap();
    let client = server.client();
    client.stream(SOURCE, None).await.unwrap().bytes().await.unwrap();
    server.wait_until_idle().await.unwrap();

    let partial = client.stream(SOURCE, Some("bytes=100-199")).await.unwrap();
    assert_eq!(partial.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&partial, "content-range"), Some("bytes 100-199/1000"));
    assert_eq!(header(&partial, "content-length"), Some("100"));
    assert_eq!(header(&partial, "accept-ranges"), Some("bytes"));
    assert_eq!(
        partial.bytes().await.unwrap().as_ref(),
        &fetcher.payload()[100..200]
    );

    let tail = client.stream(SOURCE, Some("bytes=-10")).await.unwrap();
    assert_eq!(header(&tail, "content-range"), Some("bytes 990-999/1000"));
    assert_eq!(tail.bytes().await.unwrap().as_ref(), &fetcher.payload()[990..]);

    let open = client.stream(SOURCE, Some("bytes=900-")).await.unwrap();
    assert_eq!(header(&open, "content-range"), Some("bytes 900-999/1000"));

    let clamped = client.stream(SOURCE, Some("bytes=950-5000")).await.unwrap();
    assert_eq!(header(&clamped, "content-range"), Some("bytes 950-999/1000"));
    assert_eq!(clamped.bytes().await.unwrap().len(), 50);
}

#[tokio::test]
async fn test_unsatisfiable_and_malformed_ranges() {
    let fetcher = ScriptedFetcher::new(audio_payload(1000)).shared();
    let server = start_test_server(fetcher.clone(), TeeConfig::default())
        .await
        .unwrap();
    let client = server.client();
    client.stream(SOURCE, None).await.unwrap().bytes().await.unwrap();
    server.wait_until_idle().await.unwrap();

    let resp = client.stream(SOURCE, Some("bytes=1000-")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(header(&resp, "content-range"), Some("bytes */1000"));
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].is_string());

    let resp = client.stream(SOURCE, Some("bytes=0-1,5-9")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client.stream(SOURCE, Some("pages=1-2")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(fetcher.audio_calls(), 1);
}

#[tokio::test]
async fn test_concurrent_requests_share_one_fetch() {
    let fetcher = ScriptedFetcher::new(audio_payload(20_000))
        .with_chunk_size(500)
        .with_delay(Duration::from_millis(5))
        .shared();
    let server = start_test_server(fetcher.clone(), TeeConfig::default())
        .await
        .unwrap();
    let a = server.client();
    let b = server.client();

    let (first, second) = tokio::join!(
        async {
            let resp = a.stream(SOURCE, None).await.unwrap();
            let source = header(&resp, "x-cache").unwrap_or_default().to_string();
            (source, resp.bytes().await.unwrap())
        },
        async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let resp = b.stream(SOURCE, None).await.unwrap();
            let source = header(&resp, "x-cache").unwrap_or_default().to_string();
            (source, resp.bytes().await.unwrap())
        },
    );

    assert_eq!(first.0, "MISS");
    assert_eq!(second.0, "JOIN");
    assert_eq!(first.1.as_ref(), fetcher.payload());
    assert_eq!(second.1.as_ref(), fetcher.payload());
    assert_eq!(fetcher.audio_calls(), 1);

    server.wait_until_idle().await.unwrap();
    assert!(server.is_cached(SOURCE).await);
}

#[tokio::test]
async fn test_joined_range_reports_unknown_length() {
    let fetcher = ScriptedFetcher::new(audio_payload(50_000))
        .with_chunk_size(1000)
        .with_delay(Duration::from_millis(10))
        .shared();
    let server = start_test_server(fetcher.clone(), TeeConfig::default())
        .await
        .unwrap();
    let client = server.client();

    let live = client.stream(SOURCE, None).await.unwrap();
    let live_body = tokio::spawn(live.bytes());
    tokio::time::sleep(Duration::from_millis(60)).await;

    let partial = client.stream(SOURCE, Some("bytes=0-99")).await.unwrap();
    assert_eq!(partial.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&partial, "x-cache"), Some("JOIN"));
    assert_eq!(header(&partial, "content-range"), Some("bytes 0-99/*"));
    assert!(header(&partial, "accept-ranges").is_none());
    assert_eq!(
        partial.bytes().await.unwrap().as_ref(),
        &fetcher.payload()[..100]
    );

    let ahead = client.stream(SOURCE, Some("bytes=49000-")).await.unwrap();
    assert_eq!(ahead.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(header(&ahead, "retry-after").is_some());

    live_body.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_client_disconnect_discards_partial_entry() {
    let fetcher = ScriptedFetcher::new(audio_payload(2_000_000))
        .with_chunk_size(4096)
        .with_delay(Duration::from_millis(5))
        .shared();
    let server = start_test_server(fetcher.clone(), TeeConfig::default())
        .await
        .unwrap();
    let client = server.client();

    let mut live = client.stream(SOURCE, None).await.unwrap();
    assert!(live.chunk().await.unwrap().is_some());
    drop(live);

    server.wait_until_idle().await.unwrap();
    assert_eq!(fetcher.streams_dropped(), 1);
    assert!(!server.is_cached(SOURCE).await);
    let leftovers = std::fs::read_dir(server.cache_dir()).unwrap().count();
    assert_eq!(leftovers, 0);

    let again = client.stream(SOURCE, Some("bytes=0-9")).await.unwrap();
    assert_eq!(header(&again, "x-cache"), Some("MISS"));
    drop(again);
    assert_eq!(fetcher.audio_calls(), 2);
}

#[tokio::test]
async fn test_continue_caching_survives_disconnect() {
    let fetcher = ScriptedFetcher::new(audio_payload(40_000))
        .with_chunk_size(1000)
        .with_delay(Duration::from_millis(2))
        .shared();
    let tee = TeeConfig::default().with_abandon_policy(AbandonPolicy::ContinueCaching);
    let server = start_test_server(fetcher.clone(), tee).await.unwrap();
    let client = server.client();

    let mut live = client.stream(SOURCE, None).await.unwrap();
    live.chunk().await.unwrap();
    drop(live);

    server.wait_until_idle().await.unwrap();
    assert!(server.is_cached(SOURCE).await);
    let cached = client.stream(SOURCE, None).await.unwrap();
    assert_eq!(header(&cached, "x-cache"), Some("HIT"));
    assert_eq!(cached.bytes().await.unwrap().as_ref(), fetcher.payload());
}

#[tokio::test]
async fn test_mid_stream_failure_truncates_and_is_not_cached() {
    let fetcher = ScriptedFetcher::new(audio_payload(10_000))
        .with_chunk_size(500)
        .failing(Failure::AfterBytes(3000))
        .shared();
    let server = start_test_server(fetcher.clone(), TeeConfig::default())
        .await
        .unwrap();
    let client = server.client();

    let live = client.stream(SOURCE, None).await.unwrap();
    assert_eq!(live.status(), StatusCode::OK);
    // The body is either cut short or fails outright.
    if let Ok(body) = live.bytes().await {
        assert!(body.len() < 10_000);
    }

    server.wait_until_idle().await.unwrap();
    assert!(!server.is_cached(SOURCE).await);
}

#[tokio::test]
async fn test_fetch_errors_map_to_gateway_statuses() {
    let launch = ScriptedFetcher::new(audio_payload(10))
        .failing(Failure::Launch)
        .shared();
    let server = start_test_server(launch, TeeConfig::default()).await.unwrap();
    let resp = server.client().stream(SOURCE, None).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("scripted launch failure")
    );

    let empty = ScriptedFetcher::new(audio_payload(10))
        .failing(Failure::Empty)
        .shared();
    let server = start_test_server(empty, TeeConfig::default()).await.unwrap();
    let resp = server.client().stream(SOURCE, None).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    let stalled = ScriptedFetcher::new(audio_payload(10))
        .failing(Failure::Stall)
        .shared();
    let tee = TeeConfig::default().with_stall_timeout(Duration::from_millis(100));
    let server = start_test_server(stalled.clone(), tee).await.unwrap();
    let resp = server.client().stream(SOURCE, None).await.unwrap();
    assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    server.wait_until_idle().await.unwrap();
    assert_eq!(stalled.streams_dropped(), 1);
}

#[tokio::test]
async fn test_format_and_index_select_distinct_entries() {
    let fetcher = ScriptedFetcher::new(audio_payload(2000)).shared();
    let server = start_test_server(fetcher.clone(), TeeConfig::default())
        .await
        .unwrap();
    let client = server.client();

    let mp3 = client
        .stream_with(SOURCE, &[("format", "mp3")], None)
        .await
        .unwrap();
    assert_eq!(header(&mp3, "content-type"), Some("audio/mpeg"));
    mp3.bytes().await.unwrap();

    let opus = client
        .stream_with(SOURCE, &[("format", "opus"), ("index", "2")], None)
        .await
        .unwrap();
    assert_eq!(header(&opus, "content-type"), Some("audio/webm"));
    assert_eq!(header(&opus, "x-cache"), Some("MISS"));
    opus.bytes().await.unwrap();
    server.wait_until_idle().await.unwrap();

    let again = client
        .stream_with(SOURCE, &[("format", "mp3")], None)
        .await
        .unwrap();
    assert_eq!(header(&again, "x-cache"), Some("HIT"));
    assert_eq!(fetcher.audio_calls(), 2);

    let bad_index = client
        .stream_with(SOURCE, &[("index", "0")], None)
        .await
        .unwrap();
    assert_eq!(bad_index.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_tiny_result_is_served_but_not_cached() {
    let fetcher = ScriptedFetcher::new(audio_payload(100)).shared();
    let server = start_test_server(fetcher.clone(), TeeConfig::default())
        .await
        .unwrap();
    let client = server.client();

    let first = client.stream(SOURCE, None).await.unwrap();
    assert_eq!(first.bytes().await.unwrap().len(), 100);
    server.wait_until_idle().await.unwrap();

    let second = client.stream(SOURCE, None).await.unwrap();
    assert_eq!(header(&second, "x-cache"), Some("MISS"));
    second.bytes().await.unwrap();
    assert_eq!(fetcher.audio_calls(), 2);
}
