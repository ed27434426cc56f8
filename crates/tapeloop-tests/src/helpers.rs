//! Test helper functions and utilities.

use reqwest::Client;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tapeloop_api::{AppState, create_router};
use tapeloop_cache::CacheStore;
use tapeloop_core::{ContentKey, MediaFetcher, SourceRequest};
use tapeloop_stream::TeeConfig;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A running API server backed by a temporary cache directory.
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
    cache_dir: TempDir,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub fn client(&self) -> ApiTestClient {
        ApiTestClient::new(self.addr)
    }

    pub fn cache_dir(&self) -> &Path {
        self.cache_dir.path()
    }

    pub fn store(&self) -> &CacheStore {
        self.state.router.store()
    }

    /// Whether a complete cache entry exists for `url` with the default hint.
    pub async fn is_cached(&self, url: &str) -> bool {
        let key = ContentKey::derive(&SourceRequest::new(url));
        self.store().exists(&key).await
    }

    /// Wait until no live session is running.
    pub async fn wait_until_idle(&self) -> anyhow::Result<()> {
        for _ in 0..500 {
            if self.state.router.sessions().is_empty() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        anyhow::bail!("live sessions still running after 5s")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Start an API server for testing.
pub async fn start_test_server(
    fetcher: Arc<dyn MediaFetcher>,
    tee: TeeConfig,
) -> anyhow::Result<TestServer> {
    let cache_dir = TempDir::new()?;
    let store = CacheStore::new(cache_dir.path());
    let state = Arc::new(AppState::new(store, fetcher, tee));

    let app = create_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Test server failed");
        }
    });

    Ok(TestServer {
        addr,
        state,
        cache_dir,
        handle,
    })
}

/// Create an HTTP client for testing.
pub fn test_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_default()
}

/// API test client with base URL.
pub struct ApiTestClient {
    client: Client,
    base_url: String,
}

impl ApiTestClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            client: test_client(),
            base_url: format!("http://{addr}"),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client.get(self.url(path)).send().await
    }

    pub async fn post<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> reqwest::Result<reqwest::Response> {
        self.client.post(self.url(path)).json(body).send().await
    }

    /// `GET /stream?url=...` with extra query pairs and an optional `Range`.
    pub async fn stream_with(
        &self,
        source: &str,
        query: &[(&str, &str)],
        range: Option<&str>,
    ) -> reqwest::Result<reqwest::Response> {
        let mut params = vec![("url", source)];
        params.extend_from_slice(query);
        let mut request = self.client.get(self.url("/stream")).query(&params);
        if let Some(range) = range {
            request = request.header(reqwest::header::RANGE, range);
        }
        request.send().await
    }

    pub async fn stream(
        &self,
        source: &str,
        range: Option<&str>,
    ) -> reqwest::Result<reqwest::Response> {
        self.stream_with(source, &[], range).await
    }

    pub async fn info(&self, source: &str) -> reqwest::Result<reqwest::Response> {
        self.post("/info", &serde_json::json!({ "url": source }))
            .await
    }

    /// Check health endpoint.
    pub async fn health(&self) -> anyhow::Result<bool> {
        let resp = self.get("/health").await?;
        Ok(resp.status().is_success())
    }
}

/// Header value as a string, if present.
pub fn header<'a>(resp: &'a reqwest::Response, name: &str) -> Option<&'a str> {
    resp.headers().get(name).and_then(|v| v.to_str().ok())
}
