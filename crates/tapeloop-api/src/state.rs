//! Application state shared across handlers.

use std::sync::Arc;
use tapeloop_cache::CacheStore;
use tapeloop_core::MediaFetcher;
use tapeloop_stream::{StreamRouter, TeeConfig};

#[derive(Clone)]
pub struct AppState {
    pub router: StreamRouter,
    pub fetcher: Arc<dyn MediaFetcher>,
}

impl AppState {
    pub fn new(store: CacheStore, fetcher: Arc<dyn MediaFetcher>, tee: TeeConfig) -> Self {
        Self {
            router: StreamRouter::new(store, fetcher.clone(), tee),
            fetcher,
        }
    }
}
