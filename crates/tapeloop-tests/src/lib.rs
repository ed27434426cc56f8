//! Integration test infrastructure for Tapeloop.
//!
//! Tests run a real HTTP server on `127.0.0.1:0` with a temporary cache
//! directory and a [`ScriptedFetcher`] in place of the external process.
//!
//! ```ignore
//! use tapeloop_tests::{ScriptedFetcher, audio_payload, start_test_server};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let fetcher = ScriptedFetcher::new(audio_payload(4096)).shared();
//!     let server = start_test_server(fetcher.clone(), Default::default()).await.unwrap();
//!     let resp = server.client().stream("https://example.com/a", None).await.unwrap();
//! }
//! ```

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,tapeloop_stream=debug")),
        )
        .with_test_writer()
        .try_init();
}
