//! Tapeloop server entrypoint.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tapeloop_api::{AppState, create_router};
use tapeloop_cache::CacheStore;
use tapeloop_fetch::YtDlpFetcher;
use tokio::net::TcpListener;
use tracing::{info, warn};

mod config;
mod logging;

use config::ServerConfig;

#[derive(Parser, Debug)]
#[command(name = "tapeloop")]
#[command(author, version, about = "Streaming audio proxy with a write-through cache", long_about = None)]
struct Cli {
    /// YAML configuration file.
    #[arg(short, long, env = "TAPELOOP_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, env = "TAPELOOP_LISTEN")]
    listen: Option<SocketAddr>,

    /// Directory for cached audio.
    #[arg(long, env = "TAPELOOP_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Fetcher program (yt-dlp compatible).
    #[arg(long, env = "TAPELOOP_FETCHER")]
    fetcher: Option<PathBuf>,

    /// Log as JSON lines.
    #[arg(long, env = "TAPELOOP_LOG_JSON")]
    log_json: bool,
}

impl Cli {
    /// Read the config file, if any, and apply flag overrides.
    fn load_config(&self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)
                .with_context(|| format!("failed to read config {}", path.display()))?,
            None => ServerConfig::default(),
        };
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = dir.clone();
        }
        if let Some(program) = &self.fetcher {
            config.fetcher.program = program.clone();
        }
        if self.log_json {
            config.log.json = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    logging::init_logging(&config.log);

    tokio::fs::create_dir_all(&config.cache_dir)
        .await
        .with_context(|| format!("failed to create cache dir {}", config.cache_dir.display()))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        cache_dir = %config.cache_dir.display(),
        fetcher = %config.fetcher.program.display(),
        abandon = ?config.stream.abandon,
        "Starting tapeloop"
    );

    let store =
        CacheStore::new(config.cache_dir.clone()).with_min_complete_bytes(config.min_cached_bytes);
    let fetcher = Arc::new(YtDlpFetcher::new(config.fetcher.clone()));
    let state = Arc::new(AppState::new(store, fetcher, config.stream.tee_config()));
    let app = create_router(state);

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!(addr = %listener.local_addr()?, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "Cannot listen for Ctrl-C, running until killed");
            std::future::pending::<()>().await;
        }
    }
}
