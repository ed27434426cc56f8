//! Server configuration.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tapeloop_cache::DEFAULT_MIN_COMPLETE_BYTES;
use tapeloop_fetch::FetcherConfig;
use tapeloop_stream::{AbandonPolicy, TeeConfig};

/// Server configuration, usually read from `tapeloop.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the HTTP server to.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Directory holding cached blobs.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Blobs smaller than this are treated as not cached.
    #[serde(default = "default_min_cached_bytes")]
    pub min_cached_bytes: u64,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub log: LogSettings,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 4000))
}

fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "tapeloop", "tapeloop")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./cache"))
}

fn default_min_cached_bytes() -> u64 {
    DEFAULT_MIN_COMPLETE_BYTES
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            cache_dir: default_cache_dir(),
            min_cached_bytes: default_min_cached_bytes(),
            fetcher: FetcherConfig::default(),
            stream: StreamSettings::default(),
            log: LogSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, std::io::Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, std::io::Error> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// Buffering and abandonment settings for live sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    #[serde(default = "default_primary_buffer")]
    pub primary_buffer_bytes: usize,
    #[serde(default = "default_secondary_buffer")]
    pub secondary_buffer_bytes: usize,
    #[serde(default)]
    pub abandon: AbandonPolicy,
    /// Seconds to wait for the first byte from the fetcher.
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_secs: u64,
}

fn default_primary_buffer() -> usize {
    256 * 1024
}

fn default_secondary_buffer() -> usize {
    4 * 1024 * 1024
}

fn default_stall_timeout() -> u64 {
    30
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            primary_buffer_bytes: default_primary_buffer(),
            secondary_buffer_bytes: default_secondary_buffer(),
            abandon: AbandonPolicy::default(),
            stall_timeout_secs: default_stall_timeout(),
        }
    }
}

impl StreamSettings {
    pub fn tee_config(&self) -> TeeConfig {
        TeeConfig::default()
            .with_capacities(self.primary_buffer_bytes, self.secondary_buffer_bytes)
            .with_abandon_policy(self.abandon)
            .with_stall_timeout(Duration::from_secs(self.stall_timeout_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            json: false,
            filter: default_log_filter(),
        }
    }
}
