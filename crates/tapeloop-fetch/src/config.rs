//! Fetcher configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the external fetch process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Program to execute.
    #[serde(default = "default_program")]
    pub program: PathBuf,
    /// Arguments placed before the generated ones (e.g. `--cookies file`).
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Upper bound for a metadata lookup, in seconds.
    #[serde(default = "default_info_timeout")]
    pub info_timeout_secs: u64,
    /// Read size for the audio pipe.
    #[serde(default = "default_read_chunk")]
    pub read_chunk_bytes: usize,
}

fn default_program() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_info_timeout() -> u64 {
    60
}

fn default_read_chunk() -> usize {
    64 * 1024
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            extra_args: vec![],
            info_timeout_secs: default_info_timeout(),
            read_chunk_bytes: default_read_chunk(),
        }
    }
}

impl FetcherConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn with_extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_info_timeout(mut self, secs: u64) -> Self {
        self.info_timeout_secs = secs;
        self
    }
}
