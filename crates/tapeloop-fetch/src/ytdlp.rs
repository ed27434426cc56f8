//! `yt-dlp`-compatible process adapter.

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::Stream;
use std::process::Stdio;
use tapeloop_core::{ByteStream, Error, MediaFetcher, Result, SourceRequest, TrackInfo};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};
use tracing::{debug, info, warn};

use crate::config::FetcherConfig;
use crate::metadata::parse_track_lines;

/// Runs the external fetcher once per request.
///
/// Audio is read from the process's stdout as it is produced; the process is
/// killed when the returned stream is dropped.
pub struct YtDlpFetcher {
    config: FetcherConfig,
}

impl YtDlpFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Arguments for streaming one item's audio to stdout.
    pub fn audio_args(&self, request: &SourceRequest) -> Vec<String> {
        let mut args = self.config.extra_args.clone();
        args.push("-f".to_string());
        args.push(request.hint.selector());
        match request.playlist_index {
            Some(index) => {
                args.push("--playlist-items".to_string());
                args.push(index.to_string());
            }
            None => args.push("--no-playlist".to_string()),
        }
        args.extend(
            ["--quiet", "--no-warnings", "--no-progress", "-o", "-", "--"]
                .map(String::from),
        );
        args.push(request.url.clone());
        args
    }

    /// Arguments for listing metadata without downloading.
    pub fn info_args(&self, url: &str) -> Vec<String> {
        let mut args = self.config.extra_args.clone();
        args.extend(["--flat-playlist", "--dump-json", "--no-warnings", "--"].map(String::from));
        args.push(url.to_string());
        args
    }

    fn spawn(&self, args: &[String]) -> Result<Child> {
        Command::new(&self.config.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::LaunchFailure(format!("{}: {}", self.config.program.display(), e))
            })
    }
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self::new(FetcherConfig::default())
    }
}

/// Forward stderr to the log, keeping the last non-empty line.
async fn forward_stderr(stderr: ChildStderr) -> Option<String> {
    let mut lines = BufReader::new(stderr).lines();
    let mut last = None;
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "tapeloop_fetch::stderr", "{}", line);
        if !line.trim().is_empty() {
            last = Some(line);
        }
    }
    last
}

fn exit_error(code: Option<i32>, last_line: Option<String>) -> Error {
    Error::FetchFailed {
        exit_code: code.unwrap_or(-1),
        message: last_line.unwrap_or_else(|| "no diagnostic output".to_string()),
    }
}

fn audio_stream(
    mut child: Child,
    mut stdout: ChildStdout,
    stderr_task: JoinHandle<Option<String>>,
    chunk_bytes: usize,
) -> impl Stream<Item = Result<Bytes>> + Send {
    try_stream! {
        let mut total = 0u64;
        loop {
            let mut buf = BytesMut::with_capacity(chunk_bytes);
            let n = stdout.read_buf(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;
            yield buf.freeze();
        }

        let status = child.wait().await?;
        let last_line = stderr_task.await.ok().flatten();
        if !status.success() {
            warn!(exit_code = ?status.code(), "Media fetcher failed");
            Err::<(), Error>(exit_error(status.code(), last_line))?;
        }
        if total == 0 {
            Err::<(), Error>(Error::EmptyResult)?;
        }
        debug!(bytes = total, "Media fetcher finished");
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch_audio(&self, request: &SourceRequest) -> Result<ByteStream> {
        let args = self.audio_args(request);
        let mut child = self.spawn(&args)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::LaunchFailure("fetcher stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::LaunchFailure("fetcher stderr not captured".to_string()))?;
        let stderr_task = tokio::spawn(forward_stderr(stderr));

        info!(source = %request, pid = ?child.id(), "Started media fetch");

        Ok(Box::pin(audio_stream(
            child,
            stdout,
            stderr_task,
            self.config.read_chunk_bytes.max(1),
        )))
    }

    async fn fetch_info(&self, url: &str) -> Result<Vec<TrackInfo>> {
        let args = self.info_args(url);
        let child = self.spawn(&args)?;
        let limit = self.config.info_timeout_secs;

        // Dropping the future on timeout drops the child, which kills it.
        let output = match timeout(Duration::from_secs(limit), child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(url, timeout_secs = limit, "Metadata lookup timed out, killing process");
                return Err(Error::FetchStalled { seconds: limit });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last_line = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(str::to_string);
            return Err(exit_error(output.status.code(), last_line));
        }

        let tracks = parse_track_lines(&String::from_utf8_lossy(&output.stdout), url);
        if tracks.is_empty() {
            return Err(Error::EmptyResult);
        }
        debug!(url, count = tracks.len(), "Fetched track metadata");
        Ok(tracks)
    }
}
