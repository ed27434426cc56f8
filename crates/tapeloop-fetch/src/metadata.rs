//! Parsing of the fetcher's `--dump-json` output.

use serde::Deserialize;
use tapeloop_core::TrackInfo;
use tracing::trace;

#[derive(Deserialize)]
struct Thumbnail {
    url: Option<String>,
}

#[derive(Deserialize)]
struct RawEntry {
    title: Option<String>,
    uploader: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<Thumbnail>,
    url: Option<String>,
    webpage_url: Option<String>,
}

impl RawEntry {
    fn into_track(self, requested_url: &str) -> TrackInfo {
        let thumbnail = self
            .thumbnail
            .or_else(|| self.thumbnails.into_iter().find_map(|t| t.url));
        let url = self
            .url
            .filter(|u| u.starts_with("http"))
            .or(self.webpage_url)
            .unwrap_or_else(|| requested_url.to_string());

        TrackInfo {
            title: self.title.unwrap_or_else(|| "Unknown title".to_string()),
            uploader: self.uploader,
            duration: self.duration,
            thumbnail,
            url,
        }
    }
}

/// Parse newline-delimited JSON entries; lines that are not JSON objects
/// are skipped.
pub fn parse_track_lines(output: &str, requested_url: &str) -> Vec<TrackInfo> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<RawEntry>(line) {
            Ok(entry) => Some(entry.into_track(requested_url)),
            Err(e) => {
                trace!(error = %e, "Skipping non-JSON fetcher output line");
                None
            }
        })
        .collect()
}
