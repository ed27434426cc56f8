//! Media fetcher adapter for Tapeloop.
//!
//! Wraps a `yt-dlp`-compatible process as a lazy producer of encoded audio
//! bytes and of track metadata.

pub mod config;
pub mod metadata;
pub mod ytdlp;

pub use config::FetcherConfig;
pub use metadata::parse_track_lines;
pub use ytdlp::YtDlpFetcher;
