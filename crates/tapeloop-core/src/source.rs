//! Source requests and track metadata.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Container the fetcher should select for the audio stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    #[default]
    M4a,
    Opus,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Opus => "opus",
        }
    }

    /// MIME type served for this container.
    pub fn content_type(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::M4a => "audio/mp4",
            AudioFormat::Opus => "audio/webm",
        }
    }

    /// Extension used in the fetcher's format filter. Opus audio is
    /// published inside webm containers.
    fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Opus => "webm",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Best,
    Worst,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Best => "best",
            Quality::Worst => "worst",
        }
    }
}

/// Encoding/quality hint passed to the fetcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatHint {
    #[serde(default)]
    pub format: AudioFormat,
    #[serde(default)]
    pub quality: Quality,
}

impl FormatHint {
    pub fn new(format: AudioFormat, quality: Quality) -> Self {
        Self { format, quality }
    }

    /// Format selector, e.g. `bestaudio[ext=m4a]/bestaudio`.
    pub fn selector(&self) -> String {
        let base = format!("{}audio", self.quality.as_str());
        format!("{base}[ext={}]/{base}", self.format.extension())
    }

    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }
}

/// A request for the audio behind one source URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRequest {
    pub url: String,
    #[serde(default)]
    pub hint: FormatHint,
    /// 1-based playlist item; `None` means the URL names a single item.
    #[serde(default)]
    pub playlist_index: Option<u32>,
}

impl SourceRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            hint: FormatHint::default(),
            playlist_index: None,
        }
    }

    pub fn with_hint(mut self, hint: FormatHint) -> Self {
        self.hint = hint;
        self
    }

    pub fn with_playlist_index(mut self, index: u32) -> Self {
        self.playlist_index = Some(index);
        self
    }

    /// Stable textual form hashed into the content key.
    pub fn canonical(&self) -> String {
        let mut out = format!(
            "{}\nformat={}\nquality={}",
            self.url,
            self.hint.format.as_str(),
            self.hint.quality.as_str()
        );
        if let Some(index) = self.playlist_index {
            out.push_str(&format!("\nitem={index}"));
        }
        out
    }
}

impl fmt::Display for SourceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.playlist_index {
            Some(index) => write!(f, "{} (item {})", self.url, index),
            None => f.write_str(&self.url),
        }
    }
}

/// Metadata for one playable item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    /// Duration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    pub url: String,
}
