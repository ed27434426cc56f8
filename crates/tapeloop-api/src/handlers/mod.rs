//! Request handlers.

pub mod health;
pub mod info;
pub mod stream;

use tapeloop_core::Error;
use url::Url;

/// Check that `raw` is an absolute http(s) URL.
pub(crate) fn source_url(raw: Option<&str>) -> Result<String, Error> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::InvalidRequest("No URL provided".to_string()))?;
    let parsed =
        Url::parse(raw).map_err(|e| Error::InvalidRequest(format!("Invalid URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(raw.to_string()),
        other => Err(Error::InvalidRequest(format!(
            "Unsupported URL scheme: {other}"
        ))),
    }
}
