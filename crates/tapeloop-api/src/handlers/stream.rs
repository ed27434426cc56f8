//! Audio streaming handler.

use axum::{
    body::Body,
    extract::{Query, State, rejection::QueryRejection},
    http::{HeaderMap, header},
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use tapeloop_core::{AudioFormat, Error, FormatHint, Quality, SourceRequest};
use tapeloop_stream::Delivery;

use super::source_url;
use crate::error::ApiError;
use crate::middleware::X_CACHE;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub url: Option<String>,
    #[serde(default)]
    pub format: AudioFormat,
    #[serde(default)]
    pub quality: Quality,
    /// 1-based playlist item.
    pub index: Option<u32>,
}

impl StreamParams {
    fn into_request(self) -> Result<SourceRequest, Error> {
        let url = source_url(self.url.as_deref())?;
        let request =
            SourceRequest::new(url).with_hint(FormatHint::new(self.format, self.quality));
        match self.index {
            None => Ok(request),
            Some(0) => Err(Error::InvalidRequest(
                "Playlist index starts at 1".to_string(),
            )),
            Some(index) => Ok(request.with_playlist_index(index)),
        }
    }
}

/// `GET /stream`
pub async fn stream_audio(
    State(state): State<Arc<AppState>>,
    params: Result<Query<StreamParams>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let Query(params) =
        params.map_err(|e| Error::InvalidRequest(format!("Invalid query: {}", e.body_text())))?;
    let request = params.into_request()?;
    let range = headers
        .get(header::RANGE)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| Error::InvalidRange("Range header is not ASCII".to_string()))
        })
        .transpose()?;

    let delivery = state.router.route(&request, range).await?;
    Ok(delivery_response(delivery)?)
}

fn delivery_response(delivery: Delivery) -> Result<Response, Error> {
    let negotiation = delivery.negotiation;
    let mut builder = Response::builder()
        .status(negotiation.status_code())
        .header(header::CONTENT_TYPE, delivery.content_type)
        .header(X_CACHE, delivery.source.as_str());
    if let Some(length) = negotiation.content_length() {
        builder = builder.header(header::CONTENT_LENGTH, length);
    }
    if let Some(range) = negotiation.content_range() {
        builder = builder.header(header::CONTENT_RANGE, range);
    }
    if negotiation.length_known() {
        builder = builder.header(header::ACCEPT_RANGES, "bytes");
    }
    builder
        .body(Body::from_stream(delivery.body))
        .map_err(|e| Error::Internal(e.to_string()))
}
