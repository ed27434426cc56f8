//! Track metadata handler.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tapeloop_core::TrackInfo;
use tracing::{info, warn};

use super::source_url;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InfoRequest {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub tracks: Vec<TrackInfo>,
}

/// `POST /info`. Lookup failures yield an empty track list, not an error.
pub async fn track_info(
    State(state): State<Arc<AppState>>,
    body: Result<Json<InfoRequest>, JsonRejection>,
) -> Result<Json<InfoResponse>, ApiError> {
    let requested = body.ok().and_then(|Json(request)| request.url);
    let url = source_url(requested.as_deref())?;

    let tracks = match state.fetcher.fetch_info(&url).await {
        Ok(tracks) => {
            info!(url = %url, tracks = tracks.len(), "Fetched track info");
            tracks
        }
        Err(e) => {
            warn!(url = %url, error = %e, "Track info lookup failed");
            Vec::new()
        }
    };
    Ok(Json(InfoResponse { tracks }))
}
