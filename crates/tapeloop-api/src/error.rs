//! Mapping from domain errors to HTTP responses.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tapeloop_core::Error;
use tracing::{debug, error, warn};

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// A domain error on its way out as a JSON `{ "error": ... }` response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidRequest(_) | Error::InvalidRange(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyWriting(_) => StatusCode::CONFLICT,
            Error::RangeUnsatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            Error::LaunchFailure(_) | Error::FetchFailed { .. } | Error::EmptyResult => {
                StatusCode::BAD_GATEWAY
            }
            Error::RangeNotYetAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::FetchStalled { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            if self.0.is_fetch_failure() {
                warn!(status = status.as_u16(), error = %self.0, "Fetch failed");
            } else {
                error!(status = status.as_u16(), error = %self.0, "Request failed");
            }
        } else {
            debug!(status = status.as_u16(), error = %self.0, "Request rejected");
        }

        let mut response = (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response();

        match &self.0 {
            Error::RangeUnsatisfiable {
                length: Some(length),
            } => {
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{length}")) {
                    response.headers_mut().insert(header::CONTENT_RANGE, value);
                }
            }
            Error::RangeNotYetAvailable { .. } => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
            }
            _ => {}
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::InvalidRequest("x".into()), 400),
            (Error::InvalidRange("x".into()), 400),
            (Error::NotFound("k".into()), 404),
            (Error::AlreadyWriting("k".into()), 409),
            (Error::RangeUnsatisfiable { length: None }, 416),
            (Error::LaunchFailure("x".into()), 502),
            (
                Error::FetchFailed {
                    exit_code: 1,
                    message: "x".into(),
                },
                502,
            ),
            (Error::EmptyResult, 502),
            (Error::RangeNotYetAvailable { available: 3 }, 503),
            (Error::FetchStalled { seconds: 30 }, 504),
            (Error::Internal("x".into()), 500),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).status().as_u16(), expected);
        }
    }

    #[test]
    fn test_unsatisfiable_carries_content_range() {
        let response = ApiError(Error::RangeUnsatisfiable { length: Some(1000) }).into_response();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */1000");
    }

    #[test]
    fn test_not_yet_available_sets_retry_after() {
        let response = ApiError(Error::RangeNotYetAvailable { available: 10 }).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }
}
