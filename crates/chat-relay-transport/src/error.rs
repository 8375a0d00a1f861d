//! HTTP error boundary.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chat_relay_core::InvalidSessionId;
use chat_relay_session::{ErrorKind, RelayError};
use serde::Serialize;

/// Relay error as an HTTP response.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub RelayError);

impl From<InvalidSessionId> for ApiError {
    fn from(err: InvalidSessionId) -> Self {
        Self(err.into())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorKind,
    message: String,
}

impl ApiError {
    /// HTTP status for the wrapped error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::NotReady => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::ProviderError => StatusCode::BAD_GATEWAY,
            ErrorKind::PersistenceError | ErrorKind::Configuration => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = ErrorBody {
            error: self.0.kind(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_relay_core::{ClientError, SessionId, StorageError};

    #[test]
    fn test_status_mapping() {
        let id = SessionId::parse("a").unwrap();
        let cases = [
            (RelayError::NotReady(id.clone()), StatusCode::CONFLICT),
            (RelayError::NotFound(id), StatusCode::NOT_FOUND),
            (
                RelayError::InvalidRequest("empty".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                RelayError::Provider(ClientError::Closed),
                StatusCode::BAD_GATEWAY,
            ),
            (
                RelayError::Persistence(StorageError::Internal("disk".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }

    #[tokio::test]
    async fn test_body_carries_kind() {
        let response = ApiError(RelayError::InvalidRequest("empty body".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"], "invalid_request");
        assert!(json["message"].as_str().unwrap().contains("empty body"));
    }
}
