//! Mapping of ledger errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

use depot_common::{DepotError, ErrorKind};

/// A ledger error leaving through the HTTP surface.
#[derive(Debug)]
pub struct ApiError(pub DepotError);

impl From<DepotError> for ApiError {
    fn from(err: DepotError) -> Self {
        Self(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl ApiError {
    /// Status code for the error's kind.
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self.0.kind() {
            ErrorKind::Internal => {
                error!(error = %self.0, code = self.0.error_code(), "Request failed");
                // Driver details stay in the log.
                "Internal error".to_string()
            }
            ErrorKind::Transient => {
                warn!(error = %self.0, "Request gave up after retries");
                self.0.to_string()
            }
            _ => self.0.to_string(),
        };

        let body = ErrorBody {
            error: self.0.error_code(),
            message,
        };
        (status, Json(body)).into_response()
    }
}
