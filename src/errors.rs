//! Typed error surface shared by the scheduler, store, and HTTP layer.
//!
//! `Error` is the only error type crossing the HTTP boundary — everything
//! else (importer, config loading) returns `anyhow::Result` and is adapted
//! at the edge.

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    /// Logged at `warn` and swallowed at the call site — never crosses the
    /// HTTP boundary. Kept as a variant so every failure mode of the
    /// request log has a name, per the error taxonomy.
    #[error("request log persist failed: {0}")]
    LogPersistFailure(String),

    #[error("request log load failed: {0}")]
    LogLoadFailure(String),
}

impl Error {
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidRequest {
            message: message.into(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Error::InvalidRequest { message } => (
                StatusCode::BAD_REQUEST,
                json!({ "status": "fail", "error": message }),
            ),
            Error::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "status": "fail", "error": "unauthorized" }),
            ),
            Error::StoreUnavailable(e) => {
                tracing::error!(err = %e, "store unavailable");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "status": "fail", "error": "store unavailable" }),
                )
            }
            Error::LogPersistFailure(e) | Error::LogLoadFailure(e) => {
                // Never actually constructed on the HTTP path — these are
                // logged and swallowed where they occur — but the enum
                // stays exhaustive for IntoResponse.
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "status": "fail", "error": e }),
                )
            }
        };

        let mut resp = (status, Json(body)).into_response();
        if matches!(self, Error::Unauthorized) {
            resp.headers_mut().insert(
                axum::http::header::WWW_AUTHENTICATE,
                HeaderValue::from_static(r#"Basic realm="pogoAccountServer""#),
            );
        }
        resp
    }
}

pub type Result<T> = std::result::Result<T, Error>;
