use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use thiserror::Error;

use fidelis_core::FidelisError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] FidelisError),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::Engine(err) => err.code(),
            ApiError::BadRequest(_) => "validation-input",
        }
    }

    fn status(&self) -> StatusCode {
        match self.code() {
            "validation-input" => StatusCode::BAD_REQUEST,
            "auth" => StatusCode::UNAUTHORIZED,
            "not-found" => StatusCode::NOT_FOUND,
            "conflict" => StatusCode::CONFLICT,
            "overloaded" => StatusCode::SERVICE_UNAVAILABLE,
            "provider-unavailable" => StatusCode::BAD_GATEWAY,
            "deadline-exceeded" | "budget-exhausted" => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Sanitized client-facing message; internal errors never leak detail.
    fn message(&self) -> String {
        match self {
            ApiError::Engine(err) if err.code() == "internal" => {
                "internal error; see server logs".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// The wire error envelope carries a correlation request id when the
/// handler has one.
pub struct ErrorEnvelope {
    pub error: ApiError,
    pub request_id: Option<String>,
}

impl IntoResponse for ErrorEnvelope {
    fn into_response(self) -> Response {
        let status = self.error.status();
        let body = Json(json!({
            "error": {
                "code": self.error.code(),
                "message": self.error.message(),
                "request_id": self.request_id,
                "timestamp": Utc::now().to_rfc3339(),
            }
        }));
        (status, body).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        ErrorEnvelope {
            error: self,
            request_id: None,
        }
        .into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
