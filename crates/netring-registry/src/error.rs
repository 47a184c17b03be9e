use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("member not found")]
    MemberNotFound,
    #[error("member deregistered")]
    MemberGone,
    #[error("admin endpoints disabled")]
    AdminDisabled,
    #[error("store unavailable")]
    StoreRead(#[source] anyhow::Error),
    #[error("store write failed")]
    StoreWrite(#[source] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::MemberNotFound => StatusCode::NOT_FOUND,
            ApiError::MemberGone => StatusCode::GONE,
            ApiError::AdminDisabled => StatusCode::FORBIDDEN,
            ApiError::StoreRead(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::StoreWrite(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        if status == StatusCode::SERVICE_UNAVAILABLE {
            (status, [(header::RETRY_AFTER, "5")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}
