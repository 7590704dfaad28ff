use crate::ack::AckError;
use crate::coordinator::CoordinatorError;
use crate::routing::RelayError;
use crate::store::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Coordinator error: {0}")]
    CoordinatorError(#[from] CoordinatorError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::CoordinatorError(e) => coordinator_status(e),
        }
    }
}

fn store_status(e: &StoreError) -> (StatusCode, &'static str) {
    match e {
        StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "MESSAGE_NOT_FOUND"),
        StoreError::InvalidTransition { .. } => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
        StoreError::ExpiredMessage(_) => (StatusCode::CONFLICT, "MESSAGE_EXPIRED"),
        StoreError::Invalid(_) => (StatusCode::BAD_REQUEST, "INVALID_MESSAGE"),
    }
}

fn coordinator_status(e: &CoordinatorError) -> (StatusCode, &'static str) {
    match e {
        CoordinatorError::InvalidInput(_) | CoordinatorError::ModelError(_) => {
            (StatusCode::BAD_REQUEST, "INVALID_REQUEST")
        }
        CoordinatorError::MessageNotFound(_) => (StatusCode::NOT_FOUND, "MESSAGE_NOT_FOUND"),
        CoordinatorError::DeviceNotFound(_) => (StatusCode::NOT_FOUND, "DEVICE_NOT_FOUND"),
        CoordinatorError::StoreError(e) => store_status(e),
        CoordinatorError::AckError(AckError::Store(e)) => store_status(e),
        CoordinatorError::AckError(AckError::EmptyAcker) => {
            (StatusCode::BAD_REQUEST, "INVALID_REQUEST")
        }
        CoordinatorError::RelayError(RelayError::MessageNotFound(_)) => {
            (StatusCode::NOT_FOUND, "MESSAGE_NOT_FOUND")
        }
        CoordinatorError::RelayError(RelayError::NotHeld { .. }) => {
            (StatusCode::CONFLICT, "NOT_HELD")
        }
        CoordinatorError::RelayError(RelayError::Store(e)) => store_status(e),
        CoordinatorError::RelayError(_) | CoordinatorError::ArchiveError(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();
        let error_message = match &self {
            ApiError::CoordinatorError(e) => e.to_string(),
            ApiError::InvalidRequest(e) | ApiError::NotFound(e) => e.clone(),
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {error_message}");
        }

        let body = Json(json!({
            "error": error_message,
            "code": error_code,
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
