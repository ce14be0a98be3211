//! Error taxonomy shared by the store, the inference client and the handlers.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::error;
use serde::Serialize;
use thiserror::Error;

/// Input rejected at the boundary, before any side effect.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Conversation ID cannot be empty")]
    EmptyConversationId,
    #[error("Message content cannot be empty")]
    EmptyContent,
    #[error("Message content exceeds maximum length of {max} characters")]
    ContentTooLong { max: usize },
    #[error("Invalid role '{0}'. Must be one of: user, assistant, system")]
    InvalidRole(String),
    #[error("Invalid timestamp format. Must be ISO8601 format")]
    InvalidTimestamp,
    #[error("Additional metadata cannot contain reserved key '{0}'")]
    ReservedMetadataKey(String),
    #[error("Metadata value for '{0}' must be a string, number or boolean")]
    InvalidMetadataValue(String),
    #[error("Search query cannot be empty")]
    EmptyQuery,
    #[error("n_results must be a positive integer")]
    InvalidResultCount,
    #[error("max_tokens must be a positive integer")]
    InvalidMaxTokens,
    #[error("temperature must be between 0 and 2")]
    InvalidTemperature,
    #[error("{0}")]
    MalformedBody(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("vector store unavailable: {0}")]
    Unavailable(String),
    #[error("store operation failed: {0}")]
    Backend(String),
    #[error("stored record {id} is invalid: {reason}")]
    CorruptRecord { id: String, reason: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("AI service is not running. Please start the inference service at {0}")]
    Unavailable(String),
    #[error("AI service request timed out")]
    TimedOut,
    #[error("AI service responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Error communicating with AI service: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for InferenceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            InferenceError::TimedOut
        } else if e.is_connect() {
            InferenceError::Unavailable(
                e.url()
                    .map(|url| url.to_string())
                    .unwrap_or_else(|| "the configured URL".to_owned()),
            )
        } else {
            InferenceError::Transport(e.to_string())
        }
    }
}

impl From<std::io::Error> for InferenceError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => InferenceError::TimedOut,
            _ => InferenceError::Transport(e.to_string()),
        }
    }
}

/// Error type returned by every handler.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Validation(v) => ServiceError::Validation(v),
            StoreError::Unavailable(_) => ServiceError::Unavailable(e.to_string()),
            StoreError::Backend(_) | StoreError::CorruptRecord { .. } => {
                ServiceError::Internal(e.to_string())
            }
        }
    }
}

impl From<InferenceError> for ServiceError {
    fn from(e: InferenceError) -> Self {
        // every inference failure is an upstream failure from the caller's view
        ServiceError::Unavailable(e.to_string())
    }
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub status: &'static str,
    pub message: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("{self}");
        }

        (
            status,
            Json(ErrorBody {
                status: "error",
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_maps_to_bad_request() {
        let err: ServiceError = StoreError::from(ValidationError::EmptyContent).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Message content cannot be empty");
    }

    #[test]
    fn test_unreachable_store_maps_to_service_unavailable() {
        let err: ServiceError = StoreError::Unavailable("connection refused".into()).into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_corrupt_record_maps_to_internal() {
        let err: ServiceError = StoreError::CorruptRecord {
            id: "msg_1".into(),
            reason: "unknown role".into(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_inference_timeout_message() {
        let err: ServiceError = InferenceError::TimedOut.into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.to_string(), "AI service request timed out");
    }
}
