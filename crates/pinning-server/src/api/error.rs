//! API error types and responses
//!
//! Errors map to plain-text responses: clients of the manifest API are
//! mobile TLS stacks that only care about the status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::storage::StorageError;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("file required")]
    FileRequired,

    #[error("file {0} not found")]
    FileNotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::FileRequired => StatusCode::BAD_REQUEST,
            ApiError::FileNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, self.to_string()).into_response()
    }
}

impl ApiError {
    /// Map a storage failure for `file`: a missing manifest is a 404,
    /// everything else surfaces as a 500 with the error message.
    pub fn from_storage(err: StorageError, file: &str) -> Self {
        match err {
            StorageError::NotFound(_) => ApiError::FileNotFound(file.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<pinning_core::PinningError> for ApiError {
    fn from(err: pinning_core::PinningError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
