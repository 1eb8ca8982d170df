use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use jobbox_core::protocol::ProtocolError;
use jobbox_core::InvalidIdentifier;
use jobbox_storage::{JobError, UserError};

use crate::problem::ProblemResponse;
use crate::telemetry;

/// Errors surfaced to HTTP clients, each with a status code and a stable kind.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    InvalidIdentifier(#[from] InvalidIdentifier),
    #[error("{0}")]
    ValidationFailed(String),
    #[error("{0}")]
    AmbiguousQuery(String),
    #[error("{0}")]
    StoreUnavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidIdentifier(_) => "invalid_identifier",
            Self::ValidationFailed(_) => "validation_failed",
            Self::AmbiguousQuery(_) => "ambiguous_query",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidIdentifier(_) | Self::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            Self::AmbiguousQuery(_) => StatusCode::CONFLICT,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn store_failure(unavailable: bool, err: &dyn std::error::Error) -> Self {
        let kind = if unavailable { "unavailable" } else { "internal" };
        telemetry::record_store_error(kind);
        error!(stage = "storage", error = %err, unavailable, "store operation failed");
        if unavailable {
            Self::StoreUnavailable("document store is unavailable".to_string())
        } else {
            Self::Internal("document store operation failed".to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        ProblemResponse::new(self.status(), self.kind(), self.to_string()).into_response()
    }
}

impl From<ProtocolError> for ApiError {
    fn from(err: ProtocolError) -> Self {
        Self::ValidationFailed(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::ValidationFailed(rejection.body_text())
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound => Self::NotFound("job not found".to_string()),
            JobError::QueryNotFound => Self::NotFound(err.to_string()),
            JobError::AmbiguousQuestion(_) => Self::AmbiguousQuery(format!(
                "{err}; reply by 'queryId' to pick one"
            )),
            JobError::Codec(_) | JobError::Database(_) => {
                Self::store_failure(err.is_unavailable(), &err)
            }
        }
    }
}

impl From<UserError> for ApiError {
    fn from(err: UserError) -> Self {
        Self::store_failure(err.is_unavailable(), &err)
    }
}
