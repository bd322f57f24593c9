// src/error.rs
// Central error taxonomy (§7). Every component returns a narrow error type;
// this enum is what the HTTP boundary actually translates to a response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("policy denied: {reason}")]
    PolicyDenied {
        reason: String,
        matched_pattern: Option<String>,
    },

    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("canceled")]
    Canceled,

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::Unauthenticated => "UNAUTHENTICATED",
            AppError::Forbidden => "FORBIDDEN",
            AppError::NotFound => "NOT_FOUND",
            AppError::InvalidArgument(_) => "INVALID_ARGUMENT",
            AppError::PolicyDenied { .. } => "POLICY_DENIED",
            AppError::UpstreamFailure(_) => "UPSTREAM_FAILURE",
            AppError::Canceled => "CANCELED",
            AppError::Internal(_) => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            AppError::PolicyDenied { .. } => StatusCode::FORBIDDEN,
            AppError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            // 499 is non-standard but widely used for client-closed-request; axum
            // will happily emit it via StatusCode::from_u16.
            AppError::Canceled => StatusCode::from_u16(499).unwrap(),
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: String,
    code: String,
    #[serde(rename = "statusCode")]
    status_code: u16,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none", rename = "denialReason")]
    denial_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "matchedPattern")]
    matched_pattern: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Internal(ref err) = self {
            tracing::error!(error = %err, "internal error");
        }
        let status = self.status();
        let envelope = ErrorEnvelope {
            error: self.to_string(),
            code: self.code().to_string(),
            status_code: status.as_u16(),
            timestamp: Utc::now().to_rfc3339(),
            denial_reason: match &self {
                AppError::PolicyDenied { reason, .. } => Some(reason.clone()),
                _ => None,
            },
            matched_pattern: match &self {
                AppError::PolicyDenied { matched_pattern, .. } => matched_pattern.clone(),
                _ => None,
            },
        };
        (status, Json(envelope)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => AppError::NotFound,
            other => AppError::Internal(anyhow::anyhow!(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_denied_carries_reason_and_pattern() {
        let err = AppError::PolicyDenied {
            reason: "Matches denied pattern".into(),
            matched_pattern: Some("^rm.*".into()),
        };
        assert_eq!(err.code(), "POLICY_DENIED");
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn not_found_maps_to_404() {
        assert_eq!(AppError::NotFound.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn canceled_maps_to_499() {
        assert_eq!(AppError::Canceled.status().as_u16(), 499);
    }
}
