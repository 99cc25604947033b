//! The closed error enum for user-visible failures (spec.md §7), mapped to
//! HTTP status codes at the boundary only — following the teacher's
//! `FacilitatorLocalError` + `impl IntoResponse` pattern in `handlers.rs`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation failed for field '{field}': {value} ({context})")]
    Validation {
        field: String,
        value: String,
        context: String,
    },
    #[error("signature is invalid")]
    SignatureInvalid,
    #[error("signer is not authorized to spend from vault {0}")]
    Unauthorized(i64),
    #[error("signer controls no vault")]
    NoVault,
    #[error("signer controls more than one vault; `from` must be supplied")]
    AmbiguousVault,
    #[error("vault {0} does not exist on-chain")]
    UnknownVault(i64),
    #[error("insufficient balance for vault {vault} token {token}: have {have}, need {need}")]
    InsufficientBalance {
        vault: i64,
        token: String,
        have: String,
        need: String,
    },
    #[error("intention expired at {0}")]
    IntentionExpired(i64),
    #[error("name '{0}' could not be resolved")]
    NameUnresolved(String),
    #[error("intention spans more than one source vault")]
    MultiSourceUnsupported,
    #[error("insufficient deposit remaining to satisfy input of {0}")]
    DepositInsufficient(String),
    #[error("pending queue is full")]
    QueueFull,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<crate::validator::ValidationError> for AppError {
    fn from(e: crate::validator::ValidationError) -> Self {
        AppError::Validation {
            field: e.field,
            value: e.value,
            context: e.context,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Internal(format!("store error: {e}"))
    }
}

impl From<crate::store::StoreError> for AppError {
    fn from(e: crate::store::StoreError) -> Self {
        AppError::Internal(format!("store error: {e}"))
    }
}

impl From<crate::name_resolver::NameResolverError> for AppError {
    fn from(e: crate::name_resolver::NameResolverError) -> Self {
        AppError::Internal(format!("name resolver error: {e}"))
    }
}

impl From<crate::chain_gateway::ChainGatewayError> for AppError {
    fn from(e: crate::chain_gateway::ChainGatewayError) -> Self {
        AppError::Internal(format!("chain gateway error: {e}"))
    }
}

#[derive(Serialize)]
struct ErrorPayload {
    status: u16,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, details) = match &self {
            AppError::Validation { .. } => (StatusCode::BAD_REQUEST, None),
            AppError::SignatureInvalid => (StatusCode::UNAUTHORIZED, None),
            AppError::Unauthorized(_) => (StatusCode::FORBIDDEN, None),
            AppError::NoVault | AppError::AmbiguousVault => (StatusCode::UNAUTHORIZED, None),
            AppError::UnknownVault(_) => (StatusCode::BAD_REQUEST, None),
            AppError::InsufficientBalance { .. } => (StatusCode::BAD_REQUEST, None),
            AppError::IntentionExpired(_) => (StatusCode::BAD_REQUEST, None),
            AppError::NameUnresolved(_) => (StatusCode::BAD_REQUEST, None),
            AppError::MultiSourceUnsupported => (StatusCode::BAD_REQUEST, None),
            AppError::DepositInsufficient(_) => (StatusCode::BAD_REQUEST, None),
            AppError::QueueFull => (StatusCode::TOO_MANY_REQUESTS, None),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, Some(msg.clone())),
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal error");
        } else {
            tracing::warn!(error = %self, "rejected submission");
        }
        let payload = ErrorPayload {
            status: status.as_u16(),
            error: self.to_string(),
            details,
        };
        (status, Json(payload)).into_response()
    }
}
