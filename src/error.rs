// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::storage::StoreError;

/// Failure taxonomy shared by the authentication and ledger services.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("credential has expired")]
    Expired,

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("no receipt for {tx_hash} within {waited_secs}s")]
    ConfirmationTimeout { tx_hash: String, waited_secs: u64 },

    #[error("ledger rejected transaction: {0}")]
    LedgerRejected(String),

    #[error("reconciliation mismatch: {0}")]
    ReconciliationMismatch(String),

    #[error("storage failure: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Unauthenticated(_) => "unauthenticated",
            ServiceError::Expired => "expired",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::Validation(_) => "validation_error",
            ServiceError::InvalidSignature(_) => "invalid_signature",
            ServiceError::LedgerUnavailable(_) => "ledger_unavailable",
            ServiceError::ConfirmationTimeout { .. } => "confirmation_timeout",
            ServiceError::LedgerRejected(_) => "ledger_rejected",
            ServiceError::ReconciliationMismatch(_) => "reconciliation_mismatch",
            ServiceError::Store(_) => "storage_error",
            ServiceError::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Unauthenticated(_)
            | ServiceError::Expired
            | ServiceError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::LedgerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::ConfirmationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::LedgerRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::ReconciliationMismatch(_)
            | ServiceError::Store(_)
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub error_code: Option<&'static str>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<&'static str>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            error_code: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let status = err.status_code();
        // Storage internals are logged, never echoed to clients
        let message = match &err {
            ServiceError::Store(inner) => {
                tracing::error!(error = %inner, "storage failure while serving request");
                "Internal storage error".to_string()
            }
            other => other.to_string(),
        };
        Self {
            status,
            message,
            error_code: Some(err.error_code()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ServiceError::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            error_code: self.error_code,
        });
        (self.status, body).into_response()
    }
}
