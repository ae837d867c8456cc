//! HTTP-facing error mapping.
//!
//! Every rejection reaches the caller as a JSON `{"error": ...}` body with
//! the specific reason string; only internal failures are masked behind a
//! generic message (the detail goes to the log).

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::auth::AuthError;
use crate::engine::{RedeemError, RejectReason};
use crate::model::VoucherError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Auth(#[from] AuthError),

    #[error("{0}")]
    Voucher(#[from] VoucherError),

    #[error("{0}")]
    Redeem(#[from] RedeemError),

    /// CRUD lookup miss.
    #[error("Voucher not found")]
    NotFound,

    #[error("Internal server error")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
    pub fn internal(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        ApiError::Internal(Box::new(source))
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::Voucher(_) => StatusCode::BAD_REQUEST,
            ApiError::Redeem(RedeemError::Rejected(reason)) => match reason {
                RejectReason::NotFound => StatusCode::NOT_FOUND,
                RejectReason::CustomerMismatch => StatusCode::FORBIDDEN,
                _ => StatusCode::BAD_REQUEST,
            },
            ApiError::Redeem(RedeemError::Contended) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(source) = &self {
            // log the detail, never return it
            error!(error = %source, "request failed");
        }
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
