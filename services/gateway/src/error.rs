//! Gateway error taxonomy and its HTTP rendering
//!
//! Every stage of the pipeline resolves its failures into one of these
//! variants; the variant alone decides the status code and error code the
//! client sees. A backend that answers with an error status is *not* a
//! gateway error: that response is passed through by the translator.

use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::models::{ApiResponse, ErrorResponse};

/// Result alias used across the pipeline
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// No `Authorization` header, or one not of the form `Bearer <token>`
    #[error("authorization header missing or malformed")]
    MissingOrMalformedCredential,

    /// Token failed decoding or signature/claim verification
    #[error("invalid credential: {reason}")]
    InvalidCredential { reason: String },

    /// Token verified but its `exp` is in the past
    #[error("credential has expired")]
    ExpiredCredential,

    #[error("rate limit of {limit} per {window:?} exceeded on route {route}")]
    QuotaExceeded {
        route: String,
        limit: u64,
        window: Duration,
        retry_after: Duration,
    },

    #[error("no route matches {method} {path}")]
    RouteNotFound { method: String, path: String },

    /// Transport-level failure talking to a backend (refused, DNS, timeout)
    #[error("{backend} is unreachable: {cause}")]
    BackendUnreachable {
        backend: String,
        cause: String,
        timed_out: bool,
    },

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal gateway error: {0}")]
    Internal(String),
}

impl GatewayError {
    #[must_use] pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingOrMalformedCredential
            | Self::InvalidCredential { .. }
            | Self::ExpiredCredential => StatusCode::UNAUTHORIZED,
            Self::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::BackendUnreachable { .. } => StatusCode::BAD_GATEWAY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Config(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable code placed in the error envelope
    #[must_use] pub const fn error_code(&self) -> &'static str {
        match self {
            Self::MissingOrMalformedCredential => "missing_credential",
            Self::InvalidCredential { .. } => "invalid_credential",
            Self::ExpiredCredential => "expired_credential",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::RouteNotFound { .. } => "route_not_found",
            Self::BackendUnreachable { .. } => "backend_unreachable",
            Self::BadRequest(_) => "invalid_request",
            Self::Config(_) | Self::Internal(_) => "internal_error",
        }
    }

    /// Message shown to the client. Internal causes and token verification
    /// details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            Self::MissingOrMalformedCredential => {
                "Authorization header missing or invalid".to_string()
            }
            Self::InvalidCredential { .. } => "Invalid token".to_string(),
            Self::ExpiredCredential => "Token has expired".to_string(),
            Self::QuotaExceeded { .. } => "Too many requests - rate limit exceeded".to_string(),
            Self::RouteNotFound { method, path } => format!("No route for {method} {path}"),
            Self::BackendUnreachable {
                backend, timed_out, ..
            } => {
                if *timed_out {
                    format!("{backend} did not respond in time")
                } else {
                    format!("{backend} is unreachable")
                }
            }
            Self::BadRequest(detail) => detail.clone(),
            Self::Config(_) | Self::Internal(_) => "Internal gateway error".to_string(),
        }
    }

    fn details(&self) -> Option<FxHashMap<String, String>> {
        match self {
            Self::QuotaExceeded {
                route,
                limit,
                window,
                retry_after,
            } => Some(
                [
                    ("route".to_string(), route.clone()),
                    ("limit".to_string(), limit.to_string()),
                    ("window_seconds".to_string(), window.as_secs().to_string()),
                    (
                        "retry_after_seconds".to_string(),
                        retry_after_secs(*retry_after).to_string(),
                    ),
                ]
                .into_iter()
                .collect(),
            ),
            Self::BackendUnreachable { backend, .. } => {
                Some([("backend".to_string(), backend.clone())].into_iter().collect())
            }
            _ => None,
        }
    }
}

/// Whole seconds for `Retry-After`, never zero while still limited
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 { secs + 1 } else { secs.max(1) }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ApiResponse::<()>::error(ErrorResponse {
            error: self.error_code().to_string(),
            message: self.public_message(),
            details: self.details(),
        });

        let mut response = (status, Json(body)).into_response();
        if let Self::QuotaExceeded { retry_after, .. } = &self {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after_secs(*retry_after)),
            );
        }
        response
    }
}

impl From<config::ConfigError> for GatewayError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
