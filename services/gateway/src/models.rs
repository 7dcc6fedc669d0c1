//! REST models owned by the gateway itself
//!
//! Backend payloads are never modelled here: they pass through as raw bytes.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Error response model
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Additional error details
    pub details: Option<FxHashMap<String, String>>,
}

/// Generic API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful
    pub success: bool,
    /// Response data (if successful)
    pub data: Option<T>,
    /// Error details (if failed)
    pub error: Option<ErrorResponse>,
    /// Response timestamp
    pub timestamp: i64,
}

impl<T> ApiResponse<T> {
    /// Create an error API response
    #[must_use] pub fn error(error: ErrorResponse) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Liveness payload served on `/health`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthCheckResponse {
    pub status: String,
}

impl HealthCheckResponse {
    #[must_use] pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// One documented route in the gateway catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteInfo {
    pub name: String,
    pub method: String,
    pub path: String,
    pub backend: String,
    pub requires_auth: bool,
    /// Human-readable quota, e.g. `10/60s`
    pub rate_limit: String,
}

/// Payload served on `/`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayInfo {
    pub name: String,
    pub version: String,
    pub routes: Vec<RouteInfo>,
}
