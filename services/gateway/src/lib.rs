//! Recipe API Gateway
//!
//! Single HTTP entry point in front of the user and recipe services.
//! Features:
//! - Bearer JWT authentication
//! - Per-client, per-route fixed-window rate limiting
//! - Static route table with path rewriting
//! - Transparent forwarding with backend responses passed through
//! - Request ids, structured logging and Prometheus metrics

#![allow(missing_docs)]

use anyhow::Result;

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod forwarder;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod pipeline;
pub mod rate_limiter;
pub mod router;
pub mod routes;
pub mod server;
pub mod translator;

pub use auth::{AuthClaims, AuthGate, ClientIdentity};
pub use config::{
    AuthConfig, BackendConfig, CorsConfig, GatewayConfig, MonitoringConfig, RateLimitConfig,
    RouteConfig, ServerConfig, ServiceEndpoints,
};
pub use error::{GatewayError, GatewayResult};
pub use pipeline::GatewayPipeline;
pub use rate_limiter::{InMemoryStore, RateLimiter, RateLimiterStore};
pub use routes::{BackendId, RateLimitDescriptor, RouteRule, RouteTable};
pub use server::ApiGatewayServer;

/// Start the API Gateway server
pub async fn start_server(config: GatewayConfig) -> Result<()> {
    let server = ApiGatewayServer::new(config)?;
    server.start().await
}
