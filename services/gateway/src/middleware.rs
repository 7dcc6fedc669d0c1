//! Cross-cutting HTTP middleware: request ids, request logging, CORS

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::CorsConfig;

/// Correlation header propagated to backends and echoed to clients
pub const X_REQUEST_ID: &str = "x-request-id";
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Ensure every request carries an `X-Request-Id` and every response echoes it
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = match request
        .headers()
        .get(X_REQUEST_ID)
        .filter(|value| !value.is_empty())
    {
        Some(value) => value.clone(),
        None => {
            let generated = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string());
            match generated {
                Ok(value) => {
                    request
                        .headers_mut()
                        .insert(HeaderName::from_static(X_REQUEST_ID), value.clone());
                    value
                }
                Err(_) => return next.run(request).await,
            }
        }
    };

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .entry(HeaderName::from_static(X_REQUEST_ID))
        .or_insert(request_id);
    response
}

/// Request logging middleware
pub async fn logging_middleware(
    State(trusted_proxies): State<Arc<[IpAddr]>>,
    request: Request,
    next: Next,
) -> Response {
    let start = std::time::Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_ip = client_ip(request.headers(), remote, &trusted_proxies);
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    info!(
        method = %method,
        path = %path,
        status = %status,
        duration_ms = duration.as_millis(),
        client_ip = %client_ip,
        request_id = %request_id,
        "Request processed"
    );

    response
}

/// CORS layer factory
pub fn create_cors_layer(config: &CorsConfig) -> CorsLayer {
    let mut cors = CorsLayer::new().max_age(std::time::Duration::from_secs(config.max_age_seconds));

    // Configure allowed origins
    let wildcard = config.allowed_origins.iter().any(|origin| origin == "*");
    if wildcard {
        cors = cors.allow_origin(tower_http::cors::Any);
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect();
        cors = cors.allow_origin(origins);
    }

    if config.allow_credentials {
        if wildcard {
            warn!("CORS credentials cannot be combined with a wildcard origin; ignoring allow_credentials");
        } else {
            cors = cors.allow_credentials(true);
        }
    }

    // Configure allowed methods
    let methods: Result<Vec<Method>, _> = config
        .allowed_methods
        .iter()
        .map(|method| method.parse())
        .collect();

    if let Ok(methods) = methods {
        cors = cors.allow_methods(methods);
    }

    // Configure allowed headers
    let headers: Result<Vec<HeaderName>, _> = config
        .allowed_headers
        .iter()
        .map(|header| header.parse())
        .collect();

    if let Ok(headers) = headers {
        cors = cors.allow_headers(headers);
    }

    cors
}

/// Address of the client behind this request.
///
/// Forwarding headers are only believed when the socket peer is one of
/// `trusted_proxies`; anyone else could rotate them to look like a new client.
/// `X-Forwarded-For` is read right to left, skipping our own proxies.
#[must_use] pub fn client_ip(
    headers: &HeaderMap,
    remote_addr: Option<SocketAddr>,
    trusted_proxies: &[IpAddr],
) -> String {
    let Some(peer) = remote_addr.map(|addr| addr.ip()) else {
        return "unknown".to_string();
    };
    if !trusted_proxies.contains(&peer) {
        return peer.to_string();
    }

    let forwarded_for = headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .rsplit(',')
                .filter_map(|hop| hop.trim().parse::<IpAddr>().ok())
                .find(|hop| !trusted_proxies.contains(hop))
        });
    if let Some(ip) = forwarded_for {
        return ip.to_string();
    }

    let real_ip = headers
        .get(X_REAL_IP)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<IpAddr>().ok());
    real_ip.unwrap_or(peer).to_string()
}
