//! Outbound HTTP calls to backend services

use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
};
use tracing::{debug, error};

use crate::context::RequestContext;
use crate::error::{GatewayError, GatewayResult};
use crate::metrics;
use crate::middleware::X_REQUEST_ID;
use crate::router::ResolvedTarget;

/// What a backend answered
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

/// HTTP client shared by all requests
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    pub fn new() -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("recipe-gateway/", env!("CARGO_PKG_VERSION")))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Headers sent to the backend for this request
    #[must_use] pub fn outbound_headers(ctx: &RequestContext, target: &ResolvedTarget) -> HeaderMap {
        let mut headers = HeaderMap::new();
        // Everything else, hop-by-hop headers and cookies included, stays at the edge
        for name in [header::CONTENT_TYPE, header::ACCEPT, header::ACCEPT_LANGUAGE] {
            if let Some(value) = ctx.headers.get(&name) {
                headers.insert(name, value.clone());
            }
        }
        if let Ok(request_id) = HeaderValue::from_str(&ctx.request_id) {
            headers.insert(HeaderName::from_static(X_REQUEST_ID), request_id);
        }
        if target.forward_authorization {
            if let Some(authorization) = ctx.authorization() {
                headers.insert(header::AUTHORIZATION, authorization.clone());
            }
        }
        headers
    }

    /// Send the request to its backend and collect the full response.
    ///
    /// Any status the backend returns is a successful forward; only transport
    /// failures (refused, DNS, timeout, broken body) become errors.
    pub async fn forward(
        &self,
        ctx: &RequestContext,
        target: &ResolvedTarget,
    ) -> GatewayResult<BackendResponse> {
        let backend = target.backend.name();
        let start = Instant::now();

        debug!(
            backend,
            url = %target.url,
            method = %ctx.method,
            request_id = %ctx.request_id,
            "Forwarding request"
        );

        let mut request = self
            .client
            .request(ctx.method.clone(), target.url.clone())
            .headers(Self::outbound_headers(ctx, target))
            .timeout(target.backend.timeout);
        if !ctx.body.is_empty() {
            request = request.body(ctx.body.clone());
        }

        let result = match request.send().await {
            Ok(response) => {
                let status = response.status();
                let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
                response.bytes().await.map(|body| (status, content_type, body))
            }
            Err(e) => Err(e),
        };
        let elapsed = start.elapsed();

        match result {
            Ok((status, content_type, body)) => {
                metrics::record_backend_call(backend, status.as_str(), elapsed);
                debug!(
                    backend,
                    status = %status,
                    elapsed_ms = elapsed.as_millis(),
                    "Backend responded"
                );
                Ok(BackendResponse {
                    status,
                    content_type,
                    body,
                })
            }
            Err(e) => {
                let timed_out = e.is_timeout();
                metrics::record_backend_call(
                    backend,
                    if timed_out { "timeout" } else { "error" },
                    elapsed,
                );
                let cause = error_chain(&e);
                error!(
                    backend,
                    url = %target.url,
                    timed_out,
                    elapsed_ms = elapsed.as_millis(),
                    request_id = %ctx.request_id,
                    error = %cause,
                    "Backend call failed"
                );
                Err(GatewayError::BackendUnreachable {
                    backend: backend.to_string(),
                    cause,
                    timed_out,
                })
            }
        }
    }
}

/// Render an error with all of its sources, outermost first
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
