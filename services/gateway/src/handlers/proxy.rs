//! Fallback handler feeding every non-gateway request into the pipeline

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    response::Response,
};
use tracing::warn;

use crate::context::RequestContext;
use crate::error::GatewayError;
use crate::server::AppState;
use crate::translator::ResponseTranslator;

/// Buffer the request, build its context and run the pipeline.
///
/// Dropping this future (client disconnect) drops the in-flight backend call.
pub async fn proxy(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> Response {
    let remote_addr = connect_info.map(|ConnectInfo(addr)| addr);
    let (parts, body) = request.into_parts();

    match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(body) => {
            let ctx = RequestContext::new(parts.method, &parts.uri, parts.headers, body, remote_addr)
                .with_trusted_proxies(&state.trusted_proxies);
            state.pipeline.handle(ctx).await
        }
        Err(e) => {
            let ctx = RequestContext::new(
                parts.method,
                &parts.uri,
                parts.headers,
                axum::body::Bytes::new(),
                remote_addr,
            )
            .with_trusted_proxies(&state.trusted_proxies);
            warn!(path = %ctx.path, request_id = %ctx.request_id, error = %e, "Failed to read request body");
            ResponseTranslator.error_response(
                GatewayError::BadRequest(format!(
                    "request body is unreadable or exceeds {} bytes",
                    state.max_body_size
                )),
                &ctx,
            )
        }
    }
}
