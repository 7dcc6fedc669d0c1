//! Per-request context carried through the pipeline

use std::net::{IpAddr, SocketAddr};

use axum::{
    body::Bytes,
    http::{HeaderMap, HeaderValue, Method, Uri, header},
};

use crate::auth::{AuthClaims, ClientIdentity};
use crate::middleware::{X_REQUEST_ID, client_ip};
use crate::routes::PathParams;

/// Everything the pipeline needs to know about one inbound request.
///
/// Built once by the proxy handler and owned by that request's task; stages
/// fill in `identity`, `claims`, `route` and `params` as they run.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub remote_addr: Option<SocketAddr>,
    /// Client address as resolved from the peer and trusted proxy headers
    pub client_addr: String,
    pub identity: Option<ClientIdentity>,
    pub claims: Option<AuthClaims>,
    /// Name of the matched route rule
    pub route: Option<String>,
    pub params: PathParams,
}

impl RequestContext {
    #[must_use] pub fn new(
        method: Method,
        uri: &Uri,
        headers: HeaderMap,
        body: Bytes,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        let request_id = headers
            .get(X_REQUEST_ID)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string);

        let client_addr = client_ip(&headers, remote_addr, &[]);

        Self {
            request_id,
            method,
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            headers,
            body,
            remote_addr,
            client_addr,
            identity: None,
            claims: None,
            route: None,
            params: PathParams::default(),
        }
    }

    /// Re-resolve the client address, believing forwarding headers from these peers
    #[must_use] pub fn with_trusted_proxies(mut self, trusted_proxies: &[IpAddr]) -> Self {
        self.client_addr = client_ip(&self.headers, self.remote_addr, trusted_proxies);
        self
    }

    /// Client address, used as identity on unauthenticated routes
    #[must_use] pub fn client_address(&self) -> &str {
        &self.client_addr
    }

    #[must_use] pub fn authorization(&self) -> Option<&HeaderValue> {
        self.headers.get(header::AUTHORIZATION)
    }
}
