//! Turns pipeline outcomes into client responses

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, header},
    response::{IntoResponse, Response},
};

use crate::context::RequestContext;
use crate::error::{GatewayError, GatewayResult};
use crate::forwarder::BackendResponse;
use crate::middleware::X_REQUEST_ID;

/// Stateless response translation
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseTranslator;

impl ResponseTranslator {
    /// Backend answers pass through with their status and body untouched;
    /// gateway errors render as the standard error envelope.
    #[must_use] pub fn translate(
        &self,
        outcome: GatewayResult<BackendResponse>,
        ctx: &RequestContext,
    ) -> Response {
        let mut response = match outcome {
            Ok(backend) => Self::passthrough(backend),
            Err(error) => error.into_response(),
        };

        if let Ok(request_id) = HeaderValue::from_str(&ctx.request_id) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(X_REQUEST_ID), request_id);
        }
        response
    }

    fn passthrough(backend: BackendResponse) -> Response {
        let content_type = backend
            .content_type
            .unwrap_or_else(|| HeaderValue::from_static("application/json"));

        let mut response = Response::new(Body::from(backend.body));
        *response.status_mut() = backend.status;
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, content_type);
        response
    }

    /// Error response for failures raised outside the pipeline
    #[must_use] pub fn error_response(&self, error: GatewayError, ctx: &RequestContext) -> Response {
        self.translate(Err(error), ctx)
    }
}
