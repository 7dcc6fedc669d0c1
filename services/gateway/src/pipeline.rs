//! Request pipeline: authenticate, rate limit, route, forward, translate
//!
//! Each stage either hands the request on or short-circuits with a
//! [`GatewayError`]; a short-circuited request never reaches a backend.

use std::sync::Arc;
use std::time::Instant;

use axum::response::Response;
use tracing::{error, warn};

use crate::auth::AuthGate;
use crate::config::GatewayConfig;
use crate::context::RequestContext;
use crate::error::{GatewayError, GatewayResult};
use crate::forwarder::{BackendResponse, Forwarder};
use crate::metrics;
use crate::rate_limiter::RateLimiter;
use crate::router::RequestRouter;
use crate::translator::ResponseTranslator;

/// Route name used in metrics for requests that match no rule
const UNMATCHED_ROUTE: &str = "unmatched";

/// The gateway request pipeline, shared by all request tasks
#[derive(Debug)]
pub struct GatewayPipeline {
    auth: AuthGate,
    limiter: Arc<RateLimiter>,
    router: RequestRouter,
    forwarder: Forwarder,
    translator: ResponseTranslator,
}

impl GatewayPipeline {
    pub fn new(config: &GatewayConfig) -> GatewayResult<Self> {
        Self::with_limiter(config, Arc::new(RateLimiter::new(&config.rate_limiting)))
    }

    /// Build the pipeline around an existing limiter
    pub fn with_limiter(config: &GatewayConfig, limiter: Arc<RateLimiter>) -> GatewayResult<Self> {
        let metrics_path = config
            .monitoring
            .metrics_enabled
            .then_some(config.monitoring.metrics_path.as_str());

        Ok(Self {
            auth: AuthGate::new(&config.auth, metrics_path)?,
            limiter,
            router: RequestRouter::new(config.route_table()?, &config.services)?,
            forwarder: Forwarder::new()?,
            translator: ResponseTranslator,
        })
    }

    #[must_use] pub const fn router(&self) -> &RequestRouter {
        &self.router
    }

    #[must_use] pub const fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Run one request through every stage and render the result
    pub async fn handle(&self, mut ctx: RequestContext) -> Response {
        let start = Instant::now();
        let outcome = self.process(&mut ctx).await;

        if let Err(error) = &outcome {
            match error {
                GatewayError::MissingOrMalformedCredential
                | GatewayError::InvalidCredential { .. }
                | GatewayError::ExpiredCredential => metrics::record_auth_failure(error.error_code()),
                GatewayError::QuotaExceeded { route, .. } => metrics::record_rate_limited(route),
                GatewayError::Config(_) | GatewayError::Internal(_) => {
                    error!(request_id = %ctx.request_id, path = %ctx.path, error = %error, "Request failed inside the gateway");
                }
                _ => {}
            }
        }

        let response = self.translator.translate(outcome, &ctx);
        metrics::record_request(
            ctx.method.as_str(),
            ctx.route.as_deref().unwrap_or(UNMATCHED_ROUTE),
            response.status().as_u16(),
            start.elapsed(),
        );
        response
    }

    /// The stages proper, without response rendering
    pub async fn process(&self, ctx: &mut RequestContext) -> GatewayResult<BackendResponse> {
        let matched = self.router.route(&ctx.method, &ctx.path);

        // Unknown paths still require a token, so probing the route table
        // without credentials only ever yields 401
        let identity = self
            .auth
            .authenticate(ctx, matched.as_ref().ok().map(|m| m.rule))?;
        let matched = matched.inspect_err(|e| {
            warn!(request_id = %ctx.request_id, error = %e, "Route lookup failed");
        })?;

        ctx.route = Some(matched.rule.name.clone());
        ctx.params.clone_from(&matched.params);

        if !self.auth.is_public_path(&ctx.path) {
            self.limiter.check(&identity, matched.rule).await?;
        }

        let target = self.router.resolve(&matched, ctx.query.as_deref())?;
        self.forwarder.forward(ctx, &target).await
    }
}
