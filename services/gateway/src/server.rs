//! API Gateway server implementation

use std::{
    any::Any,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use axum::{
    Router, middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::{net::TcpListener, task::JoinHandle};
use tower_http::{
    catch_panic::CatchPanicLayer, compression::CompressionLayer, timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::{
    config::GatewayConfig,
    error::GatewayError,
    handlers::{gateway_info, health_check, metrics, proxy},
    metrics::install_recorder,
    middleware::{create_cors_layer, logging_middleware, request_id_middleware},
    pipeline::GatewayPipeline,
    rate_limiter::RateLimiter,
};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<GatewayPipeline>,
    pub metrics: Option<PrometheusHandle>,
    pub max_body_size: usize,
    /// Peers allowed to tell us the client address
    pub trusted_proxies: Arc<[IpAddr]>,
}

/// API Gateway server
pub struct ApiGatewayServer {
    config: GatewayConfig,
    pipeline: Arc<GatewayPipeline>,
    metrics: Option<PrometheusHandle>,
}

impl ApiGatewayServer {
    /// Create a new API Gateway server
    pub fn new(config: GatewayConfig) -> Result<Self> {
        info!("Initializing API Gateway server");

        config.validate()?;
        let pipeline = Arc::new(GatewayPipeline::new(&config)?);
        let metrics = if config.monitoring.metrics_enabled {
            install_recorder()
        } else {
            None
        };

        info!(
            routes = pipeline.router().table().rules().len(),
            "API Gateway server initialized successfully"
        );

        Ok(Self {
            config,
            pipeline,
            metrics,
        })
    }

    #[must_use] pub const fn pipeline(&self) -> &Arc<GatewayPipeline> {
        &self.pipeline
    }

    #[must_use] pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(self.pipeline.limiter())
    }

    /// Create the Axum application with all routes and middleware
    pub fn router(&self) -> Router {
        let trusted_proxies: Arc<[IpAddr]> = self.config.server.trusted_proxies.clone().into();
        let state = AppState {
            pipeline: Arc::clone(&self.pipeline),
            metrics: self.metrics.clone(),
            max_body_size: self.config.server.max_body_size,
            trusted_proxies: Arc::clone(&trusted_proxies),
        };

        // Gateway-owned endpoints; every other method on them still reaches the pipeline
        let mut app = Router::new()
            .route("/", get(gateway_info).fallback(proxy))
            .route("/health", get(health_check).fallback(proxy));
        if self.metrics.is_some() {
            app = app.route(
                &self.config.monitoring.metrics_path,
                get(metrics).fallback(proxy),
            );
        }

        let mut app = app
            .fallback(proxy)
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(
                self.config.server.timeout_seconds,
            )))
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(middleware::from_fn_with_state(
                trusted_proxies,
                logging_middleware,
            ))
            .layer(middleware::from_fn(request_id_middleware))
            .layer(TraceLayer::new_for_http());

        if self.config.server.compression {
            app = app.layer(CompressionLayer::new());
        }
        if self.config.cors.enabled {
            app = app.layer(create_cors_layer(&self.config.cors));
        }

        app
    }

    /// Bind the configured address and serve until SIGINT/SIGTERM
    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = self.config.server_address().parse().map_err(|e| {
            error!("Invalid server address '{}': {}", self.config.server_address(), e);
            anyhow::anyhow!("Invalid server address: {}", e)
        })?;

        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!("Failed to bind TCP listener to {}: {}", addr, e);
            anyhow::anyhow!("Failed to bind to address {}: {}", addr, e)
        })?;

        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let cleanup = spawn_cleanup_task(
            self.rate_limiter(),
            Duration::from_secs(self.config.rate_limiting.cleanup_interval_seconds),
        );

        info!("Starting API Gateway server on {}", listener.local_addr()?);

        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        if let Some(cleanup) = cleanup {
            cleanup.abort();
        }

        if let Err(e) = served {
            error!("Server encountered a fatal error: {}", e);
            return Err(anyhow::anyhow!("Server error: {}", e));
        }

        info!("API Gateway server stopped");
        Ok(())
    }
}

/// Periodically evict idle rate-limit counters
fn spawn_cleanup_task(limiter: Arc<RateLimiter>, every: Duration) -> Option<JoinHandle<()>> {
    if !limiter.is_enabled() || every.is_zero() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            limiter.cleanup_idle().await;
            crate::metrics::update_system_metrics(limiter.stats().tracked_keys);
        }
    }))
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = detail, "Request handler panicked");
    GatewayError::Internal(detail.to_string()).into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}

/// API route documentation
pub fn print_routes(config: &GatewayConfig) -> Result<()> {
    let table = config.route_table()?;

    println!("API Gateway Routes:");
    println!("===================");
    println!();
    println!("Gateway:");
    println!("  GET  /                       - Route catalog");
    println!("  GET  /health                 - Health check");
    if config.monitoring.metrics_enabled {
        println!(
            "  GET  {:<24}- Prometheus metrics",
            config.monitoring.metrics_path
        );
    }
    println!();
    println!("Proxied:");
    for rule in table.rules() {
        let backend = config.services.get(rule.backend);
        println!(
            "  {:<6} {:<22} -> {}{} ({}, {}{})",
            rule.method.as_str(),
            rule.pattern.as_str(),
            backend.base_url.trim_end_matches('/'),
            rule.upstream.as_str(),
            rule.limit,
            if rule.require_auth { "auth" } else { "public" },
            if rule.forward_authorization {
                ", forwards Authorization"
            } else {
                ""
            }
        );
    }
    println!();
    println!("All proxied endpoints support:");
    println!("- Bearer JWT authentication");
    println!("- Per-client, per-route rate limiting");
    println!("- X-Request-Id propagation");
    Ok(())
}
