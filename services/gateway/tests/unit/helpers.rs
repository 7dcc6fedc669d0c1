//! Test helpers and utilities

#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, Response, header},
};
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tower::ServiceExt;

use recipe_gateway::{
    ApiGatewayServer, BackendConfig, GatewayConfig, RouteConfig, ServiceEndpoints,
    config::MonitoringConfig,
};

pub const TEST_SECRET: &str = "test-jwt-secret-key-for-testing-only";

/// Mint an HS256 token for `sub` expiring `exp_offset_secs` from now
pub fn create_test_jwt(sub: &str, exp_offset_secs: i64) -> String {
    create_signed_jwt(sub, exp_offset_secs, TEST_SECRET)
}

pub fn create_signed_jwt(sub: &str, exp_offset_secs: i64, secret: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = json!({
        "sub": sub,
        "iat": now,
        "exp": now + exp_offset_secs,
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

/// Gateway configuration pointing both backends at the given base URLs
pub fn create_test_config(users_url: &str, recipes_url: &str) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.server.port = 0;
    config.server.compression = false;
    config.services = ServiceEndpoints {
        user_service: BackendConfig {
            base_url: users_url.to_string(),
            timeout_ms: 2_000,
        },
        recipe_service: BackendConfig {
            base_url: recipes_url.to_string(),
            timeout_ms: 2_000,
        },
    };
    config.auth.verification_key = TEST_SECRET.to_string();
    config.monitoring = MonitoringConfig {
        metrics_enabled: false,
        ..MonitoringConfig::default()
    };
    config
}

/// One-rule route override with a short window, for window-expiry tests
pub fn short_window_route(max: u64, window_seconds: u64) -> RouteConfig {
    RouteConfig {
        name: "list_recipes".to_string(),
        method: "GET".to_string(),
        path: "/recipes".to_string(),
        backend: recipe_gateway::BackendId::RecipeService,
        upstream_path: None,
        requests_per_window: max,
        window_seconds,
        require_auth: true,
        forward_authorization: false,
    }
}

pub fn build_app(config: GatewayConfig) -> Router {
    ApiGatewayServer::new(config).unwrap().router()
}

/// Base URL of a local port nothing listens on
pub async fn unused_base_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

pub fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, bearer(token));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, token: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, bearer(token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Assert the gateway error envelope carries `code`
pub fn assert_api_error(body: &Value, code: &str) {
    assert_eq!(body["success"], false, "error envelope expected: {body}");
    assert_eq!(body["error"]["error"], code, "unexpected error code: {body}");
    assert!(
        body["error"]["message"].as_str().is_some_and(|m| !m.is_empty()),
        "error should have a message"
    );
    assert!(body["timestamp"].as_i64().is_some_and(|t| t > 0));
}
