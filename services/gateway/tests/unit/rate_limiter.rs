//! Rate limiter unit tests

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::{Method, StatusCode, header};
use rstest::*;
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

use recipe_gateway::{
    BackendId, ClientIdentity, GatewayError, InMemoryStore, RateLimitConfig, RateLimitDescriptor,
    RateLimiter, RateLimiterStore, RouteRule,
    rate_limiter::{RateLimitDecision, RateLimitKey},
};

use super::helpers::*;

#[fixture]
fn basic_rate_limit_config() -> RateLimitConfig {
    RateLimitConfig::default()
}

#[fixture]
fn get_user_rule() -> RouteRule {
    RouteRule::new(
        "get_user",
        Method::GET,
        "/users/{id:int}",
        BackendId::UserService,
        RateLimitDescriptor::per_minute(5),
    )
    .unwrap()
}

fn subject(name: &str) -> ClientIdentity {
    ClientIdentity::Subject(name.to_string())
}

#[rstest]
#[tokio::test]
async fn test_sixth_request_in_window_is_rejected(
    basic_rate_limit_config: RateLimitConfig,
    get_user_rule: RouteRule,
) {
    let limiter = RateLimiter::new(&basic_rate_limit_config);
    let start = Instant::now();

    for i in 0..5 {
        let at = start + Duration::from_secs(i);
        assert!(limiter.check_at(&subject("ann"), &get_user_rule, at).await.is_ok());
    }

    match limiter
        .check_at(&subject("ann"), &get_user_rule, start + Duration::from_secs(20))
        .await
    {
        Err(GatewayError::QuotaExceeded {
            route,
            limit,
            retry_after,
            ..
        }) => {
            assert_eq!(route, "get_user");
            assert_eq!(limit, 5);
            assert_eq!(retry_after, Duration::from_secs(40));
        }
        other => panic!("expected QuotaExceeded, got {other:?}"),
    }

    // A new window starts once the old one has fully elapsed
    assert!(
        limiter
            .check_at(&subject("ann"), &get_user_rule, start + Duration::from_secs(60))
            .await
            .is_ok()
    );
}

#[rstest]
#[tokio::test]
async fn test_subjects_do_not_share_quota(
    basic_rate_limit_config: RateLimitConfig,
    get_user_rule: RouteRule,
) {
    let limiter = RateLimiter::new(&basic_rate_limit_config);
    let now = Instant::now();

    for _ in 0..5 {
        limiter.check_at(&subject("ann"), &get_user_rule, now).await.unwrap();
    }
    assert!(limiter.check_at(&subject("ann"), &get_user_rule, now).await.is_err());
    assert!(limiter.check_at(&subject("bob"), &get_user_rule, now).await.is_ok());

    let by_address = ClientIdentity::Address("ann".to_string());
    assert!(limiter.check_at(&by_address, &get_user_rule, now).await.is_ok());
}

/// Store wrapper counting calls, to prove the limiter only talks to its store
#[derive(Default)]
struct CountingStore {
    inner: InMemoryStore,
    calls: AtomicUsize,
}

#[async_trait]
impl RateLimiterStore for CountingStore {
    async fn check_and_increment(
        &self,
        key: &RateLimitKey,
        descriptor: RateLimitDescriptor,
        now: Instant,
    ) -> RateLimitDecision {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.check_and_increment(key, descriptor, now).await
    }

    async fn evict_idle(&self, idle_for: Duration, now: Instant) -> usize {
        self.inner.evict_idle(idle_for, now).await
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

#[rstest]
#[tokio::test]
async fn test_custom_store_is_used(basic_rate_limit_config: RateLimitConfig, get_user_rule: RouteRule) {
    let store = Arc::new(CountingStore::default());
    let limiter = RateLimiter::with_store(&basic_rate_limit_config, store.clone());

    for _ in 0..3 {
        limiter.check(&subject("ann"), &get_user_rule).await.unwrap();
    }
    assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    assert_eq!(limiter.stats().tracked_keys, 1);
}

#[rstest]
#[tokio::test]
async fn test_cleanup_keeps_active_counters(basic_rate_limit_config: RateLimitConfig, get_user_rule: RouteRule) {
    let limiter = RateLimiter::new(&basic_rate_limit_config);
    let start = Instant::now();

    limiter.check_at(&subject("ann"), &get_user_rule, start).await.unwrap();
    assert_eq!(limiter.cleanup_idle_at(start + Duration::from_secs(30)).await, 0);
    assert_eq!(limiter.cleanup_idle_at(start + Duration::from_secs(601)).await, 1);
    assert_eq!(limiter.stats().tracked_keys, 0);
}

#[tokio::test]
async fn test_quota_exceeded_response_over_http() {
    crate::init_test_env();
    let users = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42})))
        .expect(5)
        .mount(&users)
        .await;

    let app = build_app(create_test_config(&users.uri(), &users.uri()));
    let token = create_test_jwt("ann", 3600);

    for _ in 0..5 {
        let response = send(&app, get("/users/42", Some(&token))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = send(&app, get("/users/42", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    let body = body_json(response).await;
    assert_api_error(&body, "quota_exceeded");
    assert_eq!(body["error"]["details"]["route"], "get_user");
    assert_eq!(body["error"]["details"]["limit"], "5");

    // Other routes keep their own quota
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&users)
        .await;
    let response = send(&app, get("/users", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_admission_resumes_after_window() {
    crate::init_test_env();
    let recipes = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&recipes)
        .await;

    let mut config = create_test_config(&recipes.uri(), &recipes.uri());
    config.routes = vec![short_window_route(2, 1)];
    let app = build_app(config);
    let token = create_test_jwt("ann", 3600);

    for _ in 0..2 {
        assert_eq!(send(&app, get("/recipes", Some(&token))).await.status(), StatusCode::OK);
    }
    assert_eq!(
        send(&app, get("/recipes", Some(&token))).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(send(&app, get("/recipes", Some(&token))).await.status(), StatusCode::OK);
}
