//! Authentication tests driven through the full router

use axum::http::{Request, StatusCode, header};
use axum::body::Body;
use rstest::*;
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header as header_eq, method, path},
};

use super::helpers::*;

async fn mocked_users() -> (MockServer, axum::Router) {
    crate::init_test_env();
    let users = MockServer::start().await;
    let app = build_app(create_test_config(&users.uri(), &users.uri()));
    (users, app)
}

#[tokio::test]
async fn test_valid_token_is_forwarded_with_authorization() {
    let (users, app) = mocked_users().await;
    let token = create_test_jwt("ann", 3600);

    Mock::given(method("GET"))
        .and(path("/users/42"))
        .and(header_eq("authorization", bearer(&token).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42, "name": "Ann"})))
        .expect(1)
        .mount(&users)
        .await;

    let response = send(&app, get("/users/42", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"id": 42, "name": "Ann"}));
}

#[tokio::test]
async fn test_missing_header_never_reaches_backend() {
    let (users, app) = mocked_users().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&users)
        .await;

    let response = send(&app, get("/users/42", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_api_error(&body_json(response).await, "missing_credential");
}

#[rstest]
#[case::wrong_scheme("Basic YW5uOnNlY3JldA==", "missing_credential")]
#[case::empty_bearer("Bearer ", "missing_credential")]
#[case::garbage("Bearer not.a.jwt", "invalid_credential")]
#[tokio::test]
async fn test_malformed_credentials_rejected(#[case] authorization: &str, #[case] code: &str) {
    let (users, app) = mocked_users().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&users)
        .await;

    let request = Request::builder()
        .uri("/users")
        .header(header::AUTHORIZATION, authorization)
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_api_error(&body_json(response).await, code);
}

#[tokio::test]
async fn test_expired_and_invalid_are_distinct() {
    let (_users, app) = mocked_users().await;

    let expired = create_test_jwt("ann", -3600);
    let response = send(&app, get("/users", Some(&expired))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_api_error(&body_json(response).await, "expired_credential");

    let forged = create_signed_jwt("ann", 3600, "not-the-gateway-secret");
    let response = send(&app, get("/users", Some(&forged))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_api_error(&body_json(response).await, "invalid_credential");
}

#[tokio::test]
async fn test_unknown_route_needs_token_before_not_found() {
    let (_users, app) = mocked_users().await;

    let response = send(&app, get("/orders", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let token = create_test_jwt("ann", 3600);
    let response = send(&app, get("/orders", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_api_error(&body_json(response).await, "route_not_found");
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let (users, app) = mocked_users().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&users)
        .await;

    let response = send(&app, get("/health", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_authorization_not_forwarded_to_list_users() {
    let (users, app) = mocked_users().await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&users)
        .await;

    let token = create_test_jwt("ann", 3600);
    let response = send(&app, get("/users", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let received = users.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(received[0].headers.get("authorization").is_none());
    assert!(received[0].headers.get("x-request-id").is_some());
}
