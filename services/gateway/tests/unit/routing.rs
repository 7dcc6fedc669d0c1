//! Routing, rewriting and response passthrough tests

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use pretty_assertions::assert_eq;
use rstest::*;
use serde_json::json;
use tokio::{io::AsyncReadExt, net::TcpListener, sync::oneshot};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json as body_json_eq, header as header_eq, method, path, query_param},
};

use super::helpers::*;

struct Backends {
    users: MockServer,
    recipes: MockServer,
    app: axum::Router,
    token: String,
}

async fn backends() -> Backends {
    crate::init_test_env();
    let users = MockServer::start().await;
    let recipes = MockServer::start().await;
    let app = build_app(create_test_config(&users.uri(), &recipes.uri()));
    Backends {
        users,
        recipes,
        app,
        token: create_test_jwt("ann", 3600),
    }
}

#[tokio::test]
async fn test_register_is_rewritten_and_body_forwarded() {
    let b = backends().await;
    let payload = json!({"username": "ann", "password": "hunter22"});

    Mock::given(method("POST"))
        .and(path("/register"))
        .and(header_eq("content-type", "application/json"))
        .and(body_json_eq(&payload))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 7})))
        .expect(1)
        .mount(&b.users)
        .await;

    let response = send(&b.app, post_json("/users/register", Some(&b.token), &payload)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await, json!({"id": 7}));
}

#[tokio::test]
async fn test_recipes_go_to_recipe_service() {
    let b = backends().await;
    let recipe = json!({"title": "Shakshuka", "servings": 2});

    Mock::given(method("POST"))
        .and(path("/recipes"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
        .expect(1)
        .mount(&b.recipes)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&b.users)
        .await;

    let response = send(&b.app, post_json("/recipes", Some(&b.token), &recipe)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_backend_errors_pass_through_untouched() {
    let b = backends().await;
    let detail = r#"{"detail":[{"loc":["body","title"],"msg":"field required"}]}"#;

    Mock::given(method("POST"))
        .and(path("/recipes"))
        .respond_with(
            ResponseTemplate::new(422).set_body_raw(detail.as_bytes().to_vec(), "application/json"),
        )
        .mount(&b.recipes)
        .await;

    let response = send(&b.app, post_json("/recipes", Some(&b.token), &json!({}))).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    assert_eq!(body_bytes(response).await, detail.as_bytes());
}

#[tokio::test]
async fn test_query_string_is_preserved() {
    let b = backends().await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&b.users)
        .await;

    let response = send(&b.app, get("/users?page=2", Some(&b.token))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[rstest]
#[case::non_numeric_id("GET", "/users/abc")]
#[case::wrong_method("DELETE", "/users/42")]
#[case::get_on_post_only("GET", "/recipes")]
#[case::nested("GET", "/users/42/recipes")]
#[tokio::test]
async fn test_unmatched_requests_are_not_found(#[case] verb: &str, #[case] uri: &str) {
    let b = backends().await;
    Mock::given(method(verb))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&b.users)
        .await;

    let request = Request::builder()
        .method(verb)
        .uri(uri)
        .header(header::AUTHORIZATION, bearer(&b.token))
        .body(Body::empty())
        .unwrap();
    let response = send(&b.app, request).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_api_error(&body_json(response).await, "route_not_found");
}

#[tokio::test]
async fn test_request_id_is_propagated_and_echoed() {
    let b = backends().await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .and(header_eq("x-request-id", "trace-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&b.users)
        .await;

    let request = Request::builder()
        .uri("/users")
        .header(header::AUTHORIZATION, bearer(&b.token))
        .header("x-request-id", "trace-abc")
        .body(Body::empty())
        .unwrap();
    let response = send(&b.app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "trace-abc");
}

#[tokio::test]
async fn test_error_responses_carry_request_id() {
    let b = backends().await;
    let response = send(&b.app, get("/users", None)).await;
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_root_lists_route_catalog() {
    let b = backends().await;
    let response = send(&b.app, get("/", None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let catalog = body_json(response).await;
    assert_eq!(catalog["name"], "recipe-gateway");
    let routes = catalog["routes"].as_array().unwrap();
    assert_eq!(routes.len(), 4);
    assert!(routes.iter().any(|r| r["path"] == "/users/{id:int}" && r["rate_limit"] == "5/60s"));
}

#[tokio::test]
async fn test_other_methods_on_health_fall_through() {
    let b = backends().await;
    let response = send(&b.app, post_json("/health", None, &json!({}))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Backend that accepts one request and never answers; reports when the
/// gateway's connection to it goes away
async fn silent_backend() -> (String, oneshot::Receiver<()>, oneshot::Receiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let (received_tx, received_rx) = oneshot::channel();
    let (closed_tx, closed_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before the request arrived");
            request.extend_from_slice(&buf[..n]);
        }
        let _ = received_tx.send(());

        // Anything but EOF (or a reset) means the gateway is still waiting on us
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
        let _ = closed_tx.send(());
    });

    (base_url, received_rx, closed_rx)
}

#[tokio::test]
async fn test_client_disconnect_cancels_backend_call() {
    crate::init_test_env();
    let (backend, received, closed) = silent_backend().await;
    let app = build_app(create_test_config(&backend, &backend));
    let token = create_test_jwt("ann", 3600);

    // The backend timeout is 2s; give up on the response well before that
    let request = send(&app, get("/users", Some(&token)));
    let outcome = tokio::time::timeout(Duration::from_millis(300), request).await;
    assert!(outcome.is_err(), "the backend never answers");

    tokio::time::timeout(Duration::from_secs(1), received)
        .await
        .expect("backend should have seen the request")
        .unwrap();
    tokio::time::timeout(Duration::from_secs(1), closed)
        .await
        .expect("backend connection should close once the caller is gone")
        .unwrap();
}
