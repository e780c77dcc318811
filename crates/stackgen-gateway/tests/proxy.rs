//! Upstream forwarding against a mock backend

use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum_test::TestServer;
use serde_json::{json, Value};
use stackgen_core::{GatewayError, Route};
use stackgen_gateway::{build_router, AppState, GatewaySettings, ProxyDispatcher};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{body_json, body_string, header as header_is, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway(public: &str, private: &str, credits: u64) -> TestServer {
    let settings = GatewaySettings {
        public_api_url: public.to_string(),
        private_api_url: private.to_string(),
        default_credits: credits,
        ..GatewaySettings::default()
    };
    TestServer::new(build_router(Arc::new(AppState::new(settings).unwrap()))).unwrap()
}

#[tokio::test]
async fn test_mount_prefix_stripped_and_query_kept() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/languages"))
        .and(query_param("active", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "code": "node" }])))
        .expect(1)
        .mount(&upstream)
        .await;

    let server = gateway(&upstream.uri(), &upstream.uri(), 0);
    let response = server.get("/public/api/v1/languages?active=true").await;

    response.assert_status_ok();
    assert_eq!(response.json::<Value>(), json!([{ "code": "node" }]));
    assert_eq!(response.header("x-ratelimit-limit"), "100");
}

#[tokio::test]
async fn test_docs_routes_reach_their_targets() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/swagger/index.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("private docs"))
        .expect(1)
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/me"))
        .respond_with(ResponseTemplate::new(200).set_body_string("private api"))
        .expect(1)
        .mount(&upstream)
        .await;

    let server = gateway("http://127.0.0.1:9", &upstream.uri(), 0);
    assert_eq!(server.get("/private/api-docs").await.text(), "private docs");
    assert_eq!(server.get("/private/users/me").await.text(), "private api");
}

#[tokio::test]
async fn test_upstream_response_relayed() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/projects"))
        .and(header_is("authorization", "Bearer abc"))
        .and(body_json(json!({ "name": "demo" })))
        .respond_with(
            ResponseTemplate::new(418)
                .insert_header("x-upstream", "yes")
                .set_body_string("teapot"),
        )
        .mount(&upstream)
        .await;

    let server = gateway(&upstream.uri(), &upstream.uri(), 0);
    let response = server
        .post("/public/projects")
        .add_header(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"))
        .json(&json!({ "name": "demo" }))
        .await;

    response.assert_status(StatusCode::IM_A_TEAPOT);
    assert_eq!(response.header("x-upstream"), "yes");
    assert_eq!(response.text(), "teapot");
}

#[tokio::test]
async fn test_dead_upstream_is_bad_gateway() {
    let server = gateway("http://127.0.0.1:9", "http://127.0.0.1:9", 0);
    let response = server.get("/public/anything").await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    assert_eq!(response.json::<Value>()["error"], "Bad Gateway");
}

#[tokio::test]
async fn test_generate_debits_credits() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("archive"))
        .expect(1)
        .mount(&upstream)
        .await;

    let server = gateway(&upstream.uri(), &upstream.uri(), 1);
    let token = HeaderValue::from_static("Bearer maker");

    let first = server
        .post("/generate")
        .add_header(header::AUTHORIZATION, token.clone())
        .await;
    first.assert_status_ok();
    assert_eq!(first.header("x-credits-remaining"), "0");

    let second = server
        .post("/generate")
        .add_header(header::AUTHORIZATION, token)
        .await;
    second.assert_status(StatusCode::PAYMENT_REQUIRED);
    assert_eq!(second.json::<Value>()["error"], "Payment Required");

    server.post("/generate").await.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_slow_upstream_times_out() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&upstream)
        .await;

    let route = Route::upstream("/public", &upstream.uri()).unwrap();
    let proxy = ProxyDispatcher::new(Duration::from_millis(200)).unwrap();
    let request = Request::builder()
        .uri("/public/slow")
        .body(Body::empty())
        .unwrap();

    let err = proxy.forward(&route, request, None).await.unwrap_err();
    assert!(matches!(err, GatewayError::UpstreamTimeout(_)));
    assert_eq!(err.status(), 504);
}

#[tokio::test]
async fn test_forward_keeps_method_and_body() {
    let upstream = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/items/7"))
        .and(header_is("x-forwarded-for", "198.51.100.4"))
        .and(body_string("payload"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&upstream)
        .await;

    let route = Route::upstream("/public", &upstream.uri()).unwrap();
    let proxy = ProxyDispatcher::new(Duration::from_secs(5)).unwrap();
    let request = Request::builder()
        .method("PUT")
        .uri("/public/items/7")
        .body(Body::from("payload"))
        .unwrap();

    let response = proxy
        .forward(&route, request, Some("198.51.100.4:5000".parse().unwrap()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(to_bytes(response.into_body(), 1024).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_caller_host_kept_without_change_origin() {
    let upstream = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/items/7"))
        .and(header_is("host", "gateway.example"))
        .and(body_string("payload"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&upstream)
        .await;

    let route = Route::upstream("/public", &upstream.uri())
        .unwrap()
        .with_change_origin(false);
    let proxy = ProxyDispatcher::new(Duration::from_secs(5)).unwrap();
    let request = Request::builder()
        .method("PUT")
        .uri("/public/items/7")
        .header(header::HOST, "gateway.example")
        .body(Body::from("payload"))
        .unwrap();

    let response = proxy.forward(&route, request, None).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_dot_segments_resolved_before_forwarding() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items/7"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&upstream)
        .await;

    let route = Route::upstream("/public", &upstream.uri()).unwrap();
    let proxy = ProxyDispatcher::new(Duration::from_secs(5)).unwrap();
    let request = Request::builder()
        .uri("/public/old/../items/%2e/7")
        .body(Body::empty())
        .unwrap();

    let response = proxy.forward(&route, request, None).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_dot_segments_cannot_skip_route_policy() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let settings = GatewaySettings {
        public_api_url: upstream.uri(),
        ..GatewaySettings::default()
    };
    let app = build_router(Arc::new(AppState::new(settings).unwrap()));

    for uri in ["/public/../generate", "/public/x/%2e%2e/../generate", "/public/./../generate/"] {
        let response = app
            .clone()
            .oneshot(Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
    }
}

#[tokio::test]
async fn test_failed_upstream_refunds_credits() {
    let server = gateway("http://127.0.0.1:9", "http://127.0.0.1:9", 1);
    let token = HeaderValue::from_static("Bearer maker");

    for _ in 0..2 {
        let response = server
            .post("/generate")
            .add_header(header::AUTHORIZATION, token.clone())
            .await;
        response.assert_status(StatusCode::BAD_GATEWAY);
        assert_eq!(response.header("x-credits-remaining"), "1");
    }
}
