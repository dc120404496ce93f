//! End-to-end tests of the relay router against an in-process upstream.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use pretty_assertions::assert_eq;
use relay_policy::Policy;
use relay_server::upstream::{OutboundRequest, UpstreamError, UpstreamResponse};
use relay_server::{AppState, Upstream, create_router};
use tower::ServiceExt;
use url::Url;

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
}

enum Behavior {
    Respond {
        status: StatusCode,
        headers: Vec<(&'static str, &'static str)>,
        body: &'static str,
    },
    Stall(Arc<AtomicBool>),
    Fail(&'static str),
    Panic,
}

struct MockUpstream {
    behavior: Behavior,
    calls: AtomicUsize,
    recorded: Mutex<Vec<Recorded>>,
}

impl MockUpstream {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
            recorded: Mutex::new(Vec::new()),
        })
    }

    fn ok() -> Arc<Self> {
        Self::new(Behavior::Respond {
            status: StatusCode::OK,
            headers: vec![("content-type", "application/json")],
            body: r#"{"ok":true}"#,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last(&self) -> Recorded {
        self.recorded.lock().unwrap().last().cloned().unwrap()
    }
}

/// Sets its flag when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let body = match request.body {
            Some(body) => Some(
                axum::body::to_bytes(body, usize::MAX)
                    .await
                    .map_err(|e| UpstreamError::Transport(e.to_string()))?,
            ),
            None => None,
        };
        self.recorded.lock().unwrap().push(Recorded {
            method: request.method,
            url: request.url,
            headers: request.headers,
            body,
        });

        match &self.behavior {
            Behavior::Respond {
                status,
                headers,
                body,
            } => {
                let mut map = HeaderMap::new();
                for (name, value) in headers {
                    map.append(*name, HeaderValue::from_static(*value));
                }
                Ok(UpstreamResponse {
                    status: *status,
                    headers: map,
                    body: Body::from(*body),
                })
            }
            Behavior::Stall(dropped) => {
                let _guard = DropFlag(Arc::clone(dropped));
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(UpstreamError::Transport("stalled".into()))
            }
            Behavior::Fail(cause) => Err(UpstreamError::Transport(cause.to_string())),
            Behavior::Panic => panic!("upstream exploded"),
        }
    }
}

fn router(policy: Policy, upstream: Arc<MockUpstream>) -> Router {
    create_router(AppState::with_upstream(policy, upstream))
}

fn relay_uri(target: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("url", target)
        .finish();
    format!("/?{query}")
}

fn get(target: &str) -> Request<Body> {
    Request::builder()
        .uri(relay_uri(target))
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn assert_error(response: Response, status: StatusCode, message: &str) {
    assert_eq!(response.status(), status);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    let json = body_json(response).await;
    assert_eq!(json["error"], message);
    assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn missing_url_is_rejected() {
    let upstream = MockUpstream::ok();
    let app = router(Policy::default(), Arc::clone(&upstream));

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_error(
        response,
        StatusCode::BAD_REQUEST,
        "Missing required parameter: url",
    )
    .await;
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn invalid_url_is_rejected() {
    let app = router(Policy::default(), MockUpstream::ok());
    let response = app.oneshot(get("not a url")).await.unwrap();
    assert_error(response, StatusCode::BAD_REQUEST, "Invalid URL format").await;
}

#[tokio::test]
async fn non_http_protocol_is_rejected() {
    let upstream = MockUpstream::ok();
    let app = router(Policy::default(), Arc::clone(&upstream));

    let response = app.oneshot(get("ftp://example.com/file")).await.unwrap();

    assert_error(
        response,
        StatusCode::BAD_REQUEST,
        "Only HTTP and HTTPS protocols are allowed",
    )
    .await;
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn private_targets_are_rejected() {
    let upstream = MockUpstream::ok();
    let app = router(Policy::default(), Arc::clone(&upstream));

    for target in [
        "http://10.0.0.1/",
        "http://172.20.1.1/",
        "http://192.168.0.10/",
        "http://127.0.0.1:8080/",
        "http://169.254.169.254/latest/meta-data/",
        "http://localhost/",
        "http://0.0.0.0/",
    ] {
        let response = app.clone().oneshot(get(target)).await.unwrap();
        assert_error(
            response,
            StatusCode::BAD_REQUEST,
            "Access to private IP addresses is not allowed",
        )
        .await;
    }
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn domain_allowlist_is_enforced() {
    let upstream = MockUpstream::ok();
    let policy = Policy::builder().allow_domain("api.example.com").build();
    let app = router(policy, Arc::clone(&upstream));

    let allowed = app
        .clone()
        .oneshot(get("https://api.example.com/v1/items"))
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);

    let denied = app.oneshot(get("https://evil.com/steal")).await.unwrap();
    assert_error(denied, StatusCode::BAD_REQUEST, "Domain evil.com is not allowed").await;

    assert_eq!(upstream.calls(), 1);
    assert_eq!(
        upstream.last().url.as_str(),
        "https://api.example.com/v1/items"
    );
}

#[tokio::test]
async fn preflight_echoes_origin_without_forwarding() {
    let upstream = MockUpstream::ok();
    let app = router(Policy::default(), Arc::clone(&upstream));

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri(relay_uri("https://api.example.com/"))
                .header(header::ORIGIN, "https://foo.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://foo.com");
    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_METHODS],
        "GET, POST, PUT, DELETE, OPTIONS"
    );
    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
        "Content-Type, Authorization, X-Requested-With"
    );
    assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], "86400");
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn preflight_from_unlisted_origin_is_forbidden() {
    let policy = Policy::builder().allow_origin("https://good.com").build();
    let app = router(policy, MockUpstream::ok());

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/")
                .header(header::ORIGIN, "https://bad.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn unlisted_origin_is_forbidden() {
    let upstream = MockUpstream::ok();
    let policy = Policy::builder().allow_origin("https://good.com").build();
    let app = router(policy, Arc::clone(&upstream));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(relay_uri("https://api.example.com/"))
                .header(header::ORIGIN, "https://bad.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_error(
        response,
        StatusCode::FORBIDDEN,
        "Origin https://bad.com is not allowed",
    )
    .await;
    assert_eq!(upstream.calls(), 0);

    let allowed = app
        .oneshot(
            Request::builder()
                .uri(relay_uri("https://api.example.com/"))
                .header(header::ORIGIN, "https://good.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);
    assert_eq!(
        allowed.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://good.com"
    );
}

#[tokio::test]
async fn undecodable_origin_is_forbidden() {
    let upstream = MockUpstream::ok();
    let policy = Policy::builder().allow_origin("https://good.com").build();
    let app = router(policy, Arc::clone(&upstream));
    let origin = HeaderValue::from_bytes(b"https://b\xe4d.com").unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(relay_uri("https://api.example.com/"))
                .header(header::ORIGIN, origin.clone())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(upstream.calls(), 0);

    let preflight = app
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/")
                .header(header::ORIGIN, origin)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(preflight.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn origin_is_checked_before_resolving_the_target() {
    let upstream = MockUpstream::ok();
    let policy = Policy::builder()
        .allow_origin("https://good.com")
        .resolve_hosts(true)
        .build();
    let app = router(policy, Arc::clone(&upstream));

    // [::1] passes the textual check and only the resolving check rejects it.
    let forbidden = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(relay_uri("http://[::1]/"))
                .header(header::ORIGIN, "https://bad.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_error(
        forbidden,
        StatusCode::FORBIDDEN,
        "Origin https://bad.com is not allowed",
    )
    .await;

    let private = app
        .oneshot(
            Request::builder()
                .uri(relay_uri("http://[::1]/"))
                .header(header::ORIGIN, "https://good.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_error(
        private,
        StatusCode::BAD_REQUEST,
        "Access to private IP addresses is not allowed",
    )
    .await;
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn identifying_headers_are_not_forwarded() {
    let upstream = MockUpstream::ok();
    let app = router(Policy::default(), Arc::clone(&upstream));

    let response = app
        .oneshot(
            Request::builder()
                .uri(relay_uri("https://api.example.com/data"))
                .header(header::HOST, "relay.example.net")
                .header(header::COOKIE, "session=secret")
                .header("x-forwarded-for", "203.0.113.7")
                .header("x-real-ip", "203.0.113.7")
                .header(header::REFERER, "https://app.example.com/")
                .header(header::ORIGIN, "https://app.example.com")
                .header(header::AUTHORIZATION, "Bearer token")
                .header(header::ACCEPT, "application/json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let sent = upstream.last();
    for name in ["host", "cookie", "x-forwarded-for", "x-real-ip", "referer", "origin"] {
        assert!(!sent.headers.contains_key(name), "{name} was forwarded");
    }
    assert_eq!(sent.headers[header::AUTHORIZATION], "Bearer token");
    assert_eq!(sent.headers[header::ACCEPT], "application/json");
}

#[tokio::test]
async fn response_headers_are_filtered_and_decorated() {
    let upstream = MockUpstream::new(Behavior::Respond {
        status: StatusCode::CREATED,
        headers: vec![
            ("content-type", "text/plain"),
            ("etag", "\"v1\""),
            ("set-cookie", "tracking=1"),
            ("server", "upstream/1.0"),
            ("access-control-allow-origin", "https://upstream.example"),
        ],
        body: "created",
    });
    let app = router(Policy::default(), upstream);

    let response = app.oneshot(get("https://api.example.com/items")).await.unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let headers = response.headers();
    assert!(!headers.contains_key(header::SET_COOKIE));
    assert!(!headers.contains_key(header::SERVER));
    assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
    assert_eq!(headers[header::ETAG], "\"v1\"");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(
        headers[header::ACCESS_CONTROL_EXPOSE_HEADERS],
        "Content-Length, Content-Type"
    );
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert_eq!(headers["x-xss-protection"], "1; mode=block");

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"created");
}

#[tokio::test]
async fn upstream_error_status_is_relayed() {
    let upstream = MockUpstream::new(Behavior::Respond {
        status: StatusCode::SERVICE_UNAVAILABLE,
        headers: vec![],
        body: "down",
    });
    let app = router(Policy::default(), upstream);

    let response = app.oneshot(get("https://api.example.com/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn get_forwards_no_body_and_post_streams_body() {
    let upstream = MockUpstream::ok();
    let app = router(Policy::default(), Arc::clone(&upstream));

    app.clone()
        .oneshot(
            Request::builder()
                .uri(relay_uri("https://api.example.com/"))
                .body(Body::from("ignored"))
                .unwrap(),
        )
        .await
        .unwrap();
    let sent = upstream.last();
    assert_eq!(sent.method, Method::GET);
    assert!(sent.body.is_none());

    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(relay_uri("https://api.example.com/"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"name":"relay"}"#))
            .unwrap(),
    )
    .await
    .unwrap();
    let sent = upstream.last();
    assert_eq!(sent.method, Method::POST);
    assert_eq!(sent.body.as_deref(), Some(&br#"{"name":"relay"}"#[..]));
    assert_eq!(sent.headers[header::CONTENT_TYPE], "application/json");
}

#[tokio::test]
async fn declared_oversized_body_is_rejected_before_forwarding() {
    let upstream = MockUpstream::ok();
    let policy = Policy::builder().max_body_bytes(1024 * 1024).build();
    let app = router(policy, Arc::clone(&upstream));

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(relay_uri("https://api.example.com/upload"))
                .header(header::CONTENT_LENGTH, (2 * 1024 * 1024).to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_error(response, StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").await;
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn streamed_oversized_body_is_rejected() {
    let upstream = MockUpstream::ok();
    let policy = Policy::builder().max_body_bytes(16).build();
    let app = router(policy, Arc::clone(&upstream));

    let chunks: Vec<Result<&'static str, std::io::Error>> =
        vec![Ok("0123456789"), Ok("0123456789"), Ok("0123456789")];
    let response = app
        .oneshot(
            Request::builder()
                .method(Method::PUT)
                .uri(relay_uri("https://api.example.com/upload"))
                .body(Body::from_stream(futures::stream::iter(chunks)))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_error(response, StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").await;
}

#[tokio::test]
async fn slow_upstream_times_out_and_is_cancelled() {
    let dropped = Arc::new(AtomicBool::new(false));
    let upstream = MockUpstream::new(Behavior::Stall(Arc::clone(&dropped)));
    let policy = Policy::builder().timeout(Duration::from_millis(100)).build();
    let app = router(policy, upstream);

    let response = app.oneshot(get("https://slow.example.com/")).await.unwrap();

    assert_error(response, StatusCode::REQUEST_TIMEOUT, "Request timeout").await;
    assert!(dropped.load(Ordering::SeqCst), "upstream request was not cancelled");
}

#[tokio::test]
async fn transport_failure_is_bad_gateway() {
    let app = router(
        Policy::default(),
        MockUpstream::new(Behavior::Fail("dns error: no such host")),
    );

    let response = app.oneshot(get("https://nowhere.example/")).await.unwrap();
    assert_error(response, StatusCode::BAD_GATEWAY, "Failed to fetch target URL").await;
}

#[tokio::test]
async fn handler_panic_becomes_generic_error() {
    let app = router(Policy::default(), MockUpstream::new(Behavior::Panic));

    let response = app.oneshot(get("https://api.example.com/")).await.unwrap();
    assert_error(
        response,
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error",
    )
    .await;
}

#[tokio::test]
async fn identical_requests_get_identical_verdicts() {
    let upstream = MockUpstream::ok();
    let app = router(Policy::default(), Arc::clone(&upstream));

    let first = app
        .clone()
        .oneshot(get("https://api.example.com/same"))
        .await
        .unwrap();
    let second = app.oneshot(get("https://api.example.com/same")).await.unwrap();

    assert_eq!(first.status(), second.status());
    for name in [
        header::CONTENT_TYPE,
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        header::ACCESS_CONTROL_ALLOW_METHODS,
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
    ] {
        assert_eq!(first.headers().get(&name), second.headers().get(&name));
    }
    assert_eq!(upstream.calls(), 2);
}

#[tokio::test]
async fn any_path_is_relayed() {
    let upstream = MockUpstream::ok();
    let app = router(Policy::default(), Arc::clone(&upstream));

    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("url", "https://api.example.com/x")
        .finish();
    let response = app
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri(format!("/some/nested/path?{query}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(upstream.last().method, Method::DELETE);
}
