use axum::{
    body::to_bytes,
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Instant;

use crate::error::ProxyError;
use crate::forward;
use crate::metrics::{REJECTED_TOTAL, REQUEST_TOTAL, UPSTREAM_ERRORS, UPSTREAM_LATENCY};
use crate::models::iso_timestamp;
use crate::state::AppState;
use crate::tokens;

const STATUS_PAGE: &str = "Proxy is Running！";

pub async fn proxy_handler(State(state): State<Arc<AppState>>, req: Request) -> Response {
    REQUEST_TOTAL.inc();

    if req.method() == Method::OPTIONS {
        return preflight();
    }

    let path = req.uri().path();
    if path == "/" || path == "/index.html" {
        return status_page();
    }

    let method = req.method().clone();
    let target = forward::target_url(&state.upstream_scheme, req.uri());

    let mut response = match proxy(&state, req, &target).await {
        Ok(response) => response,
        Err(e) => {
            match e {
                ProxyError::RequestLimitExceeded { .. } | ProxyError::TokenLimitExceeded { .. } => {
                    REJECTED_TOTAL.inc()
                }
                ProxyError::UpstreamUnreachable { .. } => UPSTREAM_ERRORS.inc(),
                ProxyError::MalformedBody(_) => {}
            }
            e.into_response()
        }
    };

    tracing::info!("{} {} -> {}", method, target, response.status());

    let headers = response.headers_mut();
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    if let Ok(date) = HeaderValue::from_str(&iso_timestamp()) {
        headers.insert("x-proxy-date", date);
    }
    response
}

async fn proxy(state: &AppState, req: Request, target: &str) -> Result<Response, ProxyError> {
    let (parts, body) = req.into_parts();

    let (quota, body) = match state.limiter.profile_for(parts.uri.path()) {
        Some(profile) => {
            // buffered once: the estimate reads it, then the same bytes go upstream
            let bytes = to_bytes(body, state.max_body_bytes)
                .await
                .map_err(|e| ProxyError::MalformedBody(e.to_string()))?;
            let estimate = tokens::estimate_body(state.estimator.as_ref(), &bytes);
            let quota = state.limiter.admit(profile, estimate)?;
            (Some(quota), reqwest::Body::from(bytes))
        }
        // unlimited upstreams get the body streamed through untouched
        None => (None, reqwest::Body::wrap_stream(body.into_data_stream())),
    };

    let start = Instant::now();
    let upstream = forward::send(&state.client, parts.method, target, &parts.headers, body).await?;
    UPSTREAM_LATENCY.observe(start.elapsed().as_secs_f64());

    let mut response = forward::relay(upstream, target).await?;

    if let Some(quota) = quota {
        let headers = response.headers_mut();
        headers.insert(
            "x-ratelimit-remaining",
            HeaderValue::from(quota.remaining_requests),
        );
        if let Ok(tokens) = HeaderValue::from_str(&quota.remaining_tokens.to_string()) {
            headers.insert("x-tokenlimit-remaining", tokens);
        }
    }

    Ok(response)
}

fn preflight() -> Response {
    (
        StatusCode::NO_CONTENT,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type, Authorization"),
            (header::ACCESS_CONTROL_MAX_AGE, "86400"),
        ],
    )
        .into_response()
}

fn status_page() -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        STATUS_PAGE,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Args;
    use crate::handlers::proxy_router;
    use axum::{Router, body::Body, http};
    use clap::Parser;
    use httpmock::MockServer;
    use serde_json::{Value, json};
    use tower::util::ServiceExt;

    fn app(extra: &[&str]) -> Router {
        let mut argv = vec!["quota-relay", "--upstream-scheme", "http"];
        argv.extend_from_slice(extra);
        let args = Args::parse_from(argv);
        proxy_router(Arc::new(AppState::from_args(&args).unwrap()))
    }

    fn chat_request(path: &str, content: &str) -> Request {
        http::Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .header("authorization", "Bearer gsk-test")
            .header("cookie", "session=secret")
            .body(Body::from(
                json!({"messages": [{"role": "user", "content": content}]}).to_string(),
            ))
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn root_serves_the_status_page() {
        let app = app(&[]);

        for (method, path) in [("GET", "/"), ("POST", "/index.html")] {
            let request = http::Request::builder()
                .method(method)
                .uri(path)
                .body(Body::empty())
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
            assert!(content_type.starts_with("text/html"));
            assert_eq!(body_string(response).await, "Proxy is Running！");
        }
    }

    #[tokio::test]
    async fn options_is_answered_before_routing() {
        let request = http::Request::builder()
            .method("OPTIONS")
            .uri("/api.groq.com/openai/v1/chat/completions")
            .body(Body::empty())
            .unwrap();
        let response = app(&[]).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "GET, POST, OPTIONS");
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
            "Content-Type, Authorization"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], "86400");
        assert!(body_string(response).await.is_empty());
    }

    #[tokio::test]
    async fn forwards_and_strips_reasoning() {
        let upstream = MockServer::start_async().await;
        let mock = upstream
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST)
                    .path("/openai/v1/chat/completions")
                    .header("authorization", "Bearer gsk-test")
                    .header("content-type", "application/json");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"choices":[{"message":{"content":"<think>reasoning</think>  answer"}}]}"#);
            })
            .await;

        let app = app(&["--rate-limit", "127.0.0.1=30/6000"]);
        let path = format!("/{}/openai/v1/chat/completions", upstream.address());
        let response = app.oneshot(chat_request(&path, "hello")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::REFERRER_POLICY], "no-referrer");
        assert_eq!(headers["x-ratelimit-remaining"], "29");
        assert_eq!(headers["x-tokenlimit-remaining"], "5998.75");
        assert!(headers.contains_key("x-proxy-date"));

        let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["choices"][0]["message"]["content"], "answer");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn json_without_reasoning_is_relayed_verbatim() {
        let upstream = MockServer::start_async().await;
        let raw = r#"{ "choices": [ { "message": { "content": "  hi  " } } ] }"#;
        upstream
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path("/v1/models");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(raw);
            })
            .await;

        let request = http::Request::builder()
            .uri(format!("/{}/v1/models", upstream.address()))
            .body(Body::empty())
            .unwrap();
        let response = app(&[]).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        // not a limited upstream
        assert!(!response.headers().contains_key("x-ratelimit-remaining"));
        assert_eq!(body_string(response).await, raw);
    }

    #[tokio::test]
    async fn upstream_status_and_non_json_bodies_pass_through() {
        let upstream = MockServer::start_async().await;
        upstream
            .mock_async(|when, then| {
                when.path("/missing");
                then.status(404)
                    .header("content-type", "text/plain")
                    .body("not here");
            })
            .await;

        let request = http::Request::builder()
            .uri(format!("/{}/missing", upstream.address()))
            .body(Body::empty())
            .unwrap();
        let response = app(&[]).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "not here");
    }

    #[tokio::test]
    async fn third_request_over_a_two_request_budget_is_refused() {
        let upstream = MockServer::start_async().await;
        let mock = upstream
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/v1/chat/completions");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"choices":[]}"#);
            })
            .await;

        let app = app(&["--rate-limit", "127.0.0.1=2/6000"]);
        let path = format!("/{}/v1/chat/completions", upstream.address());

        for expected in ["1", "0"] {
            let response = app.clone().oneshot(chat_request(&path, "hi")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()["x-ratelimit-remaining"], expected);
        }

        let response = app.oneshot(chat_request(&path, "hi")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "60");
        let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(
            body["message"],
            "Rate limit exceeded. Max 2 requests per 60 seconds."
        );

        mock.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn token_budget_refuses_without_forwarding() {
        let upstream = MockServer::start_async().await;
        let mock = upstream
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/v1/chat/completions");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"choices":[]}"#);
            })
            .await;

        // "hello" costs 1.25, so only one fits in a budget of 2
        let app = app(&["--rate-limit", "127.0.0.1=30/2"]);
        let path = format!("/{}/v1/chat/completions", upstream.address());

        let first = app.clone().oneshot(chat_request(&path, "hello")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()["x-tokenlimit-remaining"], "0.75");

        let second = app.clone().oneshot(chat_request(&path, "hello")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

        // a rejected estimate was not committed, so a cheap request still fits
        let third = app.oneshot(chat_request(&path, "ab")).await.unwrap();
        assert_eq!(third.status(), StatusCode::OK);
        assert_eq!(third.headers()["x-tokenlimit-remaining"], "0.25");

        mock.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn malformed_body_is_still_admitted() {
        let upstream = MockServer::start_async().await;
        upstream
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST)
                    .path("/v1/chat/completions")
                    .body("{not json");
                then.status(400)
                    .header("content-type", "application/json")
                    .body(r#"{"error":{"message":"invalid json"}}"#);
            })
            .await;

        let app = app(&["--rate-limit", "127.0.0.1=30/6000"]);
        let request = http::Request::builder()
            .method("POST")
            .uri(format!("/{}/v1/chat/completions", upstream.address()))
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "29");
        assert_eq!(response.headers()["x-tokenlimit-remaining"], "6000");
    }

    #[tokio::test]
    async fn unreachable_upstream_becomes_a_json_500() {
        let request = http::Request::builder()
            .uri("/127.0.0.1:1/v1/models")
            .body(Body::empty())
            .unwrap();
        let response = app(&[]).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[header::REFERRER_POLICY], "no-referrer");

        let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["error"], "Internal Server Error");
        assert!(body["message"].is_string());
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn oversized_body_to_a_limited_host_is_a_bad_request() {
        let app = app(&["--max-body-bytes", "8"]);
        let response = app
            .oneshot(chat_request("/api.groq.com/openai/v1/chat/completions", "hello"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unlimited_hosts_stream_bodies_past_the_buffer_cap() {
        let upstream = MockServer::start_async().await;
        let payload = "x".repeat(64 * 1024);
        let mock = upstream
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST)
                    .path("/upload")
                    .body(payload.as_str());
                then.status(201).body("stored");
            })
            .await;

        // the cap only applies to bodies buffered for token estimation
        let app = app(&["--max-body-bytes", "8"]);
        let request = http::Request::builder()
            .method("POST")
            .uri(format!("/{}/upload", upstream.address()))
            .header("content-type", "application/octet-stream")
            .body(Body::from(payload.clone()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(!response.headers().contains_key("x-ratelimit-remaining"));
        assert_eq!(body_string(response).await, "stored");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn json_that_does_not_parse_is_relayed_unchanged() {
        let upstream = MockServer::start_async().await;
        upstream
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/v1/chat/completions");
                then.status(502)
                    .header("content-type", "application/json")
                    .body("<html>oops</html>");
            })
            .await;

        let app = app(&["--rate-limit", "127.0.0.1=30/6000"]);
        let path = format!("/{}/v1/chat/completions", upstream.address());
        let response = app.oneshot(chat_request(&path, "hello")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("application/json"));
        assert_eq!(body_string(response).await, "<html>oops</html>");
    }
}
