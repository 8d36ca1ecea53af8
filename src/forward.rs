use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, Method, Uri, header},
    response::Response,
};

use crate::error::ProxyError;
use crate::metrics::REWRITTEN_TOTAL;
use crate::post_process;

// The only request headers that leave the proxy
static FORWARDED_HEADERS: [HeaderName; 3] = [
    header::ACCEPT,
    header::CONTENT_TYPE,
    header::AUTHORIZATION,
];

// Connection-scoped response headers that must not be relayed
static HOP_BY_HOP: [HeaderName; 6] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

// "/api.groq.com/openai/v1/models?x=1" -> "https://api.groq.com/openai/v1/models?x=1"
pub fn target_url(scheme: &str, uri: &Uri) -> String {
    let path = uri.path().trim_start_matches('/');
    match uri.query() {
        Some(query) => format!("{}://{}?{}", scheme, path, query),
        None => format!("{}://{}", scheme, path),
    }
}

pub fn filter_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::new();
    for name in &FORWARDED_HEADERS {
        for value in headers.get_all(name) {
            forwarded.append(name.clone(), value.clone());
        }
    }
    forwarded
}

// Issue the outbound call. GET and HEAD never carry a body.
pub async fn send(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    headers: &HeaderMap,
    body: reqwest::Body,
) -> Result<reqwest::Response, ProxyError> {
    let has_body = method != Method::GET && method != Method::HEAD;

    let mut request = client
        .request(method, url)
        .headers(filter_request_headers(headers));
    if has_body {
        request = request.body(body);
    }

    request
        .send()
        .await
        .map_err(|source| ProxyError::UpstreamUnreachable {
            url: url.to_string(),
            source,
        })
}

// json bodies are buffered for reasoning stripping, the rest is streamed
pub async fn relay(upstream: reqwest::Response, url: &str) -> Result<Response, ProxyError> {
    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");

    let body = if post_process::is_json(&headers) {
        let bytes = upstream
            .bytes()
            .await
            .map_err(|source| ProxyError::UpstreamUnreachable {
                url: url.to_string(),
                source,
            })?;

        match post_process::rewrite_completion(&bytes) {
            Ok(Some(rewritten)) => {
                REWRITTEN_TOTAL.inc();
                headers.remove(header::CONTENT_LENGTH);
                Body::from(rewritten)
            }
            Ok(None) => Body::from(bytes),
            Err(e) => {
                tracing::debug!("Relaying JSON response from {} unmodified: {}", url, e);
                Body::from(bytes)
            }
        }
    } else {
        Body::from_stream(upstream.bytes_stream())
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}
