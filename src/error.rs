use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::models::ErrorBody;

// everything that can end a proxied request early
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Rate limit exceeded. Max {limit} requests per {window_secs} seconds.")]
    RequestLimitExceeded { limit: u32, window_secs: u64 },

    #[error("Token limit exceeded. Max {limit} tokens per {window_secs} seconds.")]
    TokenLimitExceeded { limit: u32, window_secs: u64 },

    #[error("request to {url} failed: {source}")]
    UpstreamUnreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("malformed body: {0}")]
    MalformedBody(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::RequestLimitExceeded { .. } | ProxyError::TokenLimitExceeded { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ProxyError::UpstreamUnreachable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::MalformedBody(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn retry_after(&self) -> Option<u64> {
        match self {
            ProxyError::RequestLimitExceeded { window_secs, .. }
            | ProxyError::TokenLimitExceeded { window_secs, .. } => Some(*window_secs),
            _ => None,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match &self {
            ProxyError::RequestLimitExceeded { .. } | ProxyError::TokenLimitExceeded { .. } => {
                tracing::warn!("Admission rejected: {}", self);
                ErrorBody::new("Too Many Requests", self.to_string())
            }
            ProxyError::UpstreamUnreachable { .. } => {
                // full transport detail stays in the log
                tracing::error!("Failed to fetch: {}", self);
                ErrorBody::new("Internal Server Error", "Failed to reach upstream server")
            }
            ProxyError::MalformedBody(_) => {
                tracing::warn!("Rejected request: {}", self);
                ErrorBody::new("Bad Request", self.to_string())
            }
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = self.retry_after() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
