use axum::http::{HeaderMap, header};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::error::ProxyError;

lazy_static! {
    // first reasoning block plus the whitespace after it
    static ref THINK_BLOCK: Regex = Regex::new(r"(?s)<think>.*?</think>\s*").unwrap();
}

pub fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false)
}

// drop the first <think> block and trim, None when there is no block
pub fn strip_reasoning(content: &str) -> Option<String> {
    if !THINK_BLOCK.is_match(content) {
        return None;
    }
    Some(THINK_BLOCK.replace(content, "").trim().to_string())
}

// Ok(None): relay the body exactly as received
pub fn rewrite_completion(body: &[u8]) -> Result<Option<Vec<u8>>, ProxyError> {
    let mut json: Value =
        serde_json::from_slice(body).map_err(|e| ProxyError::MalformedBody(e.to_string()))?;

    let Some(content) = json.pointer_mut("/choices/0/message/content") else {
        return Ok(None);
    };

    let Some(stripped) = content.as_str().and_then(strip_reasoning) else {
        return Ok(None);
    };
    *content = Value::String(stripped);

    serde_json::to_vec(&json)
        .map(Some)
        .map_err(|e| ProxyError::MalformedBody(e.to_string()))
}
