use serde_json::Value;

// request payload -> approximate token cost
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, payload: &Value) -> f64;
}

// fixed number of tokens per character of message content
#[derive(Debug, Clone, Copy)]
pub struct CharRatioEstimator {
    tokens_per_char: f64,
}

impl CharRatioEstimator {
    pub fn new(tokens_per_char: f64) -> Self {
        Self { tokens_per_char }
    }
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self::new(0.25)
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, payload: &Value) -> f64 {
        let Some(messages) = payload.get("messages").and_then(Value::as_array) else {
            return 0.0;
        };

        messages
            .iter()
            .map(|msg| content_len(msg) as f64 * self.tokens_per_char)
            .sum()
    }
}

// Length in UTF-16 code units, the unit most client SDKs count in
fn content_len(message: &Value) -> usize {
    message
        .get("content")
        .and_then(Value::as_str)
        .map(|s| s.encode_utf16().count())
        .unwrap_or(0)
}

// empty or non-json bodies cost 0
pub fn estimate_body(estimator: &dyn TokenEstimator, body: &[u8]) -> f64 {
    if body.is_empty() {
        return 0.0;
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(payload) => estimator.estimate(&payload),
        Err(e) => {
            tracing::warn!("Error parsing request body, estimating 0 tokens: {}", e);
            0.0
        }
    }
}
