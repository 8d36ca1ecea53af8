use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// JSON body of every error the proxy produces itself
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub timestamp: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            timestamp: iso_timestamp(),
        }
    }
}

// Health endpoint response format
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

// ISO-8601 with millisecond precision, e.g. 2024-05-01T12:00:00.000Z
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
