use axum::Json;

use crate::models::{HealthResponse, iso_timestamp};

// health handler
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: iso_timestamp(),
    })
}
