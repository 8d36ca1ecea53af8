mod health;
mod metrics;
mod proxy;

use axum::{Router, routing::get};
use std::sync::Arc;

use crate::state::AppState;

pub use health::health_handler;
pub use metrics::metrics_handler;
pub use proxy::proxy_handler;

// Every path on the main listener is a proxy target
pub fn proxy_router(state: Arc<AppState>) -> Router {
    Router::new().fallback(proxy_handler).with_state(state)
}

// Health and metrics live on their own listener so they never shadow a target
pub fn ops_router() -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
}
