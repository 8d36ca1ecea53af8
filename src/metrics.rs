use lazy_static::lazy_static;
use prometheus::{Counter, Histogram, register_counter, register_histogram};


lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("relay_requests_total", "Total number of requests").unwrap();
    pub static ref REJECTED_TOTAL: Counter =
        register_counter!("relay_rejected_total", "Requests refused by the usage limiter").unwrap();
    pub static ref UPSTREAM_ERRORS: Counter =
        register_counter!("relay_upstream_errors_total", "Upstream calls that failed").unwrap();
    pub static ref REWRITTEN_TOTAL: Counter = register_counter!(
        "relay_rewritten_responses_total",
        "Responses with a reasoning block stripped"
    )
    .unwrap();
    pub static ref UPSTREAM_LATENCY: Histogram = register_histogram!(
        "relay_upstream_latency_seconds",
        "Upstream round trip latency in seconds"
    )
    .unwrap();
}
