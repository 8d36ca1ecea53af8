use std::sync::Arc;
use crate::config::Args;
use crate::rate_limit::UsageLimiter;
use crate::tokens::{CharRatioEstimator, TokenEstimator};
// app's shared state

pub struct AppState {
    pub client: reqwest::Client,
    pub upstream_scheme: String,            // "https" outside of tests
    pub limiter: UsageLimiter,              // one usage window per limited upstream
    pub estimator: Arc<dyn TokenEstimator>, // request body -> token cost
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn from_args(args: &Args) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(args.upstream_timeout())
            .build()?;

        Ok(Self {
            client,
            upstream_scheme: args.upstream_scheme.clone(),
            limiter: UsageLimiter::new(args.rate_limits.clone(), args.rate_window()),
            estimator: Arc::new(CharRatioEstimator::new(args.tokens_per_char)),
            max_body_bytes: args.max_body_bytes,
        })
    }
}
