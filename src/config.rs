use clap::Parser;
use std::str::FromStr;
use std::time::Duration;

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "quota-relay")]
#[command(about = "Path-addressed forwarding proxy with per-upstream request/token quotas")]
pub struct Args {
    // Address to bind the proxy listener on
    #[arg(long, env = "PROXY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    // Port to run the proxy on
    #[arg(short, long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    // Scheme used to build the upstream url from the request path
    #[arg(long, default_value = "https")]
    pub upstream_scheme: String,

    // Rate limited upstreams, repeatable
    // Example: "api.groq.com=30/6000"
    #[arg(
        long = "rate-limit",
        value_name = "HOST=REQUESTS/TOKENS",
        default_value = "api.groq.com=30/6000"
    )]
    pub rate_limits: Vec<RateLimitProfile>,

    // Rate limit window in seconds, at least one
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub rate_window: u64,

    // Estimated tokens per character of message content
    #[arg(long, default_value_t = 0.25, value_parser = parse_token_ratio)]
    pub tokens_per_char: f64,

    // Upstream request timeout in seconds
    #[arg(long, default_value_t = 120)]
    pub upstream_timeout: u64,

    // Largest request body buffered for a rate limited upstream
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    pub max_body_bytes: usize,

    // Serve /health and /metrics on this port when set
    #[arg(long)]
    pub metrics_port: Option<u16>,
}

impl Args {
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }
}

// token counts only ever grow inside a window, so the ratio can't be negative
fn parse_token_ratio(s: &str) -> Result<f64, String> {
    let ratio: f64 = s
        .parse()
        .map_err(|e| format!("invalid ratio '{}': {}", s, e))?;
    if !ratio.is_finite() || ratio < 0.0 {
        return Err(format!("ratio must be a non-negative number, got '{}'", s));
    }
    Ok(ratio)
}

// request and token ceilings for every path that mentions host
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitProfile {
    pub host: String,
    pub max_requests: u32,
    pub max_tokens: u32,
}

impl FromStr for RateLimitProfile {
    type Err = String;

    // "api.groq.com=30/6000"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, limits) = s
            .split_once('=')
            .ok_or_else(|| format!("expected HOST=REQUESTS/TOKENS, got '{}'", s))?;
        let (requests, tokens) = limits
            .split_once('/')
            .ok_or_else(|| format!("expected REQUESTS/TOKENS after '=', got '{}'", limits))?;

        let host = host.trim();
        if host.is_empty() {
            return Err("rate limit host must not be empty".to_string());
        }

        let max_requests = requests
            .trim()
            .parse()
            .map_err(|e| format!("invalid request limit '{}': {}", requests, e))?;
        let max_tokens = tokens
            .trim()
            .parse()
            .map_err(|e| format!("invalid token limit '{}': {}", tokens, e))?;

        Ok(Self {
            host: host.to_string(),
            max_requests,
            max_tokens,
        })
    }
}
