use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::config::RateLimitProfile;
use crate::error::ProxyError;

// Usage window - request and token totals for one upstream
#[derive(Debug, Clone, Copy)]
pub struct UsageWindow {
    pub request_count: u32,
    pub token_count: f64,
    pub window_start: Instant,
}

impl UsageWindow {
    pub fn new(now: Instant) -> Self {
        Self {
            request_count: 0,
            token_count: 0.0,
            window_start: now,
        }
    }

    // start a fresh window once a full window has elapsed
    pub fn reset_if_expired(&mut self, now: Instant, window: Duration) -> bool {
        if now.saturating_duration_since(self.window_start) < window {
            return false;
        }
        self.request_count = 0;
        self.token_count = 0.0;
        self.window_start = now;
        true
    }
}

// What is left of the budget right after an admission
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quota {
    pub remaining_requests: u32,
    pub remaining_tokens: f64,
}

// one usage window per profile, the entry lock covers reset-check-commit
pub struct UsageLimiter {
    profiles: Vec<RateLimitProfile>,
    windows: DashMap<String, UsageWindow>,
    window: Duration,
}

impl UsageLimiter {
    pub fn new(profiles: Vec<RateLimitProfile>, window: Duration) -> Self {
        let now = Instant::now();
        let windows = DashMap::new();
        for profile in &profiles {
            windows.insert(profile.host.clone(), UsageWindow::new(now));
            tracing::info!(
                "Rate limit for {}: {} requests / {} tokens per {:?}",
                profile.host,
                profile.max_requests,
                profile.max_tokens,
                window
            );
        }

        Self {
            profiles,
            windows,
            window,
        }
    }

    // First profile whose host appears in the request path
    pub fn profile_for(&self, path: &str) -> Option<&RateLimitProfile> {
        self.profiles.iter().find(|p| path.contains(p.host.as_str()))
    }

    pub fn admit(&self, profile: &RateLimitProfile, estimate: f64) -> Result<Quota, ProxyError> {
        self.admit_at(profile, estimate, Instant::now())
    }

    pub fn admit_at(
        &self,
        profile: &RateLimitProfile,
        estimate: f64,
        now: Instant,
    ) -> Result<Quota, ProxyError> {
        let window_secs = self.window.as_secs();

        let mut entry = self
            .windows
            .entry(profile.host.clone())
            .or_insert_with(|| UsageWindow::new(now));

        if entry.reset_if_expired(now, self.window) {
            tracing::debug!("Usage window for {} reset", profile.host);
        }

        if entry.request_count >= profile.max_requests {
            return Err(ProxyError::RequestLimitExceeded {
                limit: profile.max_requests,
                window_secs,
            });
        }

        if entry.token_count + estimate > f64::from(profile.max_tokens) {
            return Err(ProxyError::TokenLimitExceeded {
                limit: profile.max_tokens,
                window_secs,
            });
        }

        entry.token_count += estimate;
        entry.request_count += 1;

        Ok(Quota {
            remaining_requests: profile.max_requests - entry.request_count,
            remaining_tokens: f64::from(profile.max_tokens) - entry.token_count,
        })
    }

    // Copy of the current window for a host
    #[cfg(test)]
    pub fn usage(&self, host: &str) -> Option<UsageWindow> {
        self.windows.get(host).map(|w| *w)
    }
}
