// src/services/rate_limit.rs
//! Fixed-window, per-IP rate limiting for the credential endpoints

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub login_per_ip_limit: u32,
    pub window_seconds: u32,
    pub whitelist_ips: Vec<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            login_per_ip_limit: 20, // 20 login/refresh attempts per window per IP
            window_seconds: 60,
            whitelist_ips: Vec::new(),
        }
    }
}

impl RateLimitConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // RATE_LIMIT_ENABLED - set to "false" to disable rate limiting
        if let Ok(enabled) = env::var("RATE_LIMIT_ENABLED") {
            config.enabled = enabled.to_lowercase() != "false";
        }

        if let Ok(limit) = env::var("RATE_LIMIT_LOGIN_PER_IP") {
            if let Ok(val) = limit.parse::<u32>() {
                config.login_per_ip_limit = val;
            }
        }

        if let Ok(window) = env::var("RATE_LIMIT_WINDOW_SECONDS") {
            if let Ok(val) = window.parse::<u32>() {
                config.window_seconds = val;
            }
        }

        // RATE_LIMIT_WHITELIST_IPS - comma-separated list of whitelisted IPs
        if let Ok(whitelist) = env::var("RATE_LIMIT_WHITELIST_IPS") {
            config.whitelist_ips = whitelist
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        config
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds as u64)
    }
}

#[derive(Debug, Clone)]
struct RateLimitState {
    count: u32,
    window_start: Instant,
}

impl RateLimitState {
    fn new() -> Self {
        Self {
            count: 0,
            window_start: Instant::now(),
        }
    }

    fn is_expired(&self, window_duration: Duration) -> bool {
        self.window_start.elapsed() > window_duration
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RateLimitResult {
    Allowed,
    Limited { retry_after: u32 },
}

#[derive(Debug, Clone)]
pub struct RateLimitService {
    config: RateLimitConfig,
    rate_limiter: Arc<RwLock<HashMap<String, RateLimitState>>>,
}

impl RateLimitService {
    pub fn new(config: RateLimitConfig) -> Self {
        info!(
            enabled = config.enabled,
            login_per_ip_limit = config.login_per_ip_limit,
            window_seconds = config.window_seconds,
            whitelist_ips = ?config.whitelist_ips,
            "Initializing RateLimitService"
        );
        Self {
            config,
            rate_limiter: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count one attempt from `ip` and decide whether it may proceed
    pub async fn check_login_attempt(&self, ip: &str) -> RateLimitResult {
        if !self.config.enabled || self.config.whitelist_ips.iter().any(|w| w == ip) {
            return RateLimitResult::Allowed;
        }

        let window_duration = self.config.window();
        let mut limiter = self.rate_limiter.write().await;
        let state = limiter
            .entry(format!("ip:{}", ip))
            .or_insert_with(RateLimitState::new);

        if state.is_expired(window_duration) {
            *state = RateLimitState::new();
        }

        if state.count >= self.config.login_per_ip_limit {
            let elapsed = state.window_start.elapsed().as_secs() as u32;
            let retry_after = self.config.window_seconds.saturating_sub(elapsed).max(1);
            warn!(ip = %ip, retry_after, "Login rate limit exceeded");
            return RateLimitResult::Limited { retry_after };
        }

        state.count += 1;
        debug!(ip = %ip, count = state.count, "Login attempt counted");
        RateLimitResult::Allowed
    }

    /// Drop windows that have expired
    pub async fn cleanup_expired(&self) {
        let window_duration = self.config.window();
        let mut limiter = self.rate_limiter.write().await;
        let before = limiter.len();
        limiter.retain(|_, state| !state.is_expired(window_duration));
        debug!(removed = before - limiter.len(), "Cleaned up expired rate limit entries");
    }

    /// Periodically prune expired windows so the map does not grow unbounded
    pub fn start_cleanup_task(service: Arc<Self>) {
        let period = service.config.window().max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                service.cleanup_expired().await;
            }
        });
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.rate_limiter.read().await.len()
    }
}
