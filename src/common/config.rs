// src/common/config.rs
//! Process configuration read from the environment (and `.env` via dotenv)

use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Default freshness window for Telegram login payloads (24 hours)
pub const DEFAULT_AUTH_MAX_AGE_SECONDS: i64 = 86_400;
pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
pub const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("environment variable {name} has invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt_secret: String,
    /// Bot token used as the HMAC secret. `None` makes every login fail closed.
    pub telegram_bot_token: Option<String>,
    pub auth_max_age_seconds: i64,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://tg_login.db".to_string());

        let jwt_secret = env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::Missing("JWT_SECRET"))?;

        // An empty token is treated the same as an absent one
        let telegram_bot_token = env::var("TELEGRAM_BOT_TOKEN")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            database_url,
            jwt_secret,
            telegram_bot_token,
            auth_max_age_seconds: parse_or(
                "TELEGRAM_AUTH_MAX_AGE_SECONDS",
                DEFAULT_AUTH_MAX_AGE_SECONDS,
            )?,
            access_token_ttl_seconds: parse_or(
                "ACCESS_TOKEN_TTL_SECONDS",
                DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            )?,
            refresh_token_ttl_seconds: parse_or(
                "REFRESH_TOKEN_TTL_SECONDS",
                DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            )?,
            port: parse_or("PORT", 8080)?,
            cors_origins,
        })
    }
}

/// Parse an optional env var, falling back to `default` when unset.
/// A set-but-unparseable value is an error rather than a silent default.
pub fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
            name,
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}
