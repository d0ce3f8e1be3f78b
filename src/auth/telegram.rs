//! Telegram Login Widget verification
//!
//! A widget payload is trusted when:
//! - its `hash` equals HMAC-SHA256(check string) keyed by SHA-256(bot token), and
//! - its `auth_date` is no older than the freshness window.
//!
//! The check string is every field except `hash`, rendered `key=value`, sorted
//! by key and joined with `\n`.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::error::LoginError;
use super::models::{AuthPayload, VerifiedLogin};

type HmacSha256 = Hmac<Sha256>;

/// Verifies signed login payloads against the bot token.
///
/// Built once at startup and shared through `AppState`. Holds the keyed HMAC
/// state so the bot token itself is not kept around.
#[derive(Clone)]
pub struct TelegramVerifier {
    keyed_mac: Option<HmacSha256>,
    max_age_seconds: i64,
}

impl fmt::Debug for TelegramVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramVerifier")
            .field("configured", &self.is_configured())
            .field("max_age_seconds", &self.max_age_seconds)
            .finish()
    }
}

impl TelegramVerifier {
    /// `bot_token = None` yields a verifier that rejects everything.
    pub fn new(bot_token: Option<&str>, max_age_seconds: i64) -> Self {
        let keyed_mac = bot_token
            .and_then(|token| HmacSha256::new_from_slice(&Sha256::digest(token.as_bytes())).ok());

        Self {
            keyed_mac,
            max_age_seconds,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.keyed_mac.is_some()
    }

    pub fn max_age_seconds(&self) -> i64 {
        self.max_age_seconds
    }

    /// Verify against the current wall clock
    pub fn verify(&self, payload: AuthPayload) -> Result<VerifiedLogin, LoginError> {
        self.verify_at(payload, Utc::now().timestamp())
    }

    /// Verify with an explicit `now` (unix seconds)
    pub fn verify_at(&self, mut payload: AuthPayload, now: i64) -> Result<VerifiedLogin, LoginError> {
        if !self.is_configured() {
            return Err(LoginError::ProviderNotConfigured);
        }

        let supplied = payload
            .remove("hash")
            .ok_or(LoginError::UntrustedPayload("missing hash"))?;
        if payload.get("auth_date").is_none() {
            return Err(LoginError::UntrustedPayload("missing auth_date"));
        }

        let expected = self.sign(&payload)?;
        if !bool::from(expected.as_bytes().ct_eq(supplied.as_bytes())) {
            warn!(
                telegram_id = ?payload.get("id"),
                "Telegram login signature mismatch"
            );
            return Err(LoginError::UntrustedPayload("signature mismatch"));
        }

        let auth_date: i64 = payload
            .get("auth_date")
            .and_then(|v| v.parse().ok())
            .ok_or(LoginError::UntrustedPayload("auth_date is not an integer"))?;

        // No upper bound: a future auth_date is accepted.
        // An age too large for i64 is outdated.
        let age = now.checked_sub(auth_date).unwrap_or(i64::MAX);
        if age > self.max_age_seconds {
            warn!(
                telegram_id = ?payload.get("id"),
                age_seconds = age,
                max_age_seconds = self.max_age_seconds,
                "Telegram login payload is outdated"
            );
            return Err(LoginError::OutdatedPayload);
        }

        let telegram_id: i64 = payload
            .get("id")
            .and_then(|v| v.parse().ok())
            .ok_or(LoginError::UntrustedPayload("missing or malformed id"))?;

        debug!(telegram_id, age_seconds = age, "Telegram login payload verified");

        let field = |key: &str| payload.get(key).map(str::to_string);
        Ok(VerifiedLogin {
            telegram_id,
            auth_date,
            first_name: field("first_name"),
            last_name: field("last_name"),
            username: field("username"),
            photo_url: field("photo_url"),
        })
    }

    /// Lowercase hex HMAC of the payload's check string. `hash` is ignored if present.
    pub fn sign(&self, payload: &AuthPayload) -> Result<String, LoginError> {
        let mut mac = self
            .keyed_mac
            .clone()
            .ok_or(LoginError::ProviderNotConfigured)?;
        mac.update(check_string(payload).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

/// Canonical check string: sorted `key=value` lines without `hash`
pub fn check_string(payload: &AuthPayload) -> String {
    payload
        .iter()
        .filter(|(key, _)| *key != "hash")
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("\n")
}
