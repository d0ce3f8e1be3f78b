//! Authentication data models

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;

use super::error::LoginError;

/// Provider name stored in `users.auth_provider`
pub const TELEGRAM_PROVIDER: &str = "telegram";

/// Prefix for usernames derived from a Telegram id (`tg_<id>`)
pub const TELEGRAM_USERNAME_PREFIX: &str = "tg_";

/// Which half of a token pair a JWT is
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims structure
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Claims {
    pub sub: String,
    pub token_type: TokenType,
    pub iat: usize,
    pub exp: usize,
    pub jti: String,
}

/// User database model
#[derive(FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub telegram_id: Option<String>,
    pub telegram_username: Option<String>,
    pub photo_url: Option<String>,
    pub auth_provider: String,
    pub is_active: bool,
    pub created_at: Option<String>,
}

impl User {
    /// First and last name joined, falling back to the Telegram username
    /// and then the local username
    pub fn display_name(&self) -> String {
        join_name(self.first_name.as_deref(), self.last_name.as_deref())
            .or_else(|| self.telegram_username.clone())
            .unwrap_or_else(|| self.username.clone())
    }
}

/// Profile database model, one row per user
#[derive(FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Profile {
    pub user_id: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// Raw login widget payload. Untrusted until it passes verification.
///
/// Values are kept as the strings the provider signed; integers arriving in a
/// JSON body are rendered in decimal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthPayload {
    fields: BTreeMap<String, String>,
}

impl AuthPayload {
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Build from a JSON object of string/integer values. Nulls are dropped;
    /// nested objects and arrays cannot be part of a signed payload.
    pub fn from_json(value: serde_json::Value) -> Result<Self, LoginError> {
        let serde_json::Value::Object(map) = value else {
            return Err(LoginError::UntrustedPayload("payload is not an object"));
        };

        let mut fields = BTreeMap::new();
        for (key, value) in map {
            let rendered = match value {
                serde_json::Value::Null => continue,
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                    return Err(LoginError::UntrustedPayload("nested value in payload"))
                }
            };
            fields.insert(key, rendered);
        }
        Ok(Self { fields })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.fields.remove(key)
    }

    /// Fields in ascending key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A payload that passed both the signature check and the freshness gate
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedLogin {
    pub telegram_id: i64,
    pub auth_date: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub photo_url: Option<String>,
}

impl VerifiedLogin {
    pub fn local_username(&self) -> String {
        format!("{}{}", TELEGRAM_USERNAME_PREFIX, self.telegram_id)
    }

    /// Display name for a freshly created profile
    pub fn display_name(&self) -> String {
        join_name(self.first_name.as_deref(), self.last_name.as_deref())
            .or_else(|| self.username.clone())
            .unwrap_or_else(|| self.local_username())
    }
}

fn join_name(first: Option<&str>, last: Option<&str>) -> Option<String> {
    let joined = [first, last]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.is_empty()).then_some(joined)
}

/// Issued credential pair
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// Public user fields returned to clients
#[derive(Serialize, Debug, Clone)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub telegram_id: Option<String>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            display_name: user.display_name(),
            telegram_id: user.telegram_id.clone(),
        }
    }
}

/// Body of POST /api/auth/token/refresh
#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}
