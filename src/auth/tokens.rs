//! Session issuance: HS256 access/refresh token pairs

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use tracing::{debug, warn};

use super::error::LoginError;
use super::models::{Claims, TokenPair, TokenType, User};
use crate::common::generate_token_id;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),

    #[error("expected a {expected:?} token, got {actual:?}")]
    WrongType {
        expected: TokenType,
        actual: TokenType,
    },
}

/// Mints and checks credentials for a resolved identity
pub trait TokenIssuer: Send + Sync {
    fn issue(&self, user: &User) -> Result<TokenPair, LoginError>;

    /// Decode and validate a token of the given type
    fn decode(&self, token: &str, expected: TokenType) -> Result<Claims, TokenError>;
}

pub struct JwtTokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtTokenIssuer {
    pub fn new(secret: &str, access_ttl_seconds: i64, refresh_ttl_seconds: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl: Duration::seconds(access_ttl_seconds),
            refresh_ttl: Duration::seconds(refresh_ttl_seconds),
        }
    }

    fn encode_claims(
        &self,
        user_id: &str,
        token_type: TokenType,
        ttl: Duration,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            token_type,
            iat: now.timestamp() as usize,
            exp: (now + ttl).timestamp().max(0) as usize,
            jti: generate_token_id(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
    }
}

impl TokenIssuer for JwtTokenIssuer {
    fn issue(&self, user: &User) -> Result<TokenPair, LoginError> {
        let access_token = self.encode_claims(&user.id, TokenType::Access, self.access_ttl)?;
        let refresh_token = self.encode_claims(&user.id, TokenType::Refresh, self.refresh_ttl)?;

        debug!(user_id = %user.id, "Issued token pair");

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    fn decode(&self, token: &str, expected: TokenType) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                warn!(error = %e, "JWT token validation failed");
                e
            })?
            .claims;

        if claims.token_type != expected {
            warn!(
                user_id = %claims.sub,
                expected = ?expected,
                actual = ?claims.token_type,
                "JWT token presented with wrong type"
            );
            return Err(TokenError::WrongType {
                expected,
                actual: claims.token_type,
            });
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> JwtTokenIssuer {
        JwtTokenIssuer::new("test_secret_key", 900, 3600)
    }

    fn user() -> User {
        User {
            id: "U_TEST01".to_string(),
            username: "tg_42".to_string(),
            first_name: Some("Ann".to_string()),
            last_name: None,
            telegram_id: Some("42".to_string()),
            telegram_username: None,
            photo_url: None,
            auth_provider: "telegram".to_string(),
            is_active: true,
            created_at: None,
        }
    }

    #[test]
    fn test_issue_produces_typed_pair() {
        let pair = issuer().issue(&user()).unwrap();
        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 900);
        assert_ne!(pair.access_token, pair.refresh_token);

        let access = issuer().decode(&pair.access_token, TokenType::Access).unwrap();
        assert_eq!(access.sub, "U_TEST01");
        assert_eq!(access.token_type, TokenType::Access);

        let refresh = issuer().decode(&pair.refresh_token, TokenType::Refresh).unwrap();
        assert_eq!(refresh.sub, "U_TEST01");
        assert!(refresh.exp > access.exp);
        assert_ne!(refresh.jti, access.jti);
    }

    #[test]
    fn test_access_token_is_not_a_refresh_token() {
        let pair = issuer().issue(&user()).unwrap();
        let result = issuer().decode(&pair.access_token, TokenType::Refresh);
        assert!(matches!(
            result,
            Err(TokenError::WrongType {
                expected: TokenType::Refresh,
                actual: TokenType::Access
            })
        ));
    }

    #[test]
    fn test_validation_fails_with_wrong_secret() {
        let pair = issuer().issue(&user()).unwrap();
        let other = JwtTokenIssuer::new("wrong_secret_key", 900, 3600);
        let result = other.decode(&pair.access_token, TokenType::Access);
        assert!(matches!(result, Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let expired = JwtTokenIssuer::new("test_secret_key", -60, -60);
        let pair = expired.issue(&user()).unwrap();
        let result = expired.decode(&pair.access_token, TokenType::Access);
        assert!(matches!(result, Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_claims_serialize_token_type_lowercase() {
        let claims = Claims {
            sub: "U_TEST01".to_string(),
            token_type: TokenType::Refresh,
            iat: 1,
            exp: 2,
            jti: "K_X".to_string(),
        };
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["token_type"], "refresh");
    }
}
