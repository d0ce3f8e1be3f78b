//! Authentication extractors for Axum

use async_trait::async_trait;
use axum::{
    extract::{Extension, Form, FromRequest, FromRequestParts, Json, Request},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        request::Parts,
    },
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::models::{AuthPayload, TokenType};
use super::resolver::find_user;
use crate::common::{ApiError, AppState};

/// Authenticated user extractor
///
/// Validates the bearer access token and loads the user from the database.
/// Inactive users are refused.
#[derive(Debug)]
pub struct AuthedUser {
    pub id: String,
    pub username: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(app_state): Extension<Arc<AppState>> =
            Extension::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::InternalServer("missing app state".to_string()))?;

        let token = match parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
        {
            Some(t) => t,
            None => {
                warn!("Authentication failed: missing Authorization header");
                return Err(ApiError::Unauthorized("missing auth".into()));
            }
        };

        // Handle "Bearer <token>" format or raw token
        let bare_token = token.strip_prefix("Bearer ").unwrap_or(token);

        let claims = app_state
            .tokens
            .decode(bare_token, TokenType::Access)
            .map_err(|_| ApiError::Unauthorized("invalid token".into()))?;

        let user = find_user(&app_state.db, &claims.sub).await.map_err(|e| {
            error!(
                error = %e,
                user_id = %claims.sub,
                "Database error during user lookup in authentication"
            );
            ApiError::DatabaseError(e)
        })?;

        match user {
            Some(u) if u.is_active => {
                debug!(user_id = %u.id, "User authentication successful via extractor");
                Ok(AuthedUser {
                    id: u.id,
                    username: u.username,
                })
            }
            Some(u) => {
                warn!(user_id = %u.id, "Authentication failed: user is inactive");
                Err(ApiError::Unauthorized("user inactive".into()))
            }
            None => {
                warn!(user_id = %claims.sub, "Authentication failed: user not found in database");
                Err(ApiError::Unauthorized("user not found".into()))
            }
        }
    }
}

/// Login widget payload from either a JSON or a form-encoded body
#[derive(Debug)]
pub struct LoginPayload(pub AuthPayload);

#[async_trait]
impl<S> FromRequest<S> for LoginPayload
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| {
                ct.trim_start()
                    .to_ascii_lowercase()
                    .starts_with("application/x-www-form-urlencoded")
            })
            .unwrap_or(false);

        if is_form {
            let Form(fields) = Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(|e| {
                    warn!(error = %e, "Rejected malformed form login body");
                    ApiError::BadRequest(e.body_text())
                })?;
            return Ok(LoginPayload(AuthPayload::from_pairs(fields)));
        }

        let Json(value) = Json::<serde_json::Value>::from_request(req, state)
            .await
            .map_err(|e| {
                warn!(error = %e, "Rejected malformed JSON login body");
                ApiError::BadRequest(e.body_text())
            })?;

        let payload = AuthPayload::from_json(value).map_err(ApiError::from)?;
        Ok(LoginPayload(payload))
    }
}
