//! Authentication handlers

use axum::extract::{Extension, Json};
use std::sync::Arc;
use tracing::{info, warn};

use super::extractors::{AuthedUser, LoginPayload};
use super::models::{RefreshRequest, TokenType, UserSummary};
use super::resolver::{find_profile, find_user, resolve_identity, SqliteIdentityStore};
use crate::common::{safe_token_log, ApiError, AppState};

/// POST /api/auth/telegram
/// Logs a user in with a Telegram Login Widget payload
///
/// # Request Body
/// JSON or form-encoded widget fields:
/// `id`, `auth_date`, `hash` and optionally `first_name`, `last_name`,
/// `username`, `photo_url`.
///
/// # Response
/// ```json
/// {
///   "status": "success",
///   "user": { "id": "U_...", "username": "tg_42", "display_name": "...", "telegram_id": "42" },
///   "tokens": { "access_token": "...", "refresh_token": "...", "token_type": "Bearer", "expires_in": 900 }
/// }
/// ```
pub async fn telegram_login(
    Extension(state): Extension<Arc<AppState>>,
    LoginPayload(payload): LoginPayload,
) -> Result<Json<serde_json::Value>, ApiError> {
    info!(telegram_id = ?payload.get("id"), "Received Telegram login request");

    let login = state.verifier.verify(payload)?;

    let store = SqliteIdentityStore::new(state.db.clone());
    let resolved = resolve_identity(&store, &login).await?;
    let user = resolved.user;

    if !user.is_active {
        warn!(user_id = %user.id, "Telegram login refused for inactive user");
        return Err(ApiError::Unauthorized("user inactive".to_string()));
    }

    let tokens = state.tokens.issue(&user)?;

    info!(
        user_id = %user.id,
        telegram_id = login.telegram_id,
        created = resolved.created,
        "User authentication successful via Telegram"
    );

    Ok(Json(serde_json::json!({
        "status": "success",
        "user": UserSummary::from(&user),
        "tokens": tokens,
    })))
}

/// POST /api/auth/token/refresh
/// Exchanges a refresh token for a new token pair
///
/// # Request Body
/// ```json
/// { "refresh": "<refresh jwt>" }
/// ```
pub async fn refresh_token(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = state
        .tokens
        .decode(&body.refresh, TokenType::Refresh)
        .map_err(|e| {
            warn!(error = %e, token = %safe_token_log(&body.refresh), "Refresh token rejected");
            ApiError::Unauthorized("invalid refresh token".to_string())
        })?;

    let user = find_user(&state.db, &claims.sub)
        .await
        .map_err(ApiError::DatabaseError)?
        .filter(|u| u.is_active)
        .ok_or_else(|| {
            warn!(user_id = %claims.sub, "Refresh refused: user missing or inactive");
            ApiError::Unauthorized("user not found".to_string())
        })?;

    let tokens = state.tokens.issue(&user).map_err(ApiError::from)?;
    info!(user_id = %user.id, "Token pair refreshed");

    Ok(Json(serde_json::json!({
        "status": "success",
        "tokens": tokens,
    })))
}

/// GET /api/me
/// Returns the current authenticated user's information and profile
#[axum::debug_handler]
pub async fn me_handler(
    Extension(state): Extension<Arc<AppState>>,
    authed: AuthedUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = find_user(&state.db, &authed.id)
        .await
        .map_err(ApiError::DatabaseError)?
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;

    let profile = find_profile(&state.db, &authed.id)
        .await
        .map_err(ApiError::DatabaseError)?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "user": user,
        "profile": profile,
    })))
}

/// POST /api/auth/logout
/// Tokens are stateless, so logout is handled client-side.
/// This endpoint just confirms the request.
pub async fn logout_handler(authed: AuthedUser) -> Result<Json<serde_json::Value>, ApiError> {
    info!(user_id = %authed.id, username = %authed.username, "User logout successful");
    Ok(Json(serde_json::json!({
        "status": "success",
        "message": "Logout successful"
    })))
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
