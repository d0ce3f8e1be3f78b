//! Authentication routes

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use super::handlers;
use crate::rate_limit_middleware::login_rate_limit;

/// Creates and returns the authentication router
///
/// # Routes
/// - `POST /api/auth/telegram` - Telegram Login Widget authentication (rate limited)
/// - `POST /api/auth/token/refresh` - Exchange a refresh token (rate limited)
/// - `POST /api/auth/logout` - Logout (client-side token removal)
/// - `GET /api/me` - Get current user information
/// - `GET /health` - Liveness probe
pub fn auth_routes() -> Router {
    let credential_routes = Router::new()
        .route("/api/auth/telegram", post(handlers::telegram_login))
        .route("/api/auth/token/refresh", post(handlers::refresh_token))
        .route_layer(middleware::from_fn(login_rate_limit));

    Router::new()
        .merge(credential_routes)
        .route("/api/auth/logout", post(handlers::logout_handler))
        .route("/api/me", get(handlers::me_handler))
        .route("/health", get(handlers::health))
}
