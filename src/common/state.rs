// Application state shared across all modules

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::auth::telegram::TelegramVerifier;
use crate::auth::tokens::TokenIssuer;
use crate::services::RateLimitService;

/// Application state containing database pool, services, and configuration.
/// Everything is constructed in `main` and passed in; nothing here is a global.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub verifier: Arc<TelegramVerifier>,
    pub tokens: Arc<dyn TokenIssuer>,
    pub rate_limit_service: Arc<RateLimitService>,
}
