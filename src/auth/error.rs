//! Login flow error taxonomy

use thiserror::Error;
use tracing::error;

use crate::common::ApiError;

/// Reason a login was rejected. Each gate of the flow produces its own variant
/// so callers can tell forgery from staleness from server trouble.
#[derive(Debug, Error)]
pub enum LoginError {
    /// Missing `hash`/`auth_date`/`id`, malformed values, or signature mismatch
    #[error("untrusted payload: {0}")]
    UntrustedPayload(&'static str),

    #[error("payload auth_date is outside the freshness window")]
    OutdatedPayload,

    #[error("login provider secret is not configured")]
    ProviderNotConfigured,

    #[error("identity resolution failed: {0}")]
    Resolution(#[from] sqlx::Error),

    /// Insert hit a uniqueness conflict but no identity exists for the external id
    #[error("conflicting record without matching identity for external id {0}")]
    IdentityConflict(String),

    #[error("token issuance failed: {0}")]
    Issuance(#[from] jsonwebtoken::errors::Error),
}

impl From<LoginError> for ApiError {
    fn from(err: LoginError) -> Self {
        match err {
            LoginError::UntrustedPayload(_) => ApiError::UntrustedPayload,
            LoginError::OutdatedPayload => ApiError::OutdatedPayload,
            LoginError::ProviderNotConfigured => {
                error!("Telegram login attempted but TELEGRAM_BOT_TOKEN is not configured");
                ApiError::ProviderNotConfigured
            }
            LoginError::Resolution(e) => ApiError::DatabaseError(e),
            LoginError::IdentityConflict(external_id) => {
                error!(external_id = %external_id, "Identity insert conflicted but re-read found nothing");
                ApiError::InternalServer("identity resolution failed".to_string())
            }
            LoginError::Issuance(e) => {
                error!(error = %e, "JWT encoding error during login");
                ApiError::InternalServer("token issuance failed".to_string())
            }
        }
    }
}
