// src/services/mod.rs
//
// Shared services used across modules

pub mod rate_limit;

// Re-export commonly used types for convenience
pub use rate_limit::{RateLimitConfig, RateLimitService};
