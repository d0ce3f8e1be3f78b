//! # Auth Module
//!
//! Telegram login verification and account linking:
//! - Login Widget signature and freshness verification
//! - Find-or-create of the local user and profile
//! - JWT access/refresh token issuance and validation
//! - AuthedUser extractor for protected routes

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod models;
pub mod resolver;
pub mod routes;
pub mod telegram;
pub mod tokens;


pub use routes::auth_routes;
