//! # API Shared
//!
//! Shared utilities and definitions for OPAL APIs.
//!
//! Contains:
//! - Wire types documented with OpenAPI schemas (`dto` module)
//! - Shared services like `HealthService`
//! - Header-based authentication resolving the acting user
//!
//! Used by `api-rest` for common functionality.

pub mod auth;
pub mod dto;
pub mod health;

pub use auth::{ApiKeyAuth, AuthError, API_KEY_HEADER, USER_HEADER};
pub use dto::*;
pub use health::HealthService;
