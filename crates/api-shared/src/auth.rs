//! Header-based authentication.
//!
//! A request is authenticated when it carries the configured API key in `x-api-key` and names
//! the acting user in `x-opal-user`. Anything else resolves to an anonymous actor, which the
//! controller rejects as unauthenticated for every user-scoped operation.

use opal_core::{Actor, User};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const USER_HEADER: &str = "x-opal-user";

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing {API_KEY_HEADER} header")]
    MissingApiKey,
    #[error("invalid API key")]
    InvalidApiKey,
    #[error("missing {USER_HEADER} header")]
    MissingUser,
    #[error("invalid username: {0}")]
    InvalidUser(String),
}

/// Validates API keys against the key resolved at startup.
#[derive(Clone)]
pub struct ApiKeyAuth {
    expected_key: String,
}

impl std::fmt::Debug for ApiKeyAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyAuth").finish_non_exhaustive()
    }
}

impl ApiKeyAuth {
    pub fn new(expected_key: impl Into<String>) -> Self {
        Self {
            expected_key: expected_key.into(),
        }
    }

    /// Validates the provided API key.
    ///
    /// Returns `Ok(())` if the key is valid, or an error if invalid or missing.
    pub fn validate_api_key(&self, provided_key: Option<&str>) -> Result<(), AuthError> {
        match provided_key {
            None => Err(AuthError::MissingApiKey),
            Some(key) if key == self.expected_key => Ok(()),
            Some(_) => Err(AuthError::InvalidApiKey),
        }
    }

    /// Resolves the authenticated user from raw header values.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] naming the first missing or invalid credential.
    pub fn authenticate(
        &self,
        api_key: Option<&str>,
        username: Option<&str>,
    ) -> Result<User, AuthError> {
        self.validate_api_key(api_key)?;
        let username = username.ok_or(AuthError::MissingUser)?;
        User::new(username).map_err(|_| AuthError::InvalidUser(username.to_string()))
    }

    /// Like [`ApiKeyAuth::authenticate`], but falls back to an anonymous actor.
    pub fn actor(&self, api_key: Option<&str>, username: Option<&str>) -> Actor {
        match self.authenticate(api_key, username) {
            Ok(user) => Actor::Authenticated(user),
            Err(e) => {
                tracing::debug!("request is unauthenticated: {}", e);
                Actor::Anonymous
            }
        }
    }
}
