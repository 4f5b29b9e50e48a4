//! Bearer-token plumbing for authenticated ESI endpoints.
//!
//! The OAuth authorization flow itself lives outside this crate; the
//! fetch engine only consumes an access token and its expiry through the
//! [`TokenSource`] seam.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

/// Errors produced while obtaining an access token
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// A required credential was not provided
    #[error("missing credential: {0}")]
    MissingCredential(String),

    /// The token expired before it could be used
    #[error("token expired at epoch {0}")]
    Expired(i64),
}

/// A bearer token and its expiry, as produced by the OAuth flow.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    /// The bearer token value.
    pub access_token: String,
    /// Expiry as seconds since the Unix epoch; `0` means unknown.
    #[serde(default)]
    pub expires_at: i64,
}

impl AccessToken {
    /// Create a token with a known expiry (`0` for unknown).
    pub fn new(access_token: impl Into<String>, expires_at: i64) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
        }
    }

    /// True when the expiry is known and in the past.
    pub fn is_expired(&self) -> bool {
        self.expires_at > 0 && self.expires_at <= Utc::now().timestamp()
    }
}

/// Source of access tokens for the fetch engine.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Produce a token valid for immediate use.
    async fn access_token(&self) -> Result<AccessToken, AuthError>;
}

/// Token source backed by the `ESI_ACCESS_TOKEN` environment variable,
/// for headless runs where a token was acquired out of band.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvTokenSource;

/// Name of the environment variable read by [`EnvTokenSource`].
pub const ACCESS_TOKEN_ENV: &str = "ESI_ACCESS_TOKEN";

#[async_trait]
impl TokenSource for EnvTokenSource {
    async fn access_token(&self) -> Result<AccessToken, AuthError> {
        let token = std::env::var(ACCESS_TOKEN_ENV)
            .map_err(|_| AuthError::MissingCredential(ACCESS_TOKEN_ENV.to_string()))?;
        Ok(AccessToken::new(token, 0))
    }
}

/// Fixed token source, for tests and pre-acquired tokens.
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: AccessToken,
}

impl StaticTokenSource {
    /// Wrap an already-acquired token.
    pub fn new(token: AccessToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<AccessToken, AuthError> {
        if self.token.is_expired() {
            return Err(AuthError::Expired(self.token.expires_at));
        }
        Ok(self.token.clone())
    }
}
