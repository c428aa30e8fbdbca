// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authentication token providers
//!
//! A token is fetched once per stream and attached to the session start
//! request. Providers are passed in explicitly; there is no global one.

#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeAuthProvider;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from token providers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("token unavailable: {0}")]
    Unavailable(String),
    #[error("credentials rejected: {0}")]
    Rejected(String),
}

/// Source of credentials for session starts
#[async_trait]
pub trait AuthProvider: Clone + Send + Sync + 'static {
    async fn token(&self) -> Result<String, AuthError>;
}

/// Provider for unauthenticated deployments; always yields an empty token
#[derive(Clone, Copy, Debug, Default)]
pub struct NopAuthProvider;

#[async_trait]
impl AuthProvider for NopAuthProvider {
    async fn token(&self) -> Result<String, AuthError> {
        Ok(String::new())
    }
}

/// Provider returning a fixed token
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String, AuthError> {
        Ok(self.token.clone())
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
