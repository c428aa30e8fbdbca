// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake auth provider for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{AuthError, AuthProvider};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct State {
    token: String,
    failure: Option<AuthError>,
    requests: u32,
}

/// Fake auth provider that counts token requests and can be made to fail
#[derive(Clone, Default)]
pub struct FakeAuthProvider {
    state: Arc<Mutex<State>>,
}

impl FakeAuthProvider {
    pub fn new(token: impl Into<String>) -> Self {
        let provider = Self::default();
        provider.set_token(token);
        provider
    }

    pub fn set_token(&self, token: impl Into<String>) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).token = token.into();
    }

    /// Fail every request with `error` until cleared with `None`
    pub fn set_failure(&self, error: Option<AuthError>) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).failure = error;
    }

    /// Number of times a token was requested
    pub fn requests(&self) -> u32 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).requests
    }
}

#[async_trait]
impl AuthProvider for FakeAuthProvider {
    async fn token(&self) -> Result<String, AuthError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.requests += 1;
        match &state.failure {
            Some(error) => Err(error.clone()),
            None => Ok(state.token.clone()),
        }
    }
}
