// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traced adapter wrappers for consistent observability

use crate::auth::{AuthError, AuthProvider};
use crate::transport::{Transport, TransportError, TransportStream};
use async_trait::async_trait;
use tracing::Instrument;

/// Wrapper that adds tracing to any Transport
#[derive(Clone)]
pub struct TracedTransport<T> {
    inner: T,
}

impl<T> TracedTransport<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: Transport> Transport for TracedTransport<T> {
    async fn open_stream(&self) -> Result<TransportStream, TransportError> {
        let span = tracing::info_span!("transport.open");
        async {
            tracing::debug!("opening stream");

            let start = std::time::Instant::now();
            let result = self.inner.open_stream().await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            match &result {
                Ok(_) => tracing::debug!(elapsed_ms, "stream opened"),
                Err(e) => tracing::warn!(elapsed_ms, error = %e, "open failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

/// Wrapper that adds tracing to any AuthProvider
#[derive(Clone)]
pub struct TracedAuthProvider<A> {
    inner: A,
}

impl<A> TracedAuthProvider<A> {
    pub fn new(inner: A) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<A: AuthProvider> AuthProvider for TracedAuthProvider<A> {
    async fn token(&self) -> Result<String, AuthError> {
        let result = self.inner.token().await;
        // Never log the token itself
        match &result {
            Ok(token) => tracing::trace!(empty = token.is_empty(), "token fetched"),
            Err(e) => tracing::warn!(error = %e, "token fetch failed"),
        }
        result
    }
}

#[cfg(test)]
#[path = "traced_tests.rs"]
mod tests;
