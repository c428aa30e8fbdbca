// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
// Enable coverage(off) attribute for excluding test infrastructure
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Adapters for the coordination service's external collaborators

pub mod auth;
pub mod clock;
pub mod traced;
pub mod transport;

pub use auth::{AuthError, AuthProvider, NopAuthProvider, StaticTokenProvider};
pub use clock::TokioClock;
pub use traced::{TracedAuthProvider, TracedTransport};
pub use transport::{StreamSender, Transport, TransportError, TransportStream};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub use auth::FakeAuthProvider;
#[cfg(any(test, feature = "test-support"))]
pub use transport::{FakeTransport, TransportCall};
