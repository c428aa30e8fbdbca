// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! tether-core: pure types and state machines for the coordination client
//!
//! This crate provides:
//! - Status codes and the session protocol messages
//! - The semaphore state machine and a model of a coordination node
//! - Client session state, keepalive and reconnect backoff
//! - Scenario settings
//!
//! Nothing here performs I/O or spawns tasks.

pub mod clock;
pub mod id;
pub mod status;

pub mod protocol;
pub mod semaphore;
pub mod node;

pub mod backoff;
pub mod session;
pub mod settings;

pub use backoff::{BackoffPolicy, RetryAction, RetryState};
pub use clock::{Clock, FakeClock, SystemClock};
pub use id::{KeyGen, RandomKeyGen, SequentialKeyGen};
pub use node::{CoordinationNode, Outbound, StartOutcome, StreamId};
pub use protocol::{
    DescribeOptions, RequestId, SemaphoreDescription, SemaphoreSession, SessionId,
    SessionRequest, SessionResponse, SessionStart, UNBOUNDED_LIMIT,
};
pub use semaphore::{Semaphore, SemaphoreInput, SemaphoreOutcome};
pub use session::{KeepAlive, KeepAliveAction, Session, SessionInput, SessionState};
pub use settings::{ScenarioSettings, SessionSettings, SettingsError, DEFAULT_COORDINATION_NODE};
pub use status::{Status, StatusCode};
