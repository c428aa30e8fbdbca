// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Tether session engine
//!
//! Drives coordination sessions over a [`tether_adapters::Transport`],
//! reconnects them under a scenario, and builds coordination recipes on top.

mod current;
mod error;
pub mod patterns;
pub mod scenario;
pub mod semaphore;
pub mod session;

pub use current::CurrentSession;
pub use error::EngineError;
pub use patterns::{DistributedLock, LockStatus, PublisherStatus, ServiceDiscoveryPublisher};
pub use scenario::{Observer, Scenario, ScenarioDeps, ScenarioEvent, ScenarioHandle};
pub use semaphore::{AcquireOptions, SemaphoreManager};
pub use session::{
    event_channel, Attempt, AttemptEvent, CoordinationSession, RequestIds, SessionConfig,
    SessionEvent, SessionHandle, SessionStatus,
};
