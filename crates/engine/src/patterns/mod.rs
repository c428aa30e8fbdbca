// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordination recipes built on a scenario

mod discovery;
mod lock;

pub use discovery::{PublisherStatus, ServiceDiscoveryPublisher};
pub use lock::{DistributedLock, LockStatus};

use tether_core::{Status, StatusCode};

/// The request failed only because its session went away; reconnect handles it
fn lost_with_session(status: &Status) -> bool {
    matches!(
        status.code,
        StatusCode::SessionLost | StatusCode::Cancelled | StatusCode::NoActiveSession
    )
}
