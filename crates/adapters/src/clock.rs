// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock backed by the tokio timer
//!
//! Follows `tokio::time::pause()`/`advance()` in tests, so a fake service and
//! the engine's sleeps and intervals share one notion of time.

use std::time::Instant;
use tether_core::Clock;

#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}
