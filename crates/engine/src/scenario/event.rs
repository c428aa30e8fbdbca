// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Events delivered to a scenario's observer

use crate::session::SessionEvent;
use std::time::Duration;
use tether_core::{RequestId, SemaphoreDescription, SessionId, Status};

/// Everything an observer hears about, in delivery order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioEvent {
    /// A session is active and current; operations may be issued
    SessionStarted {
        session_id: SessionId,
    },
    /// The current session is gone; reconnection follows unless given up
    Failure {
        status: Status,
    },
    Reconnecting {
        /// One-based count of consecutive failed attempts
        attempt: u32,
        delay: Duration,
    },
    /// Retries are exhausted or the failure is not retryable
    GaveUp {
        status: Status,
    },
    CreateResult {
        req_id: RequestId,
        name: String,
        status: Status,
    },
    UpdateResult {
        req_id: RequestId,
        name: String,
        status: Status,
    },
    DeleteResult {
        req_id: RequestId,
        name: String,
        status: Status,
    },
    AcquirePending {
        req_id: RequestId,
        name: String,
    },
    AcquireResult {
        req_id: RequestId,
        name: String,
        acquired: bool,
        status: Status,
    },
    ReleaseResult {
        req_id: RequestId,
        name: String,
        released: bool,
        status: Status,
    },
    DescribeResult {
        req_id: RequestId,
        name: String,
        status: Status,
        description: Option<SemaphoreDescription>,
        watch_added: bool,
    },
    DescribeChanged {
        req_id: RequestId,
        name: String,
        data_changed: bool,
        owners_changed: bool,
    },
}

impl ScenarioEvent {
    /// Stable name for logging
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioEvent::SessionStarted { .. } => "session:started",
            ScenarioEvent::Failure { .. } => "session:failed",
            ScenarioEvent::Reconnecting { .. } => "session:reconnecting",
            ScenarioEvent::GaveUp { .. } => "session:gave_up",
            ScenarioEvent::CreateResult { .. } => "semaphore:create",
            ScenarioEvent::UpdateResult { .. } => "semaphore:update",
            ScenarioEvent::DeleteResult { .. } => "semaphore:delete",
            ScenarioEvent::AcquirePending { .. } => "semaphore:acquire_pending",
            ScenarioEvent::AcquireResult { .. } => "semaphore:acquire",
            ScenarioEvent::ReleaseResult { .. } => "semaphore:release",
            ScenarioEvent::DescribeResult { .. } => "semaphore:describe",
            ScenarioEvent::DescribeChanged { .. } => "semaphore:changed",
        }
    }

    /// Semaphore the event is about, if any
    pub fn semaphore(&self) -> Option<&str> {
        match self {
            ScenarioEvent::CreateResult { name, .. }
            | ScenarioEvent::UpdateResult { name, .. }
            | ScenarioEvent::DeleteResult { name, .. }
            | ScenarioEvent::AcquirePending { name, .. }
            | ScenarioEvent::AcquireResult { name, .. }
            | ScenarioEvent::ReleaseResult { name, .. }
            | ScenarioEvent::DescribeResult { name, .. }
            | ScenarioEvent::DescribeChanged { name, .. } => Some(name),
            ScenarioEvent::SessionStarted { .. }
            | ScenarioEvent::Failure { .. }
            | ScenarioEvent::Reconnecting { .. }
            | ScenarioEvent::GaveUp { .. } => None,
        }
    }

    /// Translate a request result; lifecycle events are the supervisor's to handle
    pub(crate) fn from_result(event: SessionEvent) -> Option<Self> {
        let event = match event {
            SessionEvent::Started { .. } | SessionEvent::Failure { .. } | SessionEvent::Stopped => {
                return None
            }
            SessionEvent::CreateResult {
                req_id,
                name,
                status,
            } => ScenarioEvent::CreateResult {
                req_id,
                name,
                status,
            },
            SessionEvent::UpdateResult {
                req_id,
                name,
                status,
            } => ScenarioEvent::UpdateResult {
                req_id,
                name,
                status,
            },
            SessionEvent::DeleteResult {
                req_id,
                name,
                status,
            } => ScenarioEvent::DeleteResult {
                req_id,
                name,
                status,
            },
            SessionEvent::AcquirePending { req_id, name } => {
                ScenarioEvent::AcquirePending { req_id, name }
            }
            SessionEvent::AcquireResult {
                req_id,
                name,
                acquired,
                status,
            } => ScenarioEvent::AcquireResult {
                req_id,
                name,
                acquired,
                status,
            },
            SessionEvent::ReleaseResult {
                req_id,
                name,
                released,
                status,
            } => ScenarioEvent::ReleaseResult {
                req_id,
                name,
                released,
                status,
            },
            SessionEvent::DescribeResult {
                req_id,
                name,
                status,
                description,
                watch_added,
            } => ScenarioEvent::DescribeResult {
                req_id,
                name,
                status,
                description,
                watch_added,
            },
            SessionEvent::DescribeChanged {
                req_id,
                name,
                data_changed,
                owners_changed,
            } => ScenarioEvent::DescribeChanged {
                req_id,
                name,
                data_changed,
                owners_changed,
            },
        };
        Some(event)
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
