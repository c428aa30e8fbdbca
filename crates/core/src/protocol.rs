// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session protocol messages
//!
//! One stream carries one session attempt. The client opens with
//! [`SessionRequest::SessionStart`]; every semaphore request carries a
//! client-chosen `req_id` and every response to it echoes that id, so
//! responses may arrive in any order.
//!
//! The types derive serde so a concrete transport can pick any encoding.

use crate::status::Status;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limit used for registry-style semaphores where every acquire succeeds
pub const UNBOUNDED_LIMIT: u64 = u64::MAX;

/// Correlation id of a request within one session
pub type RequestId = u64;

/// Session id assigned by the coordination service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// First message on every stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStart {
    /// Coordination node path
    pub path: String,
    /// `None` requests a new session; `Some` resumes an existing one
    pub session_id: Option<SessionId>,
    /// How long the service keeps the session alive while detached
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub description: String,
    /// Strictly increasing across start attempts of one logical session
    pub seq_no: u64,
    pub protection_key: Vec<u8>,
    /// Credential from the auth provider, empty when unauthenticated
    #[serde(default)]
    pub token: String,
}

/// Which parts of a semaphore to describe, and whether to watch for changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescribeOptions {
    pub include_owners: bool,
    pub include_waiters: bool,
    /// Notify once when the semaphore payload changes
    pub watch_data: bool,
    /// Notify once when the holder set changes
    pub watch_owners: bool,
}

impl DescribeOptions {
    pub fn owners() -> Self {
        Self {
            include_owners: true,
            ..Self::default()
        }
    }

    pub fn watching_owners() -> Self {
        Self {
            include_owners: true,
            watch_owners: true,
            ..Self::default()
        }
    }

    pub fn is_watch(&self) -> bool {
        self.watch_data || self.watch_owners
    }
}

/// Holder or waiter entry in a semaphore description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemaphoreSession {
    pub session_id: SessionId,
    /// Arrival order within the semaphore
    pub order_id: u64,
    pub count: u64,
    pub data: Vec<u8>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

/// Snapshot of a semaphore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemaphoreDescription {
    pub name: String,
    /// The semaphore's own payload (set on create/update)
    pub data: Vec<u8>,
    /// Sum of holder counts
    pub count: u64,
    pub limit: u64,
    pub ephemeral: bool,
    pub owners: Vec<SemaphoreSession>,
    pub waiters: Vec<SemaphoreSession>,
}

impl SemaphoreDescription {
    /// Payloads of all current holders, in acquisition order
    pub fn owner_payloads(&self) -> Vec<&[u8]> {
        self.owners.iter().map(|o| o.data.as_slice()).collect()
    }
}

/// Client-to-service messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionRequest {
    SessionStart(SessionStart),
    SessionStop,
    Ping {
        opaque: u64,
    },
    Pong {
        opaque: u64,
    },
    CreateSemaphore {
        req_id: RequestId,
        name: String,
        limit: u64,
        data: Vec<u8>,
    },
    UpdateSemaphore {
        req_id: RequestId,
        name: String,
        data: Vec<u8>,
    },
    DeleteSemaphore {
        req_id: RequestId,
        name: String,
        force: bool,
    },
    AcquireSemaphore {
        req_id: RequestId,
        name: String,
        count: u64,
        /// `None` waits forever, `Some(ZERO)` fails immediately if busy
        #[serde(default, with = "humantime_serde")]
        timeout: Option<Duration>,
        data: Vec<u8>,
        ephemeral: bool,
    },
    ReleaseSemaphore {
        req_id: RequestId,
        name: String,
    },
    DescribeSemaphore {
        req_id: RequestId,
        name: String,
        options: DescribeOptions,
    },
}

impl SessionRequest {
    pub fn req_id(&self) -> Option<RequestId> {
        match self {
            SessionRequest::CreateSemaphore { req_id, .. }
            | SessionRequest::UpdateSemaphore { req_id, .. }
            | SessionRequest::DeleteSemaphore { req_id, .. }
            | SessionRequest::AcquireSemaphore { req_id, .. }
            | SessionRequest::ReleaseSemaphore { req_id, .. }
            | SessionRequest::DescribeSemaphore { req_id, .. } => Some(*req_id),
            SessionRequest::SessionStart(_)
            | SessionRequest::SessionStop
            | SessionRequest::Ping { .. }
            | SessionRequest::Pong { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionRequest::SessionStart(_) => "session_start",
            SessionRequest::SessionStop => "session_stop",
            SessionRequest::Ping { .. } => "ping",
            SessionRequest::Pong { .. } => "pong",
            SessionRequest::CreateSemaphore { .. } => "create_semaphore",
            SessionRequest::UpdateSemaphore { .. } => "update_semaphore",
            SessionRequest::DeleteSemaphore { .. } => "delete_semaphore",
            SessionRequest::AcquireSemaphore { .. } => "acquire_semaphore",
            SessionRequest::ReleaseSemaphore { .. } => "release_semaphore",
            SessionRequest::DescribeSemaphore { .. } => "describe_semaphore",
        }
    }
}

/// Service-to-client messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionResponse {
    SessionStarted {
        session_id: SessionId,
        #[serde(with = "humantime_serde")]
        timeout: Duration,
    },
    SessionStopped {
        session_id: SessionId,
    },
    /// Session-level failure; the stream is finished after this
    Failure {
        status: Status,
    },
    Ping {
        opaque: u64,
    },
    Pong {
        opaque: u64,
    },
    CreateSemaphoreResult {
        req_id: RequestId,
        status: Status,
    },
    UpdateSemaphoreResult {
        req_id: RequestId,
        status: Status,
    },
    DeleteSemaphoreResult {
        req_id: RequestId,
        status: Status,
    },
    /// The acquire was queued; a terminal result follows later
    AcquireSemaphorePending {
        req_id: RequestId,
    },
    AcquireSemaphoreResult {
        req_id: RequestId,
        status: Status,
        acquired: bool,
    },
    ReleaseSemaphoreResult {
        req_id: RequestId,
        status: Status,
        released: bool,
    },
    DescribeSemaphoreResult {
        req_id: RequestId,
        status: Status,
        description: Option<SemaphoreDescription>,
        watch_added: bool,
    },
    DescribeSemaphoreChanged {
        req_id: RequestId,
        data_changed: bool,
        owners_changed: bool,
    },
}

impl SessionResponse {
    pub fn req_id(&self) -> Option<RequestId> {
        match self {
            SessionResponse::CreateSemaphoreResult { req_id, .. }
            | SessionResponse::UpdateSemaphoreResult { req_id, .. }
            | SessionResponse::DeleteSemaphoreResult { req_id, .. }
            | SessionResponse::AcquireSemaphorePending { req_id }
            | SessionResponse::AcquireSemaphoreResult { req_id, .. }
            | SessionResponse::ReleaseSemaphoreResult { req_id, .. }
            | SessionResponse::DescribeSemaphoreResult { req_id, .. }
            | SessionResponse::DescribeSemaphoreChanged { req_id, .. } => Some(*req_id),
            SessionResponse::SessionStarted { .. }
            | SessionResponse::SessionStopped { .. }
            | SessionResponse::Failure { .. }
            | SessionResponse::Ping { .. }
            | SessionResponse::Pong { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionResponse::SessionStarted { .. } => "session_started",
            SessionResponse::SessionStopped { .. } => "session_stopped",
            SessionResponse::Failure { .. } => "failure",
            SessionResponse::Ping { .. } => "ping",
            SessionResponse::Pong { .. } => "pong",
            SessionResponse::CreateSemaphoreResult { .. } => "create_semaphore_result",
            SessionResponse::UpdateSemaphoreResult { .. } => "update_semaphore_result",
            SessionResponse::DeleteSemaphoreResult { .. } => "delete_semaphore_result",
            SessionResponse::AcquireSemaphorePending { .. } => "acquire_semaphore_pending",
            SessionResponse::AcquireSemaphoreResult { .. } => "acquire_semaphore_result",
            SessionResponse::ReleaseSemaphoreResult { .. } => "release_semaphore_result",
            SessionResponse::DescribeSemaphoreResult { .. } => "describe_semaphore_result",
            SessionResponse::DescribeSemaphoreChanged { .. } => "describe_semaphore_changed",
        }
    }
}
