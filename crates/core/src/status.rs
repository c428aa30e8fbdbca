// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operation status carried by terminal results
//!
//! Protocol-level outcomes are values, not Rust errors: every terminal event
//! carries a `Status` so a rejected acquire and a lost session are reported
//! through the same channel as a successful one.

use serde::{Deserialize, Serialize};

/// Outcome class of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Success,
    AlreadyExists,
    NotFound,
    BadRequest,
    PreconditionFailed,
    Timeout,
    /// The service does not recognise the session (unknown id, wrong key, stale seq_no)
    BadSession,
    /// The session outlived its timeout while detached
    SessionExpired,
    /// The stream carrying the session broke while the request was in flight
    SessionLost,
    Cancelled,
    Unavailable,
    TransportError,
    NoActiveSession,
    Unauthenticated,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Success => "success",
            StatusCode::AlreadyExists => "already_exists",
            StatusCode::NotFound => "not_found",
            StatusCode::BadRequest => "bad_request",
            StatusCode::PreconditionFailed => "precondition_failed",
            StatusCode::Timeout => "timeout",
            StatusCode::BadSession => "bad_session",
            StatusCode::SessionExpired => "session_expired",
            StatusCode::SessionLost => "session_lost",
            StatusCode::Cancelled => "cancelled",
            StatusCode::Unavailable => "unavailable",
            StatusCode::TransportError => "transport_error",
            StatusCode::NoActiveSession => "no_active_session",
            StatusCode::Unauthenticated => "unauthenticated",
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a completed operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    /// Human readable detail, empty on success
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub issues: String,
}

impl Status {
    pub fn success() -> Self {
        Self {
            code: StatusCode::Success,
            issues: String::new(),
        }
    }

    pub fn new(code: StatusCode, issues: impl Into<String>) -> Self {
        Self {
            code,
            issues: issues.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == StatusCode::Success
    }

    /// Whether the session id must be discarded before the next start attempt
    pub fn requires_new_session(&self) -> bool {
        matches!(
            self.code,
            StatusCode::BadSession | StatusCode::SessionExpired
        )
    }

    /// Whether the failure is worth retrying by re-establishing the session
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.code,
            StatusCode::BadRequest | StatusCode::Unauthenticated
        )
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::success()
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.issues.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.issues)
        }
    }
}
