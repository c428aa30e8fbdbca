// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-side session state
//!
//! [`Session`] is the caller's view of one logical session across start
//! attempts: the id the service assigned, the protection key, and the
//! sequence number of the latest attempt. It is only written by whoever
//! drives reconnects.
//!
//! [`KeepAlive`] counts unanswered pings on a single attempt.

use crate::protocol::{SessionId, SessionStart};
use crate::status::Status;
use std::time::Duration;

/// Connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// First attempt, no id yet
    Connecting,
    Active,
    /// Resuming a known id on a new stream
    Reconnecting,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Closed => "closed",
        }
    }
}

/// Inputs that drive session transitions
#[derive(Debug, Clone)]
pub enum SessionInput {
    /// A new start attempt is about to be sent
    Start,
    Started { session_id: SessionId },
    Failed { status: Status },
    Stopped,
}

/// One logical session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Option<SessionId>,
    pub state: SessionState,
    /// Sequence number of the most recent start attempt
    pub seq_no: u64,
    pub protection_key: Vec<u8>,
}

impl Session {
    pub fn new(protection_key: Vec<u8>) -> Self {
        Self {
            id: None,
            state: SessionState::Closed,
            seq_no: 0,
            protection_key,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn transition(&self, input: SessionInput) -> Session {
        match input {
            SessionInput::Start => Session {
                state: if self.id.is_some() {
                    SessionState::Reconnecting
                } else {
                    SessionState::Connecting
                },
                seq_no: self.seq_no.saturating_add(1),
                ..self.clone()
            },
            SessionInput::Started { session_id } => Session {
                id: Some(session_id),
                state: SessionState::Active,
                ..self.clone()
            },
            SessionInput::Failed { status } => Session {
                // A rejected id is never offered again
                id: if status.requires_new_session() {
                    None
                } else {
                    self.id
                },
                state: SessionState::Closed,
                ..self.clone()
            },
            SessionInput::Stopped => Session {
                state: SessionState::Closed,
                ..self.clone()
            },
        }
    }

    /// Start request for the current attempt, without a token
    pub fn start_request(
        &self,
        path: &str,
        timeout: Duration,
        description: &str,
    ) -> SessionStart {
        SessionStart {
            path: path.to_string(),
            session_id: self.id,
            timeout,
            description: description.to_string(),
            seq_no: self.seq_no,
            protection_key: self.protection_key.clone(),
            token: String::new(),
        }
    }
}

/// What the keepalive wants done on an interval tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveAction {
    SendPing { opaque: u64 },
    /// Too many pings went unanswered
    Expired { missed: u32 },
}

/// Ping bookkeeping for one attempt
#[derive(Debug, Clone)]
pub struct KeepAlive {
    max_missed: u32,
    unanswered: u32,
    last_sent: u64,
}

impl KeepAlive {
    pub fn new(max_missed: u32) -> Self {
        Self {
            max_missed: max_missed.max(1),
            unanswered: 0,
            last_sent: 0,
        }
    }

    pub fn unanswered(&self) -> u32 {
        self.unanswered
    }

    pub fn on_interval(&mut self) -> KeepAliveAction {
        if self.unanswered >= self.max_missed {
            return KeepAliveAction::Expired {
                missed: self.unanswered,
            };
        }
        self.unanswered += 1;
        self.last_sent += 1;
        KeepAliveAction::SendPing {
            opaque: self.last_sent,
        }
    }

    /// A pong for any ping we sent proves the stream is alive.
    /// Returns false for an opaque value we never sent.
    pub fn on_pong(&mut self, opaque: u64) -> bool {
        if opaque == 0 || opaque > self.last_sent {
            return false;
        }
        self.unanswered = 0;
        true
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
