// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session protocol engine
//!
//! A [`CoordinationSession`] drives exactly one session attempt over one
//! stream. It fetches a token, sends the start request, correlates every
//! response to its request by `req_id`, answers and sends pings, and stops
//! gracefully on request. It never reconnects; a failed attempt is reported
//! once as [`SessionEvent::Failure`] and the caller starts a new attempt.
//!
//! Every event is tagged with the attempt number so that late events from a
//! replaced attempt can be told apart from the current one.

mod driver;

use crate::error::EngineError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_adapters::{AuthProvider, Transport};
use tether_core::{
    RequestId, ScenarioSettings, SemaphoreDescription, SessionId, SessionRequest,
    SessionSettings, SessionStart, SessionState, Status,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Locally unique number of one start attempt
pub type Attempt = u64;

static NEXT_ATTEMPT: AtomicU64 = AtomicU64::new(1);

/// Source of request ids
///
/// Clones share one counter, so attempts started from clones of the same
/// [`SessionConfig`] never reuse an id.
#[derive(Debug, Clone)]
pub struct RequestIds(Arc<AtomicU64>);

impl Default for RequestIds {
    fn default() -> Self {
        Self(Arc::new(AtomicU64::new(1)))
    }
}

impl RequestIds {
    fn next(&self) -> RequestId {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// What the engine needs to start a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub path: String,
    pub description: String,
    pub settings: SessionSettings,
    pub request_ids: RequestIds,
}

impl SessionConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            description: String::new(),
            settings: SessionSettings::default(),
            request_ids: RequestIds::default(),
        }
    }

    pub fn from_settings(settings: &ScenarioSettings) -> Self {
        Self {
            path: settings.coordination_node.clone(),
            description: settings.description.clone(),
            settings: settings.session.clone(),
            request_ids: RequestIds::default(),
        }
    }

    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_request_ids(mut self, ids: RequestIds) -> Self {
        self.request_ids = ids;
        self
    }
}

/// Events produced by one session attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started {
        session_id: SessionId,
    },
    /// The attempt is over; emitted at most once and never after `Stopped`
    Failure {
        status: Status,
    },
    /// Graceful stop finished
    Stopped,
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
    /// The acquire is queued behind other holders
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
    /// A watch registered by an earlier describe fired
    DescribeChanged {
        req_id: RequestId,
        name: String,
        data_changed: bool,
        owners_changed: bool,
    },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Started { .. } => "started",
            SessionEvent::Failure { .. } => "failure",
            SessionEvent::Stopped => "stopped",
            SessionEvent::CreateResult { .. } => "create_result",
            SessionEvent::UpdateResult { .. } => "update_result",
            SessionEvent::DeleteResult { .. } => "delete_result",
            SessionEvent::AcquirePending { .. } => "acquire_pending",
            SessionEvent::AcquireResult { .. } => "acquire_result",
            SessionEvent::ReleaseResult { .. } => "release_result",
            SessionEvent::DescribeResult { .. } => "describe_result",
            SessionEvent::DescribeChanged { .. } => "describe_changed",
        }
    }
}

/// A session event tagged with the attempt that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptEvent {
    pub attempt: Attempt,
    pub event: SessionEvent,
}

pub type EventSender = mpsc::UnboundedSender<AttemptEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<AttemptEvent>;

/// Create a new event channel
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Observable state of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub session_id: Option<SessionId>,
}

enum Command {
    Request {
        req_id: RequestId,
        request: SessionRequest,
        local_timeout: Option<Duration>,
    },
    Stop {
        ack: Option<oneshot::Sender<()>>,
    },
}

/// Cloneable handle for sending requests on one attempt
#[derive(Clone)]
pub struct SessionHandle {
    attempt: Attempt,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SessionStatus>,
    request_ids: RequestIds,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("attempt", &self.attempt)
            .field("status", &self.status())
            .finish()
    }
}

impl SessionHandle {
    pub fn attempt(&self) -> Attempt {
        self.attempt
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.status().session_id
    }

    pub fn is_active(&self) -> bool {
        self.status().state == SessionState::Active
    }

    /// Wait until the attempt is active or over
    pub async fn wait_started(&self) -> Result<SessionId, EngineError> {
        let mut status = self.status.clone();
        let settled = status
            .wait_for(|s| matches!(s.state, SessionState::Active | SessionState::Closed))
            .await
            .map_err(|_| EngineError::SessionClosed)?;
        match (settled.state, settled.session_id) {
            (SessionState::Active, Some(id)) => Ok(id),
            _ => Err(EngineError::SessionClosed),
        }
    }

    /// Send a semaphore request built around a fresh `req_id`
    ///
    /// Fails immediately with [`EngineError::NoActiveSession`] unless the
    /// attempt is active. The result arrives later as an event carrying the
    /// returned id.
    pub fn send(
        &self,
        build: impl FnOnce(RequestId) -> SessionRequest,
    ) -> Result<RequestId, EngineError> {
        if !self.is_active() {
            return Err(EngineError::NoActiveSession);
        }
        let req_id = self.request_ids.next();
        let request = build(req_id);
        let local_timeout = match &request {
            SessionRequest::AcquireSemaphore { timeout, .. } => *timeout,
            _ => None,
        };
        self.commands
            .send(Command::Request {
                req_id,
                request,
                local_timeout,
            })
            .map_err(|_| EngineError::SessionClosed)?;
        Ok(req_id)
    }
}

/// One running session attempt
pub struct CoordinationSession {
    handle: SessionHandle,
    driver: Option<JoinHandle<()>>,
}

impl CoordinationSession {
    /// Start an attempt in the background
    ///
    /// Returns at once; the outcome of the start arrives on `events` as
    /// either `Started` or `Failure`.
    pub fn start<T, A>(
        transport: T,
        auth: A,
        config: SessionConfig,
        start: SessionStart,
        events: EventSender,
    ) -> Self
    where
        T: Transport,
        A: AuthProvider,
    {
        let attempt = NEXT_ATTEMPT.fetch_add(1, Ordering::Relaxed);
        let initial = SessionStatus {
            state: if start.session_id.is_some() {
                SessionState::Reconnecting
            } else {
                SessionState::Connecting
            },
            session_id: start.session_id,
        };
        let (status_tx, status_rx) = watch::channel(initial);
        let request_ids = config.request_ids.clone();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let span = tracing::info_span!(
            "session",
            attempt,
            path = %config.path,
            resume = start.session_id.map(|id| id.0),
        );
        let channels = driver::Channels {
            events,
            commands: command_rx,
            status: status_tx,
        };
        let driver = driver::Driver::new(attempt, transport, auth, config, start, channels);
        let task = tokio::spawn(driver.run().instrument(span));

        Self {
            handle: SessionHandle {
                attempt,
                commands: command_tx,
                status: status_rx,
                request_ids,
            },
            driver: Some(task),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn attempt(&self) -> Attempt {
        self.handle.attempt
    }

    pub fn status(&self) -> SessionStatus {
        self.handle.status()
    }

    /// Stop the attempt gracefully
    ///
    /// Outstanding requests receive a `Cancelled` result, then `Stopped` is
    /// emitted, unless the attempt had already failed. No event for this
    /// attempt is emitted after this returns.
    pub async fn stop(mut self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .handle
            .commands
            .send(Command::Stop { ack: Some(ack_tx) })
            .is_ok()
        {
            let _ = ack_rx.await;
        }
        if let Some(task) = self.driver.take() {
            if let Err(e) = task.await {
                tracing::error!(attempt = self.handle.attempt, error = %e, "session driver panicked");
            }
        }
    }
}

impl Drop for CoordinationSession {
    fn drop(&mut self) {
        if self.driver.is_some() {
            let _ = self.handle.commands.send(Command::Stop { ack: None });
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
