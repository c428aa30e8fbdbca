// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background task behind one session attempt

use super::{Attempt, AttemptEvent, Command, EventSender, SessionConfig, SessionEvent, SessionStatus};
use crate::error::EngineError;
use std::collections::HashMap;
use std::future::Future;
use tether_adapters::{AuthProvider, StreamSender, Transport, TransportStream};
use tether_core::{
    KeepAlive, KeepAliveAction, RequestId, SessionId, SessionRequest, SessionResponse,
    SessionStart, SessionState, Status, StatusCode,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

type Ack = Option<oneshot::Sender<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    Create,
    Update,
    Delete,
    Acquire,
    Release,
    Describe,
    /// Describe answered with a watch; waiting for the change notification
    Watch,
}

#[derive(Debug)]
struct Pending {
    kind: PendingKind,
    name: String,
    deadline: Option<Instant>,
}

impl Pending {
    /// Terminal event for a request that will never get a real response
    fn abandon(self, req_id: RequestId, status: Status) -> Option<SessionEvent> {
        let name = self.name;
        let event = match self.kind {
            PendingKind::Create => SessionEvent::CreateResult {
                req_id,
                name,
                status,
            },
            PendingKind::Update => SessionEvent::UpdateResult {
                req_id,
                name,
                status,
            },
            PendingKind::Delete => SessionEvent::DeleteResult {
                req_id,
                name,
                status,
            },
            PendingKind::Acquire => SessionEvent::AcquireResult {
                req_id,
                name,
                acquired: false,
                status,
            },
            PendingKind::Release => SessionEvent::ReleaseResult {
                req_id,
                name,
                released: false,
                status,
            },
            PendingKind::Describe => SessionEvent::DescribeResult {
                req_id,
                name,
                status,
                description: None,
                watch_added: false,
            },
            // A watch already had its result; the session failure covers it
            PendingKind::Watch => return None,
        };
        Some(event)
    }
}

fn pending_kind(request: &SessionRequest) -> Option<(PendingKind, &str)> {
    let entry = match request {
        SessionRequest::CreateSemaphore { name, .. } => (PendingKind::Create, name),
        SessionRequest::UpdateSemaphore { name, .. } => (PendingKind::Update, name),
        SessionRequest::DeleteSemaphore { name, .. } => (PendingKind::Delete, name),
        SessionRequest::AcquireSemaphore { name, .. } => (PendingKind::Acquire, name),
        SessionRequest::ReleaseSemaphore { name, .. } => (PendingKind::Release, name),
        SessionRequest::DescribeSemaphore { name, .. } => (PendingKind::Describe, name),
        SessionRequest::SessionStart(_)
        | SessionRequest::SessionStop
        | SessionRequest::Ping { .. }
        | SessionRequest::Pong { .. } => return None,
    };
    Some((entry.0, entry.1.as_str()))
}

/// How the connect phase ended without a session
enum ConnectEnd {
    Stopped(Ack),
    Failed(Status),
}

/// How an active session ended
enum End {
    Stopped(Ack),
    Failed(Status),
}

struct Connected {
    sender: StreamSender,
    receiver: mpsc::UnboundedReceiver<SessionResponse>,
    session_id: SessionId,
}

/// Channel ends owned by the driver
pub(super) struct Channels {
    pub(super) events: EventSender,
    pub(super) commands: mpsc::UnboundedReceiver<Command>,
    pub(super) status: watch::Sender<SessionStatus>,
}

pub(super) struct Driver<T, A> {
    attempt: Attempt,
    transport: T,
    auth: A,
    config: SessionConfig,
    start: SessionStart,
    events: EventSender,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<SessionStatus>,
    pending: HashMap<RequestId, Pending>,
}

impl<T: Transport, A: AuthProvider> Driver<T, A> {
    pub(super) fn new(
        attempt: Attempt,
        transport: T,
        auth: A,
        config: SessionConfig,
        start: SessionStart,
        channels: Channels,
    ) -> Self {
        Self {
            attempt,
            transport,
            auth,
            config,
            start,
            events: channels.events,
            commands: channels.commands,
            status: channels.status,
            pending: HashMap::new(),
        }
    }

    pub(super) async fn run(mut self) {
        let span = tracing::info_span!("session.start", seq_no = self.start.seq_no);
        let connected = self.connect().instrument(span).await;
        let connected = match connected {
            Ok(connected) => connected,
            Err(ConnectEnd::Stopped(ack)) => {
                tracing::debug!("stopped before session start");
                self.finish_stopped(ack);
                return;
            }
            Err(ConnectEnd::Failed(status)) => {
                tracing::warn!(status = %status, "session start failed");
                self.finish_failed(status);
                return;
            }
        };

        let session_id = connected.session_id;
        self.set_status(SessionState::Active, Some(session_id));
        tracing::info!(session_id = session_id.0, "session started");
        self.emit(SessionEvent::Started { session_id });

        match self.serve(connected).await {
            End::Stopped(ack) => self.finish_stopped(ack),
            End::Failed(status) => {
                tracing::warn!(session_id = session_id.0, status = %status, "session failed");
                self.finish_failed(status);
            }
        }
    }

    async fn connect(&mut self) -> Result<Connected, ConnectEnd> {
        let token = or_stop(&mut self.commands, self.auth.token())
            .await
            .map_err(ConnectEnd::Stopped)?
            .map_err(|e| ConnectEnd::Failed(EngineError::from(e).status()))?;

        let TransportStream {
            sender,
            mut receiver,
        } = or_stop(&mut self.commands, self.transport.open_stream())
            .await
            .map_err(ConnectEnd::Stopped)?
            .map_err(|e| ConnectEnd::Failed(EngineError::from(e).status()))?;

        let start = SessionStart {
            token,
            ..self.start.clone()
        };
        sender
            .send(SessionRequest::SessionStart(start))
            .map_err(|e| ConnectEnd::Failed(e.status()))?;
        tracing::debug!("start sent");

        let handshake = async {
            loop {
                match receiver.recv().await {
                    Some(SessionResponse::SessionStarted { session_id, .. }) => {
                        return Ok(session_id)
                    }
                    Some(SessionResponse::Failure { status }) => return Err(status),
                    Some(SessionResponse::Ping { opaque }) => {
                        let _ = sender.send(SessionRequest::Pong { opaque });
                    }
                    Some(other) => {
                        tracing::debug!(response = other.name(), "ignoring response before start")
                    }
                    None => {
                        return Err(Status::new(
                            StatusCode::Unavailable,
                            "stream closed before session start",
                        ))
                    }
                }
            }
        };
        let timeout = self.config.settings.timeout;
        let started = or_stop(&mut self.commands, tokio::time::timeout(timeout, handshake))
            .await
            .map_err(ConnectEnd::Stopped)?;

        match started {
            Ok(Ok(session_id)) => Ok(Connected {
                sender,
                receiver,
                session_id,
            }),
            Ok(Err(status)) => Err(ConnectEnd::Failed(status)),
            Err(_) => Err(ConnectEnd::Failed(Status::new(
                StatusCode::Timeout,
                format!("no answer to session start within {:?}", timeout),
            ))),
        }
    }

    async fn serve(&mut self, connected: Connected) -> End {
        let Connected {
            sender,
            mut receiver,
            session_id,
        } = connected;
        let settings = self.config.settings.clone();
        let mut keepalive = KeepAlive::new(settings.max_missed_pings);
        let mut ping = tokio::time::interval_at(
            Instant::now() + settings.ping_interval,
            settings.ping_interval,
        );
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Request { req_id, request, local_timeout }) => {
                        tracing::debug!(req_id, request = request.name(), "sending request");
                        self.register(req_id, &request, local_timeout);
                        if let Err(e) = sender.send(request) {
                            return End::Failed(e.status());
                        }
                    }
                    Some(Command::Stop { ack }) => {
                        let span = tracing::info_span!("session.stop", session_id = session_id.0);
                        self.stop_gracefully(&sender, &mut receiver, &mut keepalive)
                            .instrument(span)
                            .await;
                        return End::Stopped(ack);
                    }
                    None => {
                        self.stop_gracefully(&sender, &mut receiver, &mut keepalive).await;
                        return End::Stopped(None);
                    }
                },
                response = receiver.recv() => match response {
                    Some(response) => {
                        if let Err(status) = self.dispatch(response, &sender, &mut keepalive) {
                            return End::Failed(status);
                        }
                    }
                    None => return End::Failed(Status::new(StatusCode::Unavailable, "stream closed")),
                },
                _ = ping.tick() => match keepalive.on_interval() {
                    KeepAliveAction::SendPing { opaque } => {
                        tracing::trace!(opaque, "ping");
                        if let Err(e) = sender.send(SessionRequest::Ping { opaque }) {
                            return End::Failed(e.status());
                        }
                    }
                    KeepAliveAction::Expired { missed } => {
                        return End::Failed(Status::new(
                            StatusCode::Timeout,
                            format!("{} pings unanswered", missed),
                        ));
                    }
                },
                _ = sleep_until(deadline) => self.expire_overdue(),
            }
        }
    }

    /// Ask the service to stop and wait for its confirmation
    ///
    /// Results that arrive while waiting are still delivered.
    async fn stop_gracefully(
        &mut self,
        sender: &StreamSender,
        receiver: &mut mpsc::UnboundedReceiver<SessionResponse>,
        keepalive: &mut KeepAlive,
    ) {
        if sender.send(SessionRequest::SessionStop).is_err() {
            return;
        }
        let stop_timeout = self.config.settings.stop_timeout;
        let confirmed = async {
            loop {
                match receiver.recv().await {
                    Some(SessionResponse::SessionStopped { .. }) => return true,
                    None => return false,
                    Some(response) => {
                        // The session is going away regardless of late failures
                        let _ = self.dispatch(response, sender, keepalive);
                    }
                }
            }
        };
        match tokio::time::timeout(stop_timeout, confirmed).await {
            Ok(true) => tracing::debug!("stop confirmed"),
            Ok(false) => tracing::debug!("stream closed during stop"),
            Err(_) => tracing::warn!(?stop_timeout, "stop not confirmed in time"),
        }
    }

    /// Handle one inbound message; `Err` ends the session with that status
    fn dispatch(
        &mut self,
        response: SessionResponse,
        sender: &StreamSender,
        keepalive: &mut KeepAlive,
    ) -> Result<(), Status> {
        match response {
            SessionResponse::Failure { status } => return Err(status),
            SessionResponse::SessionStopped { .. } => {
                return Err(Status::new(
                    StatusCode::SessionLost,
                    "session stopped by service",
                ))
            }
            SessionResponse::SessionStarted { .. } => {
                tracing::warn!("ignoring duplicate session start confirmation");
            }
            SessionResponse::Ping { opaque } => {
                if let Err(e) = sender.send(SessionRequest::Pong { opaque }) {
                    return Err(e.status());
                }
            }
            SessionResponse::Pong { opaque } => {
                if !keepalive.on_pong(opaque) {
                    tracing::debug!(opaque, "pong for unknown ping");
                }
            }
            SessionResponse::CreateSemaphoreResult { req_id, status } => {
                if let Some(p) = self.complete(req_id) {
                    self.emit(SessionEvent::CreateResult {
                        req_id,
                        name: p.name,
                        status,
                    });
                }
            }
            SessionResponse::UpdateSemaphoreResult { req_id, status } => {
                if let Some(p) = self.complete(req_id) {
                    self.emit(SessionEvent::UpdateResult {
                        req_id,
                        name: p.name,
                        status,
                    });
                }
            }
            SessionResponse::DeleteSemaphoreResult { req_id, status } => {
                if let Some(p) = self.complete(req_id) {
                    self.emit(SessionEvent::DeleteResult {
                        req_id,
                        name: p.name,
                        status,
                    });
                }
            }
            SessionResponse::AcquireSemaphorePending { req_id } => {
                if let Some(p) = self.pending.get(&req_id) {
                    let name = p.name.clone();
                    self.emit(SessionEvent::AcquirePending { req_id, name });
                }
            }
            SessionResponse::AcquireSemaphoreResult {
                req_id,
                status,
                acquired,
            } => {
                if let Some(p) = self.complete(req_id) {
                    self.emit(SessionEvent::AcquireResult {
                        req_id,
                        name: p.name,
                        acquired,
                        status,
                    });
                }
            }
            SessionResponse::ReleaseSemaphoreResult {
                req_id,
                status,
                released,
            } => {
                if let Some(p) = self.complete(req_id) {
                    self.emit(SessionEvent::ReleaseResult {
                        req_id,
                        name: p.name,
                        released,
                        status,
                    });
                }
            }
            SessionResponse::DescribeSemaphoreResult {
                req_id,
                status,
                description,
                watch_added,
            } => {
                if let Some(p) = self.complete(req_id) {
                    if watch_added {
                        self.pending.insert(
                            req_id,
                            Pending {
                                kind: PendingKind::Watch,
                                name: p.name.clone(),
                                deadline: None,
                            },
                        );
                    }
                    self.emit(SessionEvent::DescribeResult {
                        req_id,
                        name: p.name,
                        status,
                        description,
                        watch_added,
                    });
                }
            }
            SessionResponse::DescribeSemaphoreChanged {
                req_id,
                data_changed,
                owners_changed,
            } => {
                if let Some(p) = self.complete(req_id) {
                    self.emit(SessionEvent::DescribeChanged {
                        req_id,
                        name: p.name,
                        data_changed,
                        owners_changed,
                    });
                }
            }
        }
        Ok(())
    }

    fn register(
        &mut self,
        req_id: RequestId,
        request: &SessionRequest,
        local_timeout: Option<std::time::Duration>,
    ) {
        let Some((kind, name)) = pending_kind(request) else {
            return;
        };
        // The service answers by `timeout`; allow one session timeout of slack
        let deadline =
            local_timeout.map(|t| Instant::now() + t + self.config.settings.timeout);
        self.pending.insert(
            req_id,
            Pending {
                kind,
                name: name.to_string(),
                deadline,
            },
        );
    }

    fn complete(&mut self, req_id: RequestId) -> Option<Pending> {
        let pending = self.pending.remove(&req_id);
        if pending.is_none() {
            tracing::debug!(req_id, "dropping response for unknown request");
        }
        pending
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().filter_map(|p| p.deadline).min()
    }

    fn expire_overdue(&mut self) {
        let now = Instant::now();
        let mut overdue: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline.is_some_and(|d| d <= now))
            .map(|(id, _)| *id)
            .collect();
        overdue.sort_unstable();
        for req_id in overdue {
            if let Some(pending) = self.pending.remove(&req_id) {
                tracing::warn!(req_id, semaphore = %pending.name, "request passed its local deadline");
                let status = Status::new(StatusCode::Timeout, "no result before local deadline");
                if let Some(event) = pending.abandon(req_id, status) {
                    self.emit(event);
                }
            }
        }
    }

    /// Give every outstanding request its terminal result, in request order
    fn abandon_all(&mut self, status: &Status) {
        let mut pending: Vec<(RequestId, Pending)> = self.pending.drain().collect();
        pending.sort_unstable_by_key(|(id, _)| *id);
        for (req_id, p) in pending {
            if let Some(event) = p.abandon(req_id, status.clone()) {
                self.emit(event);
            }
        }
    }

    fn finish_stopped(&mut self, ack: Ack) {
        let acks = self.close_commands();
        self.abandon_all(&Status::new(StatusCode::Cancelled, "session stopped"));
        tracing::info!("session stopped");
        self.emit(SessionEvent::Stopped);
        for ack in ack.into_iter().chain(acks) {
            let _ = ack.send(());
        }
    }

    fn finish_failed(&mut self, status: Status) {
        let acks = self.close_commands();
        self.abandon_all(&Status::new(StatusCode::SessionLost, status.to_string()));
        self.emit(SessionEvent::Failure { status });
        for ack in acks {
            let _ = ack.send(());
        }
    }

    /// Refuse further commands and take over the ones already queued
    ///
    /// Queued requests were accepted by a handle, so they join the pending
    /// set and get a terminal result like any other outstanding request.
    fn close_commands(&mut self) -> Vec<oneshot::Sender<()>> {
        let session_id = self.status.borrow().session_id;
        self.set_status(SessionState::Closed, session_id);
        self.commands.close();

        let mut acks = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Request {
                    req_id,
                    request,
                    local_timeout,
                } => self.register(req_id, &request, local_timeout),
                Command::Stop { ack } => acks.extend(ack),
            }
        }
        acks
    }

    fn set_status(&self, state: SessionState, session_id: Option<SessionId>) {
        self.status.send_replace(SessionStatus { state, session_id });
    }

    fn emit(&self, event: SessionEvent) {
        tracing::trace!(event = event.name(), "emit");
        let _ = self.events.send(AttemptEvent {
            attempt: self.attempt,
            event,
        });
    }
}

/// Run `fut` unless a stop command arrives first
///
/// Requests are refused by the handle until the session is active, so only
/// stop commands can show up here.
async fn or_stop<F: Future>(
    commands: &mut mpsc::UnboundedReceiver<Command>,
    fut: F,
) -> Result<F::Output, Ack> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(Command::Stop { ack }) => return Err(ack),
                None => return Err(None),
                Some(Command::Request { req_id, .. }) => {
                    tracing::debug!(req_id, "request before session start dropped");
                }
            },
            out = &mut fut => return Ok(out),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
