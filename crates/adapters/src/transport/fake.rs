// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory coordination service for testing
//!
//! Every stream is served by a task that feeds requests into a shared
//! [`CoordinationNode`] and routes the responses to whichever stream each
//! addressed session is attached to. A background ticker drives waiter
//! timeouts and detached-session expiry from the service clock.
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{Transport, TransportError, TransportStream};
use crate::clock::TokioClock;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tether_core::{
    Clock, CoordinationNode, DescribeOptions, Outbound, SemaphoreDescription, SessionId,
    SessionRequest, SessionResponse, SessionStart, Status, StatusCode, StreamId,
};
use tokio::sync::mpsc;

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(20);

/// Recorded transport call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Open { stream: StreamId },
    OpenRefused,
    Request {
        stream: StreamId,
        request: SessionRequest,
    },
    /// The client dropped its end
    ClientClosed { stream: StreamId },
}

struct Service<C: Clock> {
    node: CoordinationNode,
    clock: C,
    streams: HashMap<StreamId, mpsc::UnboundedSender<SessionResponse>>,
    next_stream: StreamId,
    fail_opens: u32,
    unresponsive: bool,
    required_token: Option<String>,
    ticker_started: bool,
    tick_interval: Duration,
    calls: Vec<TransportCall>,
}

impl<C: Clock> Service<C> {
    fn deliver(&self, stream: StreamId, response: SessionResponse) {
        if let Some(tx) = self.streams.get(&stream) {
            let _ = tx.send(response);
        }
    }

    fn route(&self, outbound: Vec<Outbound>) {
        for Outbound {
            session_id,
            response,
        } in outbound
        {
            let attached = self.node.session(session_id).and_then(|s| s.attached);
            match attached {
                Some(stream) => self.deliver(stream, response),
                None => tracing::trace!(
                    session_id = session_id.0,
                    response = response.name(),
                    "fake: dropping response for detached session"
                ),
            }
        }
    }

    /// Send a final failure and close the stream from the service side
    fn fail_stream(&mut self, stream: StreamId, status: Status) {
        self.deliver(stream, SessionResponse::Failure { status });
        self.close_stream(stream);
    }

    fn close_stream(&mut self, stream: StreamId) {
        if self.streams.remove(&stream).is_some() {
            self.node.detach_stream(stream, &self.clock);
        }
    }

    fn handle(&mut self, stream: StreamId, request: SessionRequest) {
        self.calls.push(TransportCall::Request {
            stream,
            request: request.clone(),
        });
        if !self.streams.contains_key(&stream) || self.unresponsive {
            return;
        }

        let attached = self.node.session_on_stream(stream);
        match (request, attached) {
            (SessionRequest::SessionStart(start), None) => self.start(stream, &start),
            (SessionRequest::SessionStart(_), Some(_)) => self.fail_stream(
                stream,
                Status::new(StatusCode::BadRequest, "session already started on stream"),
            ),
            (SessionRequest::Ping { opaque }, _) => {
                self.deliver(stream, SessionResponse::Pong { opaque })
            }
            (SessionRequest::Pong { .. }, _) => {}
            (SessionRequest::SessionStop, Some(session_id)) => {
                let out = self.node.stop_session(session_id, &self.clock);
                self.route(out);
                self.deliver(stream, SessionResponse::SessionStopped { session_id });
                self.streams.remove(&stream);
            }
            (request, Some(session_id)) => {
                let out = self.node.handle(session_id, request, &self.clock);
                self.route(out);
            }
            (request, None) => {
                tracing::debug!(stream, request = request.name(), "fake: request before start");
                self.fail_stream(
                    stream,
                    Status::new(StatusCode::BadRequest, "session not started"),
                );
            }
        }
    }

    fn start(&mut self, stream: StreamId, start: &SessionStart) {
        if let Some(required) = &self.required_token {
            if &start.token != required {
                self.fail_stream(
                    stream,
                    Status::new(StatusCode::Unauthenticated, "invalid token"),
                );
                return;
            }
        }

        match self.node.start_session(stream, start) {
            Ok(outcome) => {
                if let Some(old) = outcome.displaced {
                    self.deliver(
                        old,
                        SessionResponse::Failure {
                            status: Status::new(
                                StatusCode::BadSession,
                                "session attached to another stream",
                            ),
                        },
                    );
                    self.streams.remove(&old);
                }
                self.deliver(
                    stream,
                    SessionResponse::SessionStarted {
                        session_id: outcome.session_id,
                        timeout: outcome.timeout,
                    },
                );
            }
            Err(status) => self.fail_stream(stream, status),
        }
    }

    fn client_closed(&mut self, stream: StreamId) {
        self.calls.push(TransportCall::ClientClosed { stream });
        self.close_stream(stream);
    }

    fn tick(&mut self) {
        let out = self.node.tick(&self.clock);
        self.route(out);
    }
}

/// In-memory transport backed by a [`CoordinationNode`]
#[derive(Clone)]
pub struct FakeTransport<C: Clock = TokioClock> {
    service: Arc<Mutex<Service<C>>>,
}

impl FakeTransport<TokioClock> {
    pub fn new(path: impl Into<String>) -> Self {
        Self::with_clock(path, TokioClock)
    }
}

impl<C: Clock> FakeTransport<C> {
    pub fn with_clock(path: impl Into<String>, clock: C) -> Self {
        Self {
            service: Arc::new(Mutex::new(Service {
                node: CoordinationNode::new(path),
                clock,
                streams: HashMap::new(),
                next_stream: 1,
                fail_opens: 0,
                unresponsive: false,
                required_token: None,
                ticker_started: false,
                tick_interval: DEFAULT_TICK_INTERVAL,
                calls: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Service<C>> {
        self.service.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// How often the background ticker expires timeouts
    pub fn with_tick_interval(self, interval: Duration) -> Self {
        self.lock().tick_interval = interval;
        self
    }

    /// Reject session starts whose token differs from `token`
    pub fn with_required_token(self, token: impl Into<String>) -> Self {
        self.lock().required_token = Some(token.into());
        self
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().calls.clone()
    }

    /// Requests sent by clients, in arrival order
    pub fn requests(&self) -> Vec<SessionRequest> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                TransportCall::Request { request, .. } => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    /// Refuse the next `n` stream opens
    pub fn fail_next_opens(&self, n: u32) {
        self.lock().fail_opens = n;
    }

    /// Close every open stream from the service side, without a failure message
    pub fn drop_all_streams(&self) {
        let mut service = self.lock();
        let streams: Vec<StreamId> = service.streams.keys().copied().collect();
        for stream in streams {
            service.close_stream(stream);
        }
    }

    /// Swallow all client traffic, including pings, while set
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.lock().unresponsive = unresponsive;
    }

    /// Expire a session immediately, failing its stream with `SessionExpired`
    pub fn expire_session(&self, id: SessionId) {
        let mut service = self.lock();
        let attached = service.node.session(id).and_then(|s| s.attached);
        let clock = service.clock.clone();
        let out = service.node.expire_session(id, &clock);
        service.route(out);
        if let Some(stream) = attached {
            service.fail_stream(
                stream,
                Status::new(StatusCode::SessionExpired, format!("session {} expired", id)),
            );
        }
    }

    /// Ping every attached stream from the service side
    pub fn ping_all(&self, opaque: u64) {
        let service = self.lock();
        for tx in service.streams.values() {
            let _ = tx.send(SessionResponse::Ping { opaque });
        }
    }

    /// Run one maintenance pass now
    pub fn tick(&self) {
        self.lock().tick();
    }

    pub fn open_streams(&self) -> usize {
        self.lock().streams.len()
    }

    pub fn sessions(&self) -> Vec<SessionId> {
        self.lock().node.session_ids()
    }

    /// Describe a semaphore directly, bypassing any session
    pub fn describe(&self, name: &str) -> Option<SemaphoreDescription> {
        self.lock().node.semaphore(name).map(|s| {
            s.describe(DescribeOptions {
                include_owners: true,
                include_waiters: true,
                ..DescribeOptions::default()
            })
        })
    }

    fn spawn_ticker(&self) {
        let interval = {
            let mut service = self.lock();
            if service.ticker_started {
                return;
            }
            service.ticker_started = true;
            service.tick_interval
        };
        let weak: Weak<Mutex<Service<C>>> = Arc::downgrade(&self.service);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(service) = weak.upgrade() else {
                    break;
                };
                service.lock().unwrap_or_else(|e| e.into_inner()).tick();
            }
        });
    }
}

#[async_trait]
impl<C: Clock> Transport for FakeTransport<C> {
    async fn open_stream(&self) -> Result<TransportStream, TransportError> {
        self.spawn_ticker();

        let (request_tx, mut request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let stream = {
            let mut service = self.lock();
            if service.fail_opens > 0 {
                service.fail_opens -= 1;
                service.calls.push(TransportCall::OpenRefused);
                return Err(TransportError::ConnectRefused(
                    "injected connect failure".to_string(),
                ));
            }
            let stream = service.next_stream;
            service.next_stream += 1;
            service.streams.insert(stream, response_tx);
            service.calls.push(TransportCall::Open { stream });
            stream
        };

        let service = Arc::clone(&self.service);
        tokio::spawn(async move {
            while let Some(request) = request_rx.recv().await {
                service
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .handle(stream, request);
            }
            service
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .client_closed(stream);
        });

        Ok(TransportStream::new(request_tx, response_rx))
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
