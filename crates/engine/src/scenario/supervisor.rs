// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnect loop behind a scenario

use super::ScenarioEvent;
use crate::current::CurrentSessionWriter;
use crate::semaphore::SemaphoreManager;
use crate::session::{
    event_channel, AttemptEvent, CoordinationSession, EventReceiver, EventSender, SessionConfig,
    SessionEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tether_adapters::{AuthProvider, Transport};
use tether_core::{
    RetryAction, RetryState, ScenarioSettings, Session, SessionId, SessionInput, Status,
    StatusCode,
};
use tokio::sync::{mpsc, watch};

enum AttemptEnd {
    Closing,
    Failed(Status),
}

pub(super) struct Supervisor<T, A> {
    pub(super) transport: T,
    pub(super) auth: A,
    pub(super) session: Session,
    pub(super) retry: RetryState,
    pub(super) settings: Arc<ScenarioSettings>,
    pub(super) current: CurrentSessionWriter,
    pub(super) semaphores: SemaphoreManager,
    pub(super) dispatch: mpsc::UnboundedSender<ScenarioEvent>,
    pub(super) closing: watch::Receiver<bool>,
}

impl<T: Transport, A: AuthProvider> Supervisor<T, A> {
    pub(super) async fn run(mut self) {
        let (events_tx, mut events) = event_channel();
        let config = SessionConfig::from_settings(&self.settings);

        loop {
            self.session = self.session.transition(SessionInput::Start);
            let start = self.session.start_request(
                &config.path,
                config.settings.timeout,
                &config.description,
            );
            let engine = CoordinationSession::start(
                self.transport.clone(),
                self.auth.clone(),
                config.clone(),
                start,
                events_tx.clone(),
            );
            tracing::debug!(
                attempt = engine.attempt(),
                seq_no = self.session.seq_no,
                state = self.session.state.as_str(),
                "starting session"
            );

            let failure = match self.watch_attempt(&engine, &mut events).await {
                AttemptEnd::Closing => {
                    self.shut_down(Some(engine), events_tx, events).await;
                    return;
                }
                AttemptEnd::Failed(status) => status,
            };
            engine.stop().await;

            match self.retry.next_action(&self.settings.backoff, &failure) {
                RetryAction::Retry { attempt, delay } => {
                    self.retry.record_failure();
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "reconnecting"
                    );
                    self.forward(ScenarioEvent::Reconnecting { attempt, delay });
                    if self.sleep_unless_closing(delay).await {
                        self.shut_down(None, events_tx, events).await;
                        return;
                    }
                }
                RetryAction::GiveUp => {
                    tracing::error!(
                        status = %failure,
                        failures = self.retry.failures,
                        "giving up on session"
                    );
                    self.forward(ScenarioEvent::GaveUp { status: failure });
                    return;
                }
            }
        }
    }

    /// Follow one attempt until it fails or the scenario closes
    async fn watch_attempt(
        &mut self,
        engine: &CoordinationSession,
        events: &mut EventReceiver,
    ) -> AttemptEnd {
        let attempt = engine.attempt();
        loop {
            tokio::select! {
                biased;
                _ = closed(&mut self.closing) => return AttemptEnd::Closing,
                event = events.recv() => {
                    // The supervisor holds a sender, so the channel never closes here
                    let Some(AttemptEvent { attempt: from, event }) = event else {
                        return AttemptEnd::Closing;
                    };
                    if from != attempt {
                        self.stale(from, event);
                        continue;
                    }
                    match event {
                        SessionEvent::Started { session_id } => self.started(engine, session_id),
                        SessionEvent::Failure { status } => {
                            self.failed(&status);
                            return AttemptEnd::Failed(status);
                        }
                        SessionEvent::Stopped => {
                            let status = Status::new(StatusCode::Cancelled, "session stopped");
                            self.failed(&status);
                            return AttemptEnd::Failed(status);
                        }
                        result => self.forward_result(result),
                    }
                }
            }
        }
    }

    fn started(&mut self, engine: &CoordinationSession, session_id: SessionId) {
        let resumed = self.session.id == Some(session_id);
        self.session = self.session.transition(SessionInput::Started { session_id });
        self.retry.reset();

        let handle = engine.handle();
        self.current.set(handle.clone());
        let replayed = self.semaphores.replay(&handle);
        tracing::info!(session_id = session_id.0, resumed, replayed, "session established");
        self.forward(ScenarioEvent::SessionStarted { session_id });
    }

    fn failed(&mut self, status: &Status) {
        self.current.clear();
        self.session = self.session.transition(SessionInput::Failed {
            status: status.clone(),
        });
        if status.requires_new_session() {
            tracing::info!(status = %status, "session id discarded");
        }
        self.forward(ScenarioEvent::Failure {
            status: status.clone(),
        });
    }

    /// Tail of a replaced attempt: results still go out, lifecycle does not
    fn stale(&self, attempt: u64, event: SessionEvent) {
        match event {
            SessionEvent::Started { .. } | SessionEvent::Failure { .. } | SessionEvent::Stopped => {
                tracing::debug!(attempt, event = event.name(), "ignoring stale lifecycle event");
            }
            result => self.forward_result(result),
        }
    }

    async fn sleep_unless_closing(&mut self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = closed(&mut self.closing) => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }

    /// Stop the current attempt and deliver every result it still owes
    async fn shut_down(
        &mut self,
        engine: Option<CoordinationSession>,
        events_tx: EventSender,
        mut events: EventReceiver,
    ) {
        self.current.clear();
        drop(events_tx);
        if let Some(engine) = engine {
            engine.stop().await;
        }
        self.session = self.session.transition(SessionInput::Stopped);

        // Every engine has exited, so everything it emitted is queued
        while let Ok(AttemptEvent { event, .. }) = events.try_recv() {
            self.forward_result(event);
        }
        tracing::info!("scenario closed");
    }

    fn forward_result(&self, event: SessionEvent) {
        if let Some(event) = ScenarioEvent::from_result(event) {
            self.forward(event);
        }
    }

    fn forward(&self, event: ScenarioEvent) {
        let _ = self.dispatch.send(event);
    }
}

async fn closed(closing: &mut watch::Receiver<bool>) {
    // A dropped sender means the scenario is gone
    let _ = closing.wait_for(|closing| *closing).await;
}
