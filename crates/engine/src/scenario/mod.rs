// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario framework
//!
//! A [`Scenario`] keeps one logical session alive for an [`Observer`]. It
//! starts a session attempt as soon as it is built, and whenever an attempt
//! fails it backs off and starts another, resuming the same session id unless
//! the service rejected it. Reconnection policy lives only here.
//!
//! Events reach the observer one at a time, in order, from a single dispatch
//! task. After [`Scenario::close`] returns no further events are delivered.

mod event;
mod supervisor;

pub use event::ScenarioEvent;

use crate::current::{current_session, CurrentSession};
use crate::error::EngineError;
use crate::semaphore::SemaphoreManager;
use crate::session::SessionHandle;
use async_trait::async_trait;
use std::sync::Arc;
use supervisor::Supervisor;
use tether_adapters::{AuthProvider, Transport};
use tether_core::{KeyGen, RandomKeyGen, ScenarioSettings, Session};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Receives a scenario's events
#[async_trait]
pub trait Observer: Send + 'static {
    async fn on_event(&mut self, event: ScenarioEvent);
}

/// Forward events into a channel, for callers that prefer to poll
#[async_trait]
impl Observer for mpsc::UnboundedSender<ScenarioEvent> {
    async fn on_event(&mut self, event: ScenarioEvent) {
        let _ = self.send(event);
    }
}

/// Adapters a scenario runs on
pub struct ScenarioDeps<T, A, K = RandomKeyGen> {
    pub transport: T,
    pub auth: A,
    pub keys: K,
}

impl<T, A> ScenarioDeps<T, A, RandomKeyGen> {
    pub fn new(transport: T, auth: A) -> Self {
        Self {
            transport,
            auth,
            keys: RandomKeyGen,
        }
    }
}

impl<T, A, K> ScenarioDeps<T, A, K> {
    /// Use a different protection key source
    pub fn with_keys<K2: KeyGen>(self, keys: K2) -> ScenarioDeps<T, A, K2> {
        ScenarioDeps {
            transport: self.transport,
            auth: self.auth,
            keys,
        }
    }
}

/// What an observer may hold on to: settings, the current session and
/// semaphore operations
#[derive(Clone, Debug)]
pub struct ScenarioHandle {
    settings: Arc<ScenarioSettings>,
    current: CurrentSession,
    semaphores: SemaphoreManager,
}

impl ScenarioHandle {
    pub fn settings(&self) -> &ScenarioSettings {
        &self.settings
    }

    /// The live session, or `None` while connecting or after close
    pub fn current_session(&self) -> Option<SessionHandle> {
        self.current.get()
    }

    pub fn semaphores(&self) -> &SemaphoreManager {
        &self.semaphores
    }
}

/// A running scenario
pub struct Scenario {
    handle: ScenarioHandle,
    closing: watch::Sender<bool>,
    supervisor: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Scenario {
    /// Validate `settings`, build the observer and start connecting
    ///
    /// `observer` receives the scenario's handle before anything runs, so it
    /// can issue operations from inside its own event handler.
    pub fn start<T, A, K, O, F>(
        settings: ScenarioSettings,
        deps: ScenarioDeps<T, A, K>,
        observer: F,
    ) -> Result<Self, EngineError>
    where
        T: Transport,
        A: AuthProvider,
        K: KeyGen,
        O: Observer,
        F: FnOnce(ScenarioHandle) -> O,
    {
        settings.validate()?;
        let settings = Arc::new(settings);
        let (writer, current) = current_session();
        let handle = ScenarioHandle {
            settings: Arc::clone(&settings),
            semaphores: SemaphoreManager::new(current.clone()),
            current,
        };

        let observer = observer(handle.clone());
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch(observer, dispatch_rx));

        let (closing_tx, closing_rx) = watch::channel(false);
        let span = tracing::info_span!(
            "scenario",
            semaphore = %settings.semaphore_name,
            path = %settings.coordination_node,
        );
        let supervisor = Supervisor {
            transport: deps.transport,
            auth: deps.auth,
            session: Session::new(deps.keys.next_key()),
            retry: Default::default(),
            settings,
            current: writer,
            semaphores: handle.semaphores.clone(),
            dispatch: dispatch_tx,
            closing: closing_rx,
        };
        let supervisor = tokio::spawn(supervisor.run().instrument(span));

        Ok(Self {
            handle,
            closing: closing_tx,
            supervisor: Some(supervisor),
            dispatcher: Some(dispatcher),
        })
    }

    pub fn handle(&self) -> &ScenarioHandle {
        &self.handle
    }

    pub fn current_session(&self) -> Option<SessionHandle> {
        self.handle.current_session()
    }

    pub fn semaphores(&self) -> &SemaphoreManager {
        &self.handle.semaphores
    }

    /// Whether the scenario stopped on its own after giving up
    pub fn is_finished(&self) -> bool {
        match &self.supervisor {
            Some(task) => task.is_finished(),
            None => true,
        }
    }

    /// Stop the session and wait until the observer has seen its last event
    ///
    /// Outstanding requests are resolved with `Cancelled` before this
    /// returns.
    pub async fn close(mut self) {
        self.closing.send_replace(true);
        if let Some(task) = self.supervisor.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "scenario supervisor panicked");
            }
        }
        if let Some(task) = self.dispatcher.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "observer panicked");
            }
        }
    }
}

impl Drop for Scenario {
    fn drop(&mut self) {
        self.closing.send_replace(true);
    }
}

async fn dispatch<O: Observer>(mut observer: O, mut events: mpsc::UnboundedReceiver<ScenarioEvent>) {
    while let Some(event) = events.recv().await {
        tracing::trace!(event = event.name(), "dispatch");
        observer.on_event(event).await;
    }
}

#[cfg(test)]
#[path = "scenario_tests.rs"]
mod tests;
