// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Distributed lock on a limit-1 semaphore
//!
//! Each session start creates the semaphore with limit 1 and queues for it.
//! Losing the session moves the lock to [`LockStatus::Lost`]; the next
//! session queues again, unless the lock was released in between. A release
//! that could not reach the service is sent again on the next session, since
//! a resumed session still holds whatever it held before.

use super::lost_with_session;
use crate::error::EngineError;
use crate::scenario::{Observer, Scenario, ScenarioDeps, ScenarioEvent, ScenarioHandle};
use crate::semaphore::AcquireOptions;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_adapters::{AuthProvider, Transport};
use tether_core::{KeyGen, ScenarioSettings, SessionId, Status, StatusCode};
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    /// Queued, or waiting for a session to queue on
    Waiting,
    Held { session_id: SessionId },
    /// The session went away; the lock is re-requested after reconnect
    Lost { status: Status },
    /// The acquire timeout passed before the lock was free
    TimedOut,
    Released,
    Failed { status: Status },
}

impl LockStatus {
    /// No further transitions happen from here
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            LockStatus::TimedOut | LockStatus::Released | LockStatus::Failed { .. }
        )
    }
}

/// A lock held through a scenario's session
pub struct DistributedLock {
    scenario: Scenario,
    status: Arc<watch::Sender<LockStatus>>,
    wanted: Arc<AtomicBool>,
    release_owed: Arc<AtomicBool>,
}

impl DistributedLock {
    /// Start queuing for the lock named `settings.semaphore_name`
    ///
    /// `holder` is published as the holder payload. `timeout` bounds each
    /// wait for the lock; `None` waits indefinitely.
    pub fn start<T, A, K>(
        settings: ScenarioSettings,
        holder: impl Into<Vec<u8>>,
        timeout: Option<Duration>,
        deps: ScenarioDeps<T, A, K>,
    ) -> Result<Self, EngineError>
    where
        T: Transport,
        A: AuthProvider,
        K: KeyGen,
    {
        let status = Arc::new(watch::Sender::new(LockStatus::Waiting));
        let wanted = Arc::new(AtomicBool::new(true));
        let release_owed = Arc::new(AtomicBool::new(false));
        let mut options = AcquireOptions::new(holder);
        if let Some(timeout) = timeout {
            options = options.with_timeout(timeout);
        }

        let observer_status = Arc::clone(&status);
        let observer_wanted = Arc::clone(&wanted);
        let observer_owed = Arc::clone(&release_owed);
        let scenario = Scenario::start(settings.with_limit(1), deps, move |handle| LockObserver {
            handle,
            options,
            status: observer_status,
            wanted: observer_wanted,
            release_owed: observer_owed,
            session_id: None,
        })?;

        Ok(Self {
            scenario,
            status,
            wanted,
            release_owed,
        })
    }

    pub fn status(&self) -> LockStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LockStatus> {
        self.status.subscribe()
    }

    pub fn is_held(&self) -> bool {
        matches!(*self.status.borrow(), LockStatus::Held { .. })
    }

    pub fn scenario(&self) -> &ScenarioHandle {
        self.scenario.handle()
    }

    /// Wait until the lock is held; `Err` carries the final status otherwise
    ///
    /// A lost session is not final: waiting continues across reconnects.
    pub async fn wait_held(&self) -> Result<SessionId, LockStatus> {
        let mut status = self.status.subscribe();
        let settled = status
            .wait_for(|s| matches!(s, LockStatus::Held { .. }) || s.is_final())
            .await
            .map(|s| (*s).clone());
        match settled {
            Ok(LockStatus::Held { session_id }) => Ok(session_id),
            Ok(other) => Err(other),
            Err(_) => Err(LockStatus::Released),
        }
    }

    /// Give up the lock, or stop waiting for it
    ///
    /// The lock is not re-requested on later sessions. Between sessions the
    /// release is sent once the next session starts.
    pub fn release(&self) -> Result<(), EngineError> {
        self.wanted.store(false, Ordering::SeqCst);
        self.release_owed.store(true, Ordering::SeqCst);
        self.status.send_replace(LockStatus::Released);
        let name = &self.scenario.handle().settings().semaphore_name;
        match self.scenario.semaphores().release(name) {
            Ok(_) | Err(EngineError::NoActiveSession | EngineError::SessionClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn close(self) {
        self.scenario.close().await;
    }
}

struct LockObserver {
    handle: ScenarioHandle,
    options: AcquireOptions,
    status: Arc<watch::Sender<LockStatus>>,
    wanted: Arc<AtomicBool>,
    /// A release has not been confirmed by the service yet
    release_owed: Arc<AtomicBool>,
    session_id: Option<SessionId>,
}

impl LockObserver {
    fn wanted(&self) -> bool {
        self.wanted.load(Ordering::SeqCst)
    }

    fn set(&self, next: LockStatus) {
        self.status.send_if_modified(|current| {
            if current.is_final() || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn release(&self, name: &str) {
        self.release_owed.store(true, Ordering::SeqCst);
        if let Err(e) = self.handle.semaphores().release(name) {
            tracing::debug!(error = %e, "release not sent");
        }
    }

    fn request(&mut self, session_id: SessionId) {
        self.session_id = Some(session_id);
        if !self.wanted() {
            if self.release_owed.load(Ordering::SeqCst) {
                self.release(&self.handle.settings().semaphore_name);
            }
            return;
        }
        let name = self.handle.settings().semaphore_name.as_str();
        let semaphores = self.handle.semaphores();
        if let Err(e) = semaphores.create(name, 1, Vec::new()) {
            tracing::debug!(error = %e, "create not sent");
            return;
        }
        match semaphores.acquire(name, self.options.clone()) {
            Ok(_) => self.set(LockStatus::Waiting),
            Err(e) => tracing::debug!(error = %e, "acquire not sent"),
        }
    }
}

#[async_trait]
impl Observer for LockObserver {
    async fn on_event(&mut self, event: ScenarioEvent) {
        let name = self.handle.settings().semaphore_name.clone();
        match event {
            ScenarioEvent::SessionStarted { session_id } => self.request(session_id),
            ScenarioEvent::CreateResult {
                name: n, status, ..
            } if n == name => {
                if !status.is_success() && !lost_with_session(&status) {
                    tracing::error!(semaphore = %name, status = %status, "lock semaphore unusable");
                    self.set(LockStatus::Failed { status });
                }
            }
            ScenarioEvent::AcquireResult {
                name: n,
                acquired,
                status,
                ..
            } if n == name => match (acquired, self.session_id) {
                (true, Some(session_id)) if self.wanted() => {
                    tracing::info!(session_id = session_id.0, semaphore = %name, "lock held");
                    self.set(LockStatus::Held { session_id });
                }
                // Released while the acquire was in flight
                (true, _) => self.release(&name),
                (false, _) if status.code == StatusCode::Timeout => {
                    self.wanted.store(false, Ordering::SeqCst);
                    self.set(LockStatus::TimedOut);
                }
                (false, _) if lost_with_session(&status) => {}
                (false, _) => {
                    tracing::error!(semaphore = %name, status = %status, "lock acquire rejected");
                    self.set(LockStatus::Failed { status });
                }
            },
            ScenarioEvent::ReleaseResult {
                name: n, status, ..
            } if n == name => {
                if status.is_success() {
                    self.release_owed.store(false, Ordering::SeqCst);
                } else if !lost_with_session(&status) {
                    tracing::warn!(semaphore = %name, status = %status, "lock release rejected");
                }
            }
            ScenarioEvent::Failure { status } => {
                if self.wanted() {
                    tracing::warn!(status = %status, "lock lost with session");
                    self.set(LockStatus::Lost { status });
                }
            }
            ScenarioEvent::GaveUp { status } => self.set(LockStatus::Failed { status }),
            _ => {}
        }
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
