// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service-discovery publisher
//!
//! Publishes an endpoint as the holder payload of an unbounded semaphore.
//! Every session start creates the semaphore (a no-op when it exists with the
//! same limit) and acquires one slot carrying the endpoint, so readers that
//! describe the semaphore see every live publisher.

use super::lost_with_session;
use crate::error::EngineError;
use crate::scenario::{Observer, Scenario, ScenarioDeps, ScenarioEvent, ScenarioHandle};
use crate::semaphore::AcquireOptions;
use async_trait::async_trait;
use tether_adapters::{AuthProvider, Transport};
use tether_core::{KeyGen, ScenarioSettings, SessionId, Status, StatusCode};
use tokio::sync::watch;

/// Where the publisher stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublisherStatus {
    Connecting,
    /// The endpoint is discoverable
    Published { session_id: SessionId },
    /// Between sessions; the endpoint reappears after reconnect
    Unavailable { status: Status },
    /// Publishing cannot succeed without intervention
    Failed { status: Status },
}

impl PublisherStatus {
    pub fn is_published(&self) -> bool {
        matches!(self, PublisherStatus::Published { .. })
    }
}

/// Publishes one endpoint for as long as it runs
pub struct ServiceDiscoveryPublisher {
    scenario: Scenario,
    endpoint: String,
    status: watch::Receiver<PublisherStatus>,
}

impl ServiceDiscoveryPublisher {
    /// Start publishing `endpoint` under `settings.semaphore_name`
    pub fn start<T, A, K>(
        settings: ScenarioSettings,
        endpoint: impl Into<String>,
        deps: ScenarioDeps<T, A, K>,
    ) -> Result<Self, EngineError>
    where
        T: Transport,
        A: AuthProvider,
        K: KeyGen,
    {
        let endpoint = endpoint.into();
        let (status_tx, status_rx) = watch::channel(PublisherStatus::Connecting);
        let payload = endpoint.clone().into_bytes();
        let scenario = Scenario::start(settings, deps, move |handle| PublisherObserver {
            handle,
            payload,
            status: status_tx,
            session_id: None,
        })?;

        Ok(Self {
            scenario,
            endpoint,
            status: status_rx,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn status(&self) -> PublisherStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PublisherStatus> {
        self.status.clone()
    }

    pub fn scenario(&self) -> &ScenarioHandle {
        self.scenario.handle()
    }

    /// Wait until the endpoint is published, or publishing failed for good
    pub async fn wait_published(&self) -> Result<SessionId, Status> {
        let mut status = self.status.clone();
        let settled = status
            .wait_for(|s| {
                matches!(
                    s,
                    PublisherStatus::Published { .. } | PublisherStatus::Failed { .. }
                )
            })
            .await
            .map(|s| (*s).clone());
        match settled {
            Ok(PublisherStatus::Published { session_id }) => Ok(session_id),
            Ok(PublisherStatus::Failed { status }) => Err(status),
            Ok(_) | Err(_) => Err(Status::new(StatusCode::Cancelled, "publisher closed")),
        }
    }

    pub async fn close(self) {
        self.scenario.close().await;
    }
}

struct PublisherObserver {
    handle: ScenarioHandle,
    payload: Vec<u8>,
    status: watch::Sender<PublisherStatus>,
    session_id: Option<SessionId>,
}

impl PublisherObserver {
    fn set(&self, next: PublisherStatus) {
        // Failed is final
        self.status.send_if_modified(|current| {
            if matches!(current, PublisherStatus::Failed { .. }) || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn fail(&self, status: Status) {
        tracing::error!(
            semaphore = %self.handle.settings().semaphore_name,
            status = %status,
            "publishing failed"
        );
        self.set(PublisherStatus::Failed { status });
    }

    fn publish(&mut self, session_id: SessionId) {
        self.session_id = Some(session_id);
        let settings = self.handle.settings();
        let semaphores = self.handle.semaphores();
        let name = settings.semaphore_name.as_str();

        if let Err(e) = semaphores.create(name, settings.limit, Vec::new()) {
            tracing::debug!(error = %e, "create not sent");
            return;
        }
        if let Err(e) = semaphores.acquire(name, AcquireOptions::new(self.payload.clone())) {
            tracing::debug!(error = %e, "acquire not sent");
        }
    }
}

#[async_trait]
impl Observer for PublisherObserver {
    async fn on_event(&mut self, event: ScenarioEvent) {
        let name = self.handle.settings().semaphore_name.clone();
        match event {
            ScenarioEvent::SessionStarted { session_id } => self.publish(session_id),
            ScenarioEvent::CreateResult {
                name: n, status, ..
            } if n == name => {
                // AlreadyExists here means a different limit; retrying cannot fix it
                if !status.is_success() && !lost_with_session(&status) {
                    self.fail(status);
                }
            }
            ScenarioEvent::AcquireResult {
                name: n,
                acquired,
                status,
                ..
            } if n == name => {
                if acquired {
                    if let Some(session_id) = self.session_id {
                        tracing::info!(session_id = session_id.0, semaphore = %name, "endpoint published");
                        self.set(PublisherStatus::Published { session_id });
                    }
                } else if !lost_with_session(&status) {
                    self.fail(status);
                }
            }
            ScenarioEvent::Failure { status } => {
                tracing::warn!(status = %status, "endpoint unavailable until reconnect");
                self.set(PublisherStatus::Unavailable { status });
            }
            ScenarioEvent::GaveUp { status } => self.fail(status),
            _ => {}
        }
    }
}

#[cfg(test)]
#[path = "discovery_tests.rs"]
mod tests;
