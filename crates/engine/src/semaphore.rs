// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Semaphore operations on the current session
//!
//! Every operation goes to whichever session is current when it is called
//! and returns the `req_id` its result will carry. Without an active session
//! it fails at once with [`EngineError::NoActiveSession`].
//!
//! Acquires made with [`AcquireOptions::persistent`] are remembered and
//! re-issued on every new session until released.

use crate::current::CurrentSession;
use crate::error::EngineError;
use crate::session::SessionHandle;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_core::{DescribeOptions, RequestId, SessionRequest};

/// Parameters of an acquire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireOptions {
    pub count: u64,
    /// Holder payload, visible to anyone describing the semaphore
    pub data: Vec<u8>,
    /// `None` waits until acquired
    pub timeout: Option<Duration>,
    /// Create the semaphore on demand and remove it once idle
    pub ephemeral: bool,
    /// Re-acquire automatically on every new session
    pub persist: bool,
}

impl AcquireOptions {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            count: 1,
            data: data.into(),
            timeout: None,
            ephemeral: false,
            persist: false,
        }
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persist = true;
        self
    }
}

/// Issues semaphore requests and remembers persistent acquires
#[derive(Clone, Debug)]
pub struct SemaphoreManager {
    current: CurrentSession,
    intents: Arc<Mutex<BTreeMap<String, AcquireOptions>>>,
}

impl SemaphoreManager {
    pub fn new(current: CurrentSession) -> Self {
        Self {
            current,
            intents: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    fn session(&self) -> Result<SessionHandle, EngineError> {
        self.current.get().ok_or(EngineError::NoActiveSession)
    }

    fn intents(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, AcquireOptions>> {
        self.intents.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn create(
        &self,
        name: &str,
        limit: u64,
        data: impl Into<Vec<u8>>,
    ) -> Result<RequestId, EngineError> {
        let data = data.into();
        let req_id = self.session()?.send(|req_id| SessionRequest::CreateSemaphore {
            req_id,
            name: name.to_string(),
            limit,
            data,
        })?;
        tracing::debug!(semaphore = name, req_id, limit, "create sent");
        Ok(req_id)
    }

    /// Replace the semaphore's own payload
    pub fn update(&self, name: &str, data: impl Into<Vec<u8>>) -> Result<RequestId, EngineError> {
        let data = data.into();
        self.session()?.send(|req_id| SessionRequest::UpdateSemaphore {
            req_id,
            name: name.to_string(),
            data,
        })
    }

    /// Delete a semaphore; without `force` it must have no holders or waiters
    pub fn delete(&self, name: &str, force: bool) -> Result<RequestId, EngineError> {
        self.session()?.send(|req_id| SessionRequest::DeleteSemaphore {
            req_id,
            name: name.to_string(),
            force,
        })
    }

    pub fn acquire(&self, name: &str, options: AcquireOptions) -> Result<RequestId, EngineError> {
        let session = self.session()?;
        if options.persist {
            self.intents().insert(name.to_string(), options.clone());
        }
        let req_id = send_acquire(&session, name, options)?;
        tracing::debug!(semaphore = name, req_id, "acquire sent");
        Ok(req_id)
    }

    /// Release a held or queued acquire and forget any persistent intent
    pub fn release(&self, name: &str) -> Result<RequestId, EngineError> {
        if self.intents().remove(name).is_some() {
            tracing::debug!(semaphore = name, "intent dropped");
        }
        self.session()?.send(|req_id| SessionRequest::ReleaseSemaphore {
            req_id,
            name: name.to_string(),
        })
    }

    pub fn describe(&self, name: &str, options: DescribeOptions) -> Result<RequestId, EngineError> {
        self.session()?.send(|req_id| SessionRequest::DescribeSemaphore {
            req_id,
            name: name.to_string(),
            options,
        })
    }

    /// Names with a remembered persistent acquire, in name order
    pub fn persistent(&self) -> Vec<String> {
        self.intents().keys().cloned().collect()
    }

    /// Re-issue every persistent acquire on `session`
    ///
    /// Returns how many were sent. Results arrive like any other acquire.
    pub(crate) fn replay(&self, session: &SessionHandle) -> usize {
        let intents: Vec<(String, AcquireOptions)> = self
            .intents()
            .iter()
            .map(|(name, options)| (name.clone(), options.clone()))
            .collect();

        let mut sent = 0;
        for (name, options) in intents {
            match send_acquire(session, &name, options) {
                Ok(req_id) => {
                    tracing::info!(semaphore = %name, req_id, "re-acquiring");
                    sent += 1;
                }
                Err(e) => {
                    tracing::warn!(semaphore = %name, error = %e, "re-acquire not sent");
                    break;
                }
            }
        }
        sent
    }
}

fn send_acquire(
    session: &SessionHandle,
    name: &str,
    options: AcquireOptions,
) -> Result<RequestId, EngineError> {
    session.send(|req_id| SessionRequest::AcquireSemaphore {
        req_id,
        name: name.to_string(),
        count: options.count,
        timeout: options.timeout,
        data: options.data,
        ephemeral: options.ephemeral,
    })
}

#[cfg(test)]
#[path = "semaphore_tests.rs"]
mod tests;
