// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Semaphore state machine as held by the coordination service
//!
//! Holders are keyed by session. Waiters queue in arrival order and are only
//! promoted from the head, so a large request is never starved by a stream of
//! small ones. The sum of holder counts never exceeds `limit`.

use crate::clock::Clock;
use crate::protocol::{
    DescribeOptions, RequestId, SemaphoreDescription, SemaphoreSession, SessionId,
};
use crate::status::{Status, StatusCode};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A holder or a queued waiter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SemaphoreEntry {
    pub session_id: SessionId,
    /// Acquire request this entry answers
    pub req_id: RequestId,
    pub order_id: u64,
    pub count: u64,
    pub data: Vec<u8>,
    pub timeout: Option<Duration>,
    pub deadline: Option<Instant>,
}

impl SemaphoreEntry {
    fn to_session(&self) -> SemaphoreSession {
        SemaphoreSession {
            session_id: self.session_id,
            order_id: self.order_id,
            count: self.count,
            data: self.data.clone(),
            timeout: self.timeout,
        }
    }
}

/// Inputs that drive semaphore transitions
#[derive(Clone, Debug)]
pub enum SemaphoreInput {
    Acquire {
        session_id: SessionId,
        req_id: RequestId,
        count: u64,
        data: Vec<u8>,
        timeout: Option<Duration>,
    },
    Release {
        session_id: SessionId,
    },
    /// Replace the semaphore's own payload
    UpdateData { data: Vec<u8> },
    /// Drop everything a dead session held or waited for
    RemoveSession { session_id: SessionId },
    /// Expire waiters whose deadline passed
    Tick,
}

/// Observable results of a transition
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SemaphoreOutcome {
    Acquired {
        session_id: SessionId,
        req_id: RequestId,
    },
    Queued {
        session_id: SessionId,
        req_id: RequestId,
    },
    /// Terminal failure of an acquire (timeout, superseded, rejected)
    NotAcquired {
        session_id: SessionId,
        req_id: RequestId,
        status: Status,
    },
    Released {
        session_id: SessionId,
        released: bool,
    },
    OwnersChanged,
    DataChanged,
}

/// Server-side semaphore
#[derive(Clone, Debug)]
pub struct Semaphore {
    pub name: String,
    pub limit: u64,
    pub data: Vec<u8>,
    /// Auto-created on acquire, deleted once nobody holds or waits
    pub ephemeral: bool,
    pub owners: Vec<SemaphoreEntry>,
    pub waiters: VecDeque<SemaphoreEntry>,
    next_order: u64,
}

impl Semaphore {
    pub fn new(name: impl Into<String>, limit: u64, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            limit,
            data,
            ephemeral: false,
            owners: Vec::new(),
            waiters: VecDeque::new(),
            next_order: 1,
        }
    }

    pub fn ephemeral(name: impl Into<String>) -> Self {
        Self {
            ephemeral: true,
            ..Self::new(name, crate::protocol::UNBOUNDED_LIMIT, Vec::new())
        }
    }

    /// Sum of holder counts
    pub fn used(&self) -> u64 {
        self.owners
            .iter()
            .fold(0u64, |acc, o| acc.saturating_add(o.count))
    }

    pub fn is_idle(&self) -> bool {
        self.owners.is_empty() && self.waiters.is_empty()
    }

    pub fn owner(&self, session_id: SessionId) -> Option<&SemaphoreEntry> {
        self.owners.iter().find(|o| o.session_id == session_id)
    }

    pub fn is_waiting(&self, session_id: SessionId) -> bool {
        self.waiters.iter().any(|w| w.session_id == session_id)
    }

    /// Whether `session_id` could hold `count`, ignoring what it already holds
    fn fits(&self, session_id: SessionId, count: u64) -> bool {
        let others = self
            .owners
            .iter()
            .filter(|o| o.session_id != session_id)
            .fold(0u64, |acc, o| acc.saturating_add(o.count));
        others
            .checked_add(count)
            .is_some_and(|total| total <= self.limit)
    }

    pub fn describe(&self, options: DescribeOptions) -> SemaphoreDescription {
        SemaphoreDescription {
            name: self.name.clone(),
            data: self.data.clone(),
            count: self.used(),
            limit: self.limit,
            ephemeral: self.ephemeral,
            owners: if options.include_owners {
                self.owners.iter().map(SemaphoreEntry::to_session).collect()
            } else {
                Vec::new()
            },
            waiters: if options.include_waiters {
                self.waiters.iter().map(SemaphoreEntry::to_session).collect()
            } else {
                Vec::new()
            },
        }
    }

    /// Pure state transition function
    pub fn transition(
        &self,
        input: SemaphoreInput,
        clock: &impl Clock,
    ) -> (Semaphore, Vec<SemaphoreOutcome>) {
        let mut sem = self.clone();
        let mut outcomes = Vec::new();

        match input {
            SemaphoreInput::Acquire {
                session_id,
                req_id,
                count,
                data,
                timeout,
            } => {
                if count == 0 || count > sem.limit {
                    outcomes.push(SemaphoreOutcome::NotAcquired {
                        session_id,
                        req_id,
                        status: Status::new(
                            StatusCode::BadRequest,
                            format!("count {} outside 1..={}", count, sem.limit),
                        ),
                    });
                    return (sem, outcomes);
                }

                // A newer acquire from the same session replaces its queued one
                if let Some(pos) = sem.waiters.iter().position(|w| w.session_id == session_id) {
                    if let Some(old) = sem.waiters.remove(pos) {
                        outcomes.push(SemaphoreOutcome::NotAcquired {
                            session_id,
                            req_id: old.req_id,
                            status: Status::new(
                                StatusCode::Cancelled,
                                "superseded by a newer acquire",
                            ),
                        });
                    }
                }

                let order_id = sem.next_order;
                sem.next_order += 1;
                let entry = SemaphoreEntry {
                    session_id,
                    req_id,
                    order_id,
                    count,
                    data,
                    timeout,
                    deadline: timeout.map(|t| clock.deadline_after(t)),
                };

                if sem.waiters.is_empty() && sem.fits(session_id, count) {
                    sem.install_owner(entry);
                    outcomes.push(SemaphoreOutcome::Acquired { session_id, req_id });
                    outcomes.push(SemaphoreOutcome::OwnersChanged);
                } else if timeout == Some(Duration::ZERO) {
                    outcomes.push(SemaphoreOutcome::NotAcquired {
                        session_id,
                        req_id,
                        status: Status::new(StatusCode::Timeout, "semaphore is busy"),
                    });
                } else {
                    sem.waiters.push_back(entry);
                    outcomes.push(SemaphoreOutcome::Queued { session_id, req_id });
                }
            }

            SemaphoreInput::Release { session_id } => {
                let mut released = false;
                if let Some(pos) = sem.owners.iter().position(|o| o.session_id == session_id) {
                    sem.owners.remove(pos);
                    released = true;
                    outcomes.push(SemaphoreOutcome::OwnersChanged);
                }
                if let Some(pos) = sem.waiters.iter().position(|w| w.session_id == session_id) {
                    if let Some(waiter) = sem.waiters.remove(pos) {
                        released = true;
                        outcomes.push(SemaphoreOutcome::NotAcquired {
                            session_id,
                            req_id: waiter.req_id,
                            status: Status::new(StatusCode::Cancelled, "released while waiting"),
                        });
                    }
                }
                outcomes.push(SemaphoreOutcome::Released {
                    session_id,
                    released,
                });
                sem.promote_waiters(&mut outcomes);
            }

            SemaphoreInput::UpdateData { data } => {
                if sem.data != data {
                    sem.data = data;
                    outcomes.push(SemaphoreOutcome::DataChanged);
                }
            }

            SemaphoreInput::RemoveSession { session_id } => {
                let before = sem.owners.len();
                sem.owners.retain(|o| o.session_id != session_id);
                if sem.owners.len() != before {
                    outcomes.push(SemaphoreOutcome::OwnersChanged);
                }
                sem.waiters.retain(|w| w.session_id != session_id);
                sem.promote_waiters(&mut outcomes);
            }

            SemaphoreInput::Tick => {
                let now = clock.now();
                let (expired, kept): (Vec<_>, Vec<_>) = sem
                    .waiters
                    .drain(..)
                    .partition(|w| w.deadline.is_some_and(|d| now >= d));
                sem.waiters = kept.into();
                for waiter in expired {
                    outcomes.push(SemaphoreOutcome::NotAcquired {
                        session_id: waiter.session_id,
                        req_id: waiter.req_id,
                        status: Status::new(StatusCode::Timeout, "acquire timed out"),
                    });
                }
                sem.promote_waiters(&mut outcomes);
            }
        }

        (sem, outcomes)
    }

    fn install_owner(&mut self, entry: SemaphoreEntry) {
        match self
            .owners
            .iter_mut()
            .find(|o| o.session_id == entry.session_id)
        {
            Some(existing) => {
                existing.req_id = entry.req_id;
                existing.count = entry.count;
                existing.data = entry.data;
                existing.timeout = entry.timeout;
            }
            None => self.owners.push(entry),
        }
    }

    fn promote_waiters(&mut self, outcomes: &mut Vec<SemaphoreOutcome>) {
        let mut promoted = false;
        while let Some(head) = self.waiters.front() {
            if !self.fits(head.session_id, head.count) {
                break;
            }
            let Some(mut entry) = self.waiters.pop_front() else {
                break;
            };
            entry.deadline = None;
            outcomes.push(SemaphoreOutcome::Acquired {
                session_id: entry.session_id,
                req_id: entry.req_id,
            });
            self.install_owner(entry);
            promoted = true;
        }
        if promoted {
            outcomes.push(SemaphoreOutcome::OwnersChanged);
        }
    }
}

#[cfg(test)]
#[path = "semaphore_tests.rs"]
mod tests;
