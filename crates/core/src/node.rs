// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordination node model
//!
//! A deterministic, clock-driven model of one coordination node: the sessions
//! attached to it and the semaphores it holds. Every operation returns the
//! responses it produces, addressed by session, and leaves delivery to the
//! caller. The in-memory transport uses it as its service side.

use crate::clock::Clock;
use crate::protocol::{
    DescribeOptions, RequestId, SessionId, SessionRequest, SessionResponse, SessionStart,
    UNBOUNDED_LIMIT,
};
use crate::semaphore::{Semaphore, SemaphoreInput, SemaphoreOutcome};
use crate::status::{Status, StatusCode};
use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

/// Identifies one transport stream attached to the node
pub type StreamId = u64;

/// A response addressed to a session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outbound {
    pub session_id: SessionId,
    pub response: SessionResponse,
}

impl Outbound {
    fn new(session_id: SessionId, response: SessionResponse) -> Self {
        Self {
            session_id,
            response,
        }
    }
}

/// Result of a successful session start
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartOutcome {
    pub session_id: SessionId,
    pub timeout: Duration,
    /// Stream the session was attached to before, if it was taken over
    pub displaced: Option<StreamId>,
}

/// Session as tracked by the node
#[derive(Clone, Debug)]
pub struct NodeSession {
    pub id: SessionId,
    pub description: String,
    pub timeout: Duration,
    pub seq_no: u64,
    protection_key: Vec<u8>,
    pub attached: Option<StreamId>,
    /// Set while detached; the session expires once this passes
    pub expires_at: Option<Instant>,
}

#[derive(Clone, Debug)]
struct Watch {
    session_id: SessionId,
    req_id: RequestId,
    data: bool,
    owners: bool,
}

/// Model of a coordination node
#[derive(Clone, Debug)]
pub struct CoordinationNode {
    path: String,
    sessions: BTreeMap<SessionId, NodeSession>,
    expired: HashSet<SessionId>,
    semaphores: BTreeMap<String, Semaphore>,
    watches: BTreeMap<String, Vec<Watch>>,
    next_session_id: u64,
}

impl CoordinationNode {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            sessions: BTreeMap::new(),
            expired: HashSet::new(),
            semaphores: BTreeMap::new(),
            watches: BTreeMap::new(),
            next_session_id: 1,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn session(&self, id: SessionId) -> Option<&NodeSession> {
        self.sessions.get(&id)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    pub fn semaphore(&self, name: &str) -> Option<&Semaphore> {
        self.semaphores.get(name)
    }

    pub fn semaphore_names(&self) -> Vec<String> {
        self.semaphores.keys().cloned().collect()
    }

    /// Session currently attached to `stream`
    pub fn session_on_stream(&self, stream: StreamId) -> Option<SessionId> {
        self.sessions
            .values()
            .find(|s| s.attached == Some(stream))
            .map(|s| s.id)
    }

    // === Session lifecycle ===

    /// Attach `stream` to a new or existing session
    pub fn start_session(
        &mut self,
        stream: StreamId,
        start: &SessionStart,
    ) -> Result<StartOutcome, Status> {
        if start.path != self.path {
            return Err(Status::new(
                StatusCode::NotFound,
                format!("coordination node {} not found", start.path),
            ));
        }

        let Some(id) = start.session_id else {
            let id = SessionId(self.next_session_id);
            self.next_session_id += 1;
            self.sessions.insert(
                id,
                NodeSession {
                    id,
                    description: start.description.clone(),
                    timeout: start.timeout,
                    seq_no: start.seq_no,
                    protection_key: start.protection_key.clone(),
                    attached: Some(stream),
                    expires_at: None,
                },
            );
            tracing::debug!(session_id = id.0, stream, "node: session created");
            return Ok(StartOutcome {
                session_id: id,
                timeout: start.timeout,
                displaced: None,
            });
        };

        if self.expired.contains(&id) {
            return Err(Status::new(
                StatusCode::SessionExpired,
                format!("session {} expired", id),
            ));
        }
        let Some(session) = self.sessions.get_mut(&id) else {
            return Err(Status::new(
                StatusCode::BadSession,
                format!("session {} not found", id),
            ));
        };
        if session.protection_key != start.protection_key {
            return Err(Status::new(
                StatusCode::BadSession,
                "protection key mismatch",
            ));
        }
        if start.seq_no <= session.seq_no {
            return Err(Status::new(
                StatusCode::BadSession,
                format!("stale seq_no {} (current {})", start.seq_no, session.seq_no),
            ));
        }

        let displaced = session.attached.filter(|s| *s != stream);
        session.seq_no = start.seq_no;
        session.timeout = start.timeout;
        session.attached = Some(stream);
        session.expires_at = None;
        tracing::debug!(session_id = id.0, stream, ?displaced, "node: session resumed");

        Ok(StartOutcome {
            session_id: id,
            timeout: start.timeout,
            displaced,
        })
    }

    /// The stream went away; the session survives until its timeout passes
    pub fn detach_stream(&mut self, stream: StreamId, clock: &impl Clock) {
        for session in self.sessions.values_mut() {
            if session.attached == Some(stream) {
                session.attached = None;
                session.expires_at = Some(clock.deadline_after(session.timeout));
                tracing::debug!(session_id = session.id.0, stream, "node: session detached");
            }
        }
    }

    /// Graceful close requested by the client
    pub fn stop_session(&mut self, id: SessionId, clock: &impl Clock) -> Vec<Outbound> {
        self.remove_session(id, clock)
    }

    /// Forcefully end a session as if its timeout had passed
    pub fn expire_session(&mut self, id: SessionId, clock: &impl Clock) -> Vec<Outbound> {
        if !self.sessions.contains_key(&id) {
            return Vec::new();
        }
        self.expired.insert(id);
        tracing::debug!(session_id = id.0, "node: session expired");
        self.remove_session(id, clock)
    }

    fn remove_session(&mut self, id: SessionId, clock: &impl Clock) -> Vec<Outbound> {
        if self.sessions.remove(&id).is_none() {
            return Vec::new();
        }
        for watches in self.watches.values_mut() {
            watches.retain(|w| w.session_id != id);
        }

        let mut out = Vec::new();
        let names = self.semaphore_names();
        for name in names {
            out.extend(self.apply(&name, SemaphoreInput::RemoveSession { session_id: id }, clock));
        }
        out
    }

    // === Requests ===

    /// Handle a semaphore request from an attached session
    pub fn handle(
        &mut self,
        session_id: SessionId,
        request: SessionRequest,
        clock: &impl Clock,
    ) -> Vec<Outbound> {
        match request {
            SessionRequest::CreateSemaphore {
                req_id,
                name,
                limit,
                data,
            } => {
                let status = self.create_semaphore(&name, limit, data);
                vec![Outbound::new(
                    session_id,
                    SessionResponse::CreateSemaphoreResult { req_id, status },
                )]
            }

            SessionRequest::UpdateSemaphore { req_id, name, data } => {
                if !self.semaphores.contains_key(&name) {
                    return vec![Outbound::new(
                        session_id,
                        SessionResponse::UpdateSemaphoreResult {
                            req_id,
                            status: not_found(&name),
                        },
                    )];
                }
                let mut out = vec![Outbound::new(
                    session_id,
                    SessionResponse::UpdateSemaphoreResult {
                        req_id,
                        status: Status::success(),
                    },
                )];
                out.extend(self.apply(&name, SemaphoreInput::UpdateData { data }, clock));
                out
            }

            SessionRequest::DeleteSemaphore {
                req_id,
                name,
                force,
            } => {
                let mut out = Vec::new();
                let status = self.delete_semaphore(&name, force, &mut out);
                out.insert(
                    0,
                    Outbound::new(
                        session_id,
                        SessionResponse::DeleteSemaphoreResult { req_id, status },
                    ),
                );
                out
            }

            SessionRequest::AcquireSemaphore {
                req_id,
                name,
                count,
                timeout,
                data,
                ephemeral,
            } => {
                if !self.semaphores.contains_key(&name) {
                    if !ephemeral {
                        return vec![Outbound::new(
                            session_id,
                            SessionResponse::AcquireSemaphoreResult {
                                req_id,
                                status: not_found(&name),
                                acquired: false,
                            },
                        )];
                    }
                    self.semaphores
                        .insert(name.clone(), Semaphore::ephemeral(name.clone()));
                }
                self.apply(
                    &name,
                    SemaphoreInput::Acquire {
                        session_id,
                        req_id,
                        count,
                        data,
                        timeout,
                    },
                    clock,
                )
            }

            SessionRequest::ReleaseSemaphore { req_id, name } => {
                if !self.semaphores.contains_key(&name) {
                    return vec![Outbound::new(
                        session_id,
                        SessionResponse::ReleaseSemaphoreResult {
                            req_id,
                            status: Status::success(),
                            released: false,
                        },
                    )];
                }
                let mut out = self.apply(&name, SemaphoreInput::Release { session_id }, clock);
                // The release result carries the release request's id
                for o in out.iter_mut() {
                    if let SessionResponse::ReleaseSemaphoreResult { req_id: slot, .. } =
                        &mut o.response
                    {
                        *slot = req_id;
                    }
                }
                out
            }

            SessionRequest::DescribeSemaphore {
                req_id,
                name,
                options,
            } => vec![Outbound::new(
                session_id,
                self.describe(session_id, req_id, &name, options),
            )],

            other => {
                tracing::warn!(request = other.name(), "node: unexpected session request");
                Vec::new()
            }
        }
    }

    fn create_semaphore(&mut self, name: &str, limit: u64, data: Vec<u8>) -> Status {
        if name.is_empty() || limit == 0 {
            return Status::new(StatusCode::BadRequest, "name and limit are required");
        }
        match self.semaphores.get(name) {
            Some(existing) if existing.limit == limit => Status::success(),
            Some(existing) => Status::new(
                StatusCode::AlreadyExists,
                format!(
                    "semaphore {} exists with limit {} (requested {})",
                    name,
                    fmt_limit(existing.limit),
                    fmt_limit(limit)
                ),
            ),
            None => {
                self.semaphores
                    .insert(name.to_string(), Semaphore::new(name, limit, data));
                Status::success()
            }
        }
    }

    fn delete_semaphore(&mut self, name: &str, force: bool, out: &mut Vec<Outbound>) -> Status {
        let Some(sem) = self.semaphores.get(name) else {
            return not_found(name);
        };
        if !sem.is_idle() && !force {
            return Status::new(
                StatusCode::PreconditionFailed,
                format!("semaphore {} has holders or waiters", name),
            );
        }
        if let Some(sem) = self.semaphores.remove(name) {
            for waiter in sem.waiters {
                out.push(Outbound::new(
                    waiter.session_id,
                    SessionResponse::AcquireSemaphoreResult {
                        req_id: waiter.req_id,
                        status: Status::new(StatusCode::NotFound, "semaphore deleted"),
                        acquired: false,
                    },
                ));
            }
        }
        out.extend(self.fire_watches(name, true, true));
        Status::success()
    }

    fn describe(
        &mut self,
        session_id: SessionId,
        req_id: RequestId,
        name: &str,
        options: DescribeOptions,
    ) -> SessionResponse {
        let Some(sem) = self.semaphores.get(name) else {
            return SessionResponse::DescribeSemaphoreResult {
                req_id,
                status: not_found(name),
                description: None,
                watch_added: false,
            };
        };
        let description = sem.describe(options);

        let watch_added = options.is_watch();
        if watch_added {
            let watches = self.watches.entry(name.to_string()).or_default();
            watches.retain(|w| w.session_id != session_id);
            watches.push(Watch {
                session_id,
                req_id,
                data: options.watch_data,
                owners: options.watch_owners,
            });
        }

        SessionResponse::DescribeSemaphoreResult {
            req_id,
            status: Status::success(),
            description: Some(description),
            watch_added,
        }
    }

    /// Run one semaphore transition and translate its outcomes
    fn apply(&mut self, name: &str, input: SemaphoreInput, clock: &impl Clock) -> Vec<Outbound> {
        let Some(sem) = self.semaphores.get(name) else {
            return Vec::new();
        };
        let (next, outcomes) = sem.transition(input, clock);

        let mut out = Vec::new();
        let mut owners_changed = false;
        let mut data_changed = false;
        for outcome in outcomes {
            match outcome {
                SemaphoreOutcome::Acquired { session_id, req_id } => out.push(Outbound::new(
                    session_id,
                    SessionResponse::AcquireSemaphoreResult {
                        req_id,
                        status: Status::success(),
                        acquired: true,
                    },
                )),
                SemaphoreOutcome::Queued { session_id, req_id } => out.push(Outbound::new(
                    session_id,
                    SessionResponse::AcquireSemaphorePending { req_id },
                )),
                SemaphoreOutcome::NotAcquired {
                    session_id,
                    req_id,
                    status,
                } => out.push(Outbound::new(
                    session_id,
                    SessionResponse::AcquireSemaphoreResult {
                        req_id,
                        status,
                        acquired: false,
                    },
                )),
                SemaphoreOutcome::Released {
                    session_id,
                    released,
                } => out.push(Outbound::new(
                    session_id,
                    SessionResponse::ReleaseSemaphoreResult {
                        req_id: 0,
                        status: Status::success(),
                        released,
                    },
                )),
                SemaphoreOutcome::OwnersChanged => owners_changed = true,
                SemaphoreOutcome::DataChanged => data_changed = true,
            }
        }

        if next.ephemeral && next.is_idle() {
            self.semaphores.remove(name);
            tracing::debug!(semaphore = name, "node: ephemeral semaphore removed");
        } else {
            self.semaphores.insert(name.to_string(), next);
        }

        if owners_changed || data_changed {
            out.extend(self.fire_watches(name, data_changed, owners_changed));
        }
        out
    }

    fn fire_watches(&mut self, name: &str, data_changed: bool, owners_changed: bool) -> Vec<Outbound> {
        let Some(watches) = self.watches.get_mut(name) else {
            return Vec::new();
        };
        let (fired, kept): (Vec<_>, Vec<_>) = watches
            .drain(..)
            .partition(|w| (w.data && data_changed) || (w.owners && owners_changed));
        *watches = kept;

        fired
            .into_iter()
            .map(|w| {
                Outbound::new(
                    w.session_id,
                    SessionResponse::DescribeSemaphoreChanged {
                        req_id: w.req_id,
                        data_changed,
                        owners_changed,
                    },
                )
            })
            .collect()
    }

    // === Maintenance ===

    /// Expire waiter timeouts and detached sessions past their deadline
    pub fn tick(&mut self, clock: &impl Clock) -> Vec<Outbound> {
        let now = clock.now();
        let mut out = Vec::new();

        let expired: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.expires_at.is_some_and(|at| now >= at))
            .map(|s| s.id)
            .collect();
        for id in expired {
            out.extend(self.expire_session(id, clock));
        }

        let names = self.semaphore_names();
        for name in names {
            out.extend(self.apply(&name, SemaphoreInput::Tick, clock));
        }
        out
    }
}

fn not_found(name: &str) -> Status {
    Status::new(StatusCode::NotFound, format!("semaphore {} not found", name))
}

fn fmt_limit(limit: u64) -> String {
    if limit == UNBOUNDED_LIMIT {
        "unbounded".to_string()
    } else {
        limit.to_string()
    }
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
