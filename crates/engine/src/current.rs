// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session requests should currently go to
//!
//! Only the scenario supervisor writes the cell; any number of readers take
//! cheap snapshots without waiting on the supervisor.

use crate::session::SessionHandle;
use tokio::sync::watch;

/// Read side of the current-session cell
#[derive(Clone, Debug)]
pub struct CurrentSession {
    rx: watch::Receiver<Option<SessionHandle>>,
}

/// Write side of the current-session cell
#[derive(Debug)]
pub(crate) struct CurrentSessionWriter {
    tx: watch::Sender<Option<SessionHandle>>,
}

pub(crate) fn current_session() -> (CurrentSessionWriter, CurrentSession) {
    let (tx, rx) = watch::channel(None);
    (CurrentSessionWriter { tx }, CurrentSession { rx })
}

impl CurrentSession {
    /// Snapshot of the current session, if it is active
    pub fn get(&self) -> Option<SessionHandle> {
        self.rx.borrow().as_ref().filter(|h| h.is_active()).cloned()
    }

    pub fn is_active(&self) -> bool {
        self.get().is_some()
    }
}

impl CurrentSessionWriter {
    pub(crate) fn set(&self, handle: SessionHandle) {
        self.tx.send_replace(Some(handle));
    }

    pub(crate) fn clear(&self) {
        self.tx.send_replace(None);
    }
}
