// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the client engine

use tether_adapters::{AuthError, TransportError};
use tether_core::{SettingsError, Status, StatusCode};
use thiserror::Error;

/// Errors returned synchronously to callers of the engine
///
/// Outcomes of requests that reached the service are never errors; they
/// arrive later as events carrying a [`Status`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no active session")]
    NoActiveSession,
    #[error("session closed")]
    SessionClosed,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),
    #[error("stopped")]
    Stopped,
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
}

impl EngineError {
    /// Status reported to observers for this error
    pub fn status(&self) -> Status {
        match self {
            EngineError::NoActiveSession => {
                Status::new(StatusCode::NoActiveSession, self.to_string())
            }
            EngineError::SessionClosed => Status::new(StatusCode::SessionLost, self.to_string()),
            EngineError::Transport(e) => e.status(),
            EngineError::Auth(AuthError::Unavailable(_)) => {
                Status::new(StatusCode::Unavailable, self.to_string())
            }
            EngineError::Auth(AuthError::Rejected(_)) => {
                Status::new(StatusCode::Unauthenticated, self.to_string())
            }
            EngineError::Stopped => Status::new(StatusCode::Cancelled, self.to_string()),
            EngineError::Settings(_) => Status::new(StatusCode::BadRequest, self.to_string()),
        }
    }
}
