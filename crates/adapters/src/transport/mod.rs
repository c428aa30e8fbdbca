// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session transport adapters
//!
//! A transport opens one ordered, bidirectional stream of protocol messages
//! per session attempt. Messages are delivered in submission order in each
//! direction. The stream is finished when either side drops its half: the
//! service closing shows up as `recv()` returning `None`.

#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeTransport, TransportCall};

use async_trait::async_trait;
use tether_core::{SessionRequest, SessionResponse, Status, StatusCode};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from transport operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connect refused: {0}")]
    ConnectRefused(String),
    #[error("stream closed")]
    StreamClosed,
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    /// Status reported to observers when a stream cannot be used
    pub fn status(&self) -> Status {
        match self {
            TransportError::ConnectRefused(_) => {
                Status::new(StatusCode::TransportError, self.to_string())
            }
            TransportError::StreamClosed => Status::new(StatusCode::SessionLost, self.to_string()),
            TransportError::Unavailable(_) => {
                Status::new(StatusCode::Unavailable, self.to_string())
            }
        }
    }
}

/// Client end of one stream
#[derive(Debug)]
pub struct TransportStream {
    pub sender: StreamSender,
    pub receiver: mpsc::UnboundedReceiver<SessionResponse>,
}

impl TransportStream {
    pub fn new(
        sender: mpsc::UnboundedSender<SessionRequest>,
        receiver: mpsc::UnboundedReceiver<SessionResponse>,
    ) -> Self {
        Self {
            sender: StreamSender { inner: sender },
            receiver,
        }
    }

    pub fn send(&self, request: SessionRequest) -> Result<(), TransportError> {
        self.sender.send(request)
    }

    pub async fn recv(&mut self) -> Option<SessionResponse> {
        self.receiver.recv().await
    }

    /// Close the stream from the client side
    pub fn close(self) {
        drop(self);
    }
}

/// Outbound half of a stream
#[derive(Debug, Clone)]
pub struct StreamSender {
    inner: mpsc::UnboundedSender<SessionRequest>,
}

impl StreamSender {
    pub fn send(&self, request: SessionRequest) -> Result<(), TransportError> {
        self.inner
            .send(request)
            .map_err(|_| TransportError::StreamClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Adapter for opening session streams to the coordination service
#[async_trait]
pub trait Transport: Clone + Send + Sync + 'static {
    /// Open a new stream; each session attempt uses its own
    async fn open_stream(&self) -> Result<TransportStream, TransportError>;
}
