// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protection key generation
//!
//! A protection key is chosen once per logical session and sent with every
//! start attempt. The service refuses to re-attach a session when the key does
//! not match, so a second client cannot hijack a session by guessing its id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Generates protection keys for new sessions
pub trait KeyGen: Clone + Send + Sync + 'static {
    fn next_key(&self) -> Vec<u8>;
}

/// Random 16-byte keys from UUIDv4
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomKeyGen;

impl KeyGen for RandomKeyGen {
    fn next_key(&self) -> Vec<u8> {
        uuid::Uuid::new_v4().as_bytes().to_vec()
    }
}

/// Predictable keys for tests: `<prefix>-1`, `<prefix>-2`, ...
#[derive(Clone, Debug)]
pub struct SequentialKeyGen {
    prefix: String,
    counter: Arc<AtomicU64>,
}

impl SequentialKeyGen {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl Default for SequentialKeyGen {
    fn default() -> Self {
        Self::new("key")
    }
}

impl KeyGen for SequentialKeyGen {
    fn next_key(&self) -> Vec<u8> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.prefix, n).into_bytes()
    }
}
