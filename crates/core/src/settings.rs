// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario settings
//!
//! Plain serde structs, loadable from TOML. Durations use humantime syntax
//! (`"250ms"`, `"5s"`). Everything except `semaphore_name` has a default.
//!
//! ```toml
//! semaphore_name = "pub/svc-a"
//! description = "svc-a on host-3"
//!
//! [session]
//! timeout = "10s"
//!
//! [backoff]
//! initial_delay = "50ms"
//! max_retries = 5
//! ```

use crate::backoff::BackoffPolicy;
use crate::protocol::UNBOUNDED_LIMIT;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_COORDINATION_NODE: &str = "/local/coordination";

/// Errors that can occur loading or validating settings
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML syntax error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Session engine timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// How long the service keeps a detached session before expiring it
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,
    /// Consecutive unanswered pings before the session is declared dead
    pub max_missed_pings: u32,
    /// How long `stop` waits for the service to confirm
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(1),
            max_missed_pings: 3,
            stop_timeout: Duration::from_secs(1),
        }
    }
}

/// Everything a scenario needs to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSettings {
    #[serde(default = "default_coordination_node")]
    pub coordination_node: String,
    pub semaphore_name: String,
    #[serde(default = "default_limit")]
    pub limit: u64,
    /// Client-supplied identifying data sent with every session start
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub backoff: BackoffPolicy,
}

fn default_coordination_node() -> String {
    DEFAULT_COORDINATION_NODE.to_string()
}

fn default_limit() -> u64 {
    UNBOUNDED_LIMIT
}

impl ScenarioSettings {
    pub fn new(semaphore_name: impl Into<String>) -> Self {
        Self {
            coordination_node: default_coordination_node(),
            semaphore_name: semaphore_name.into(),
            limit: UNBOUNDED_LIMIT,
            description: String::new(),
            session: SessionSettings::default(),
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        let settings: ScenarioSettings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|e| SettingsError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.semaphore_name.is_empty() {
            return Err(SettingsError::Invalid(
                "semaphore_name must not be empty".to_string(),
            ));
        }
        if self.coordination_node.is_empty() {
            return Err(SettingsError::Invalid(
                "coordination_node must not be empty".to_string(),
            ));
        }
        if self.limit == 0 {
            return Err(SettingsError::Invalid("limit must be at least 1".to_string()));
        }
        if self.session.ping_interval.is_zero() {
            return Err(SettingsError::Invalid(
                "session.ping_interval must be positive".to_string(),
            ));
        }
        if self.session.max_missed_pings == 0 {
            return Err(SettingsError::Invalid(
                "session.max_missed_pings must be at least 1".to_string(),
            ));
        }
        if self.backoff.multiplier.is_nan() || self.backoff.multiplier < 1.0 {
            return Err(SettingsError::Invalid(format!(
                "backoff.multiplier must be >= 1.0, got {}",
                self.backoff.multiplier
            )));
        }
        if self.backoff.max_delay < self.backoff.initial_delay {
            return Err(SettingsError::Invalid(
                "backoff.max_delay must not be below backoff.initial_delay".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_coordination_node(mut self, path: impl Into<String>) -> Self {
        self.coordination_node = path.into();
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session.timeout = timeout;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.session.ping_interval = interval;
        self
    }

    pub fn with_max_missed_pings(mut self, max: u32) -> Self {
        self.session.max_missed_pings = max;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.session.stop_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
