//! Settings consumed by the relay and the listener.
//!
//! Loading is left to the host application: every struct deserializes with
//! serde and falls back to defaults for missing fields.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const DEFAULT_POLL_INTERVAL_SECS: f64 = 1.0;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Seconds between relay cycles.
    pub poll_interval_secs: f64,
    /// Maximum rows fetched per cycle.
    pub batch_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl RelayConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_secs = interval.as_secs_f64();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Poll interval as a [`Duration`], or a validation error when the
    /// configured seconds are not a positive representable duration.
    pub fn poll_interval(&self) -> Result<Duration, ValidationError> {
        let invalid = || {
            ValidationError::new(
                "poll_interval_secs",
                format!(
                    "must be a positive number of seconds, got {}",
                    self.poll_interval_secs
                ),
            )
        };
        if self.poll_interval_secs <= 0.0 {
            return Err(invalid());
        }
        Duration::try_from_secs_f64(self.poll_interval_secs).map_err(|_| invalid())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.poll_interval()?;
        if self.batch_size == 0 {
            return Err(ValidationError::new("batch_size", "must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Upper bound on handler invocations running at once.
    pub max_in_flight: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl ListenerConfig {
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_in_flight == 0 {
            return Err(ValidationError::new("max_in_flight", "must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TramConfig {
    pub relay: RelayConfig,
    pub listener: ListenerConfig,
}

impl TramConfig {
    pub fn with_relay(mut self, relay: RelayConfig) -> Self {
        self.relay = relay;
        self
    }

    pub fn with_listener(mut self, listener: ListenerConfig) -> Self {
        self.listener = listener;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.relay.validate()?;
        self.listener.validate()
    }
}
