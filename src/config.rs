//! Engine configuration.
//!
//! [`ReassemblerConfig`] is consumed at construction and validated before any
//! state is created. It derives `serde` traits so embedding applications can
//! load it with whatever format they already use.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default percent chance that an accumulated request is transmitted.
pub const DEFAULT_REQUEST_PROBABILITY: f32 = 100.0;
/// Default receive-rate threshold used when choosing interfaces.
pub const DEFAULT_RECEIVE_RATE_THRESHOLD: f32 = 0.80;
/// Incoming backlog at or above which a request cycle is skipped.
pub const DEFAULT_INCOMING_QUEUE_THRESHOLD: usize = 15;
/// Base interval between request cycles.
pub const DEFAULT_MISSING_FRAGMENT_TIMEOUT: Duration = Duration::from_secs(5);
/// Silence after which the tail of a message is requested.
pub const DEFAULT_MISSING_TAIL_TIMEOUT: Duration = Duration::from_secs(10);

/// Cap on how many times the same missing data is requested.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestLimit {
    /// Keep requesting until the data arrives or stops being relevant.
    #[default]
    Unlimited,
    /// Stop after this many requests.
    Limited(u32),
}

impl RequestLimit {
    /// Integer form where `-1` means unlimited.
    pub const UNLIMITED_RAW: i64 = -1;

    /// Parse the integer form.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRequestLimit`] for values below `-1` or
    /// above `u32::MAX`.
    pub fn from_raw(raw: i64) -> Result<Self, ConfigError> {
        if raw == Self::UNLIMITED_RAW {
            return Ok(Self::Unlimited);
        }
        u32::try_from(raw)
            .map(Self::Limited)
            .map_err(|_| ConfigError::InvalidRequestLimit(raw))
    }

    /// Integer form where `-1` means unlimited.
    #[must_use]
    pub fn to_raw(self) -> i64 {
        match self {
            Self::Unlimited => Self::UNLIMITED_RAW,
            Self::Limited(limit) => i64::from(limit),
        }
    }

    /// Whether another request is permitted after `already_sent` requests.
    #[must_use]
    pub const fn allows(self, already_sent: u32) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Limited(limit) => already_sent < limit,
        }
    }
}

/// Errors returned when validating configuration.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// The request limit was below `-1` or did not fit in 32 bits.
    #[error("invalid request limit {0}; must be -1 (unlimited) or a non-negative count")]
    InvalidRequestLimit(i64),
    /// A probability fell outside `[0, 100]`.
    #[error("invalid request probability {0}; must be between 0 and 100")]
    InvalidProbability(f32),
    /// The receive-rate threshold fell outside `[0, 1]`.
    #[error("invalid receive rate threshold {0}; must be between 0 and 1")]
    InvalidReceiveRate(f32),
    /// A timeout that drives scheduling was zero.
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

/// Tunables for the reassembly engine.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use dissemination::config::{ReassemblerConfig, RequestLimit};
///
/// let config = ReassemblerConfig {
///     request_limit: RequestLimit::Limited(4),
///     missing_fragment_timeout: Duration::from_millis(500),
///     ..ReassemblerConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReassemblerConfig {
    /// Percent chance, per priority, that a queued request is sent.
    pub default_request_probability: f32,
    /// Receive-rate threshold handed to interface selection.
    pub receive_rate_threshold: f32,
    /// Back off exponentially while no new data arrives.
    pub exponential_backoff: bool,
    /// Reassemble, and request missing parts of, overheard traffic.
    pub request_opportunistic: bool,
    /// Per-message and per-sequence-id request cap.
    pub request_limit: RequestLimit,
    /// Base interval between request cycles.
    pub missing_fragment_timeout: Duration,
    /// Silence after which the tail of a message is requested.
    pub missing_tail_timeout: Duration,
    /// Incoming backlog at or above which a cycle is skipped.
    pub incoming_queue_threshold: usize,
    /// Sequence id every sender's stream is assumed to start at.
    ///
    /// When unset, each sender's ordering starts at the first message
    /// received from it.
    pub initial_sequence_id: Option<u32>,
    /// Give up on a sequenced-reliable gap after this long.
    pub sequenced_skip_after: Option<Duration>,
}

impl Default for ReassemblerConfig {
    fn default() -> Self {
        Self {
            default_request_probability: DEFAULT_REQUEST_PROBABILITY,
            receive_rate_threshold: DEFAULT_RECEIVE_RATE_THRESHOLD,
            exponential_backoff: false,
            request_opportunistic: false,
            request_limit: RequestLimit::Unlimited,
            missing_fragment_timeout: DEFAULT_MISSING_FRAGMENT_TIMEOUT,
            missing_tail_timeout: DEFAULT_MISSING_TAIL_TIMEOUT,
            incoming_queue_threshold: DEFAULT_INCOMING_QUEUE_THRESHOLD,
            initial_sequence_id: None,
            sequenced_skip_after: None,
        }
    }
}

impl ReassemblerConfig {
    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=100.0).contains(&self.default_request_probability) {
            return Err(ConfigError::InvalidProbability(
                self.default_request_probability,
            ));
        }
        if !(0.0..=1.0).contains(&self.receive_rate_threshold) {
            return Err(ConfigError::InvalidReceiveRate(self.receive_rate_threshold));
        }
        if self.missing_fragment_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("missing_fragment_timeout"));
        }
        if self.missing_tail_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("missing_tail_timeout"));
        }
        if self.sequenced_skip_after.is_some_and(|after| after.is_zero()) {
            return Err(ConfigError::ZeroTimeout("sequenced_skip_after"));
        }
        Ok(())
    }
}
