//! Engine configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration for a [Qos](crate::Qos) engine.
///
/// All fields are optional when deserializing; missing fields take their default value.
///
/// The bad-actor thresholds are ratios of overload traffic. The "min" threshold applies at
/// `min_lag_ms` and the "max" threshold at `max_lag_ms`, so the min threshold is normally the
/// larger (more lenient) of the two.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct QosConfig {
    /// Lag at which bad-actor detection starts, using the lenient thresholds.
    pub min_lag_ms: u32,
    /// Lag at which the strict thresholds apply.
    pub max_lag_ms: u32,
    /// Lag at which every request is throttled, regardless of who sent it.
    pub user_lag_ms: u32,

    /// Allowed share of overload traffic for one host, at `min_lag_ms`.
    pub min_bad_host_threshold: f64,
    /// Allowed share of overload traffic for one host, at `max_lag_ms`.
    pub max_bad_host_threshold: f64,
    /// Allowed share of overload traffic for one client address, at `min_lag_ms`.
    pub min_bad_ip_threshold: f64,
    /// Allowed share of overload traffic for one client address, at `max_lag_ms`.
    pub max_bad_ip_threshold: f64,

    /// Host observations needed before any host can be flagged.
    pub min_host_requests: usize,
    /// Client address observations needed before any address can be flagged.
    pub min_ip_requests: usize,

    /// Number of overload observations remembered, per metric.
    pub history_size: usize,

    /// HTTP status written for throttled requests.
    pub error_status_code: u16,
    /// Never block loopback or private client addresses by IP.
    pub exempt_local_address: bool,
}

/// Invalid [QosConfig].
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ConfigError {
    /// `min_lag_ms` is greater than `max_lag_ms`.
    #[error("min lag ({min}ms) must not exceed max lag ({max}ms)")]
    LagBounds {
        #[allow(missing_docs)]
        min: u32,
        #[allow(missing_docs)]
        max: u32,
    },

    /// A threshold is not a ratio.
    #[error("{name} must be within [0, 1], got {value}")]
    Threshold {
        #[allow(missing_docs)]
        name: &'static str,
        #[allow(missing_docs)]
        value: f64,
    },

    /// The history must hold at least one observation.
    #[error("history size must be > 0")]
    EmptyHistory,

    /// Not an HTTP status code.
    #[error("invalid error status code: {0}")]
    StatusCode(u16),
}

impl QosConfig {
    const DEFAULT_MIN_LAG_MS: u32 = 70;
    const DEFAULT_MAX_LAG_MS: u32 = 300;
    const DEFAULT_USER_LAG_MS: u32 = 500;

    const DEFAULT_LAX_THRESHOLD: f64 = 0.50;
    const DEFAULT_STRICT_THRESHOLD: f64 = 0.01;

    const DEFAULT_MIN_REQUESTS: usize = 10;
    const DEFAULT_HISTORY_SIZE: usize = 500;
    const DEFAULT_ERROR_STATUS_CODE: u16 = 503;

    /// Set the lag range over which thresholds are interpolated.
    pub fn with_lag_bounds(self, min_lag_ms: u32, max_lag_ms: u32) -> Self {
        Self {
            min_lag_ms,
            max_lag_ms,
            ..self
        }
    }

    /// Set the lag at which every request is throttled.
    pub fn with_user_lag(self, user_lag_ms: u32) -> Self {
        Self {
            user_lag_ms,
            ..self
        }
    }

    /// Set the host thresholds at min and max lag.
    pub fn with_host_thresholds(self, min: f64, max: f64) -> Self {
        Self {
            min_bad_host_threshold: min,
            max_bad_host_threshold: max,
            ..self
        }
    }

    /// Set the client address thresholds at min and max lag.
    pub fn with_ip_thresholds(self, min: f64, max: f64) -> Self {
        Self {
            min_bad_ip_threshold: min,
            max_bad_ip_threshold: max,
            ..self
        }
    }

    /// Require this many host observations before flagging any host.
    pub fn with_min_host_requests(self, requests: usize) -> Self {
        Self {
            min_host_requests: requests,
            ..self
        }
    }

    /// Require this many client address observations before flagging any address.
    pub fn with_min_ip_requests(self, requests: usize) -> Self {
        Self {
            min_ip_requests: requests,
            ..self
        }
    }

    /// Remember this many overload observations per metric.
    pub fn with_history_size(self, history_size: usize) -> Self {
        Self {
            history_size,
            ..self
        }
    }

    /// Respond to throttled requests with this status.
    pub fn with_error_status_code(self, status: u16) -> Self {
        Self {
            error_status_code: status,
            ..self
        }
    }

    /// Whether local client addresses are exempt from IP blocking.
    pub fn with_exempt_local_address(self, exempt: bool) -> Self {
        Self {
            exempt_local_address: exempt,
            ..self
        }
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_lag_ms > self.max_lag_ms {
            return Err(ConfigError::LagBounds {
                min: self.min_lag_ms,
                max: self.max_lag_ms,
            });
        }

        for (name, value) in [
            ("min bad host threshold", self.min_bad_host_threshold),
            ("max bad host threshold", self.max_bad_host_threshold),
            ("min bad ip threshold", self.min_bad_ip_threshold),
            ("max bad ip threshold", self.max_bad_ip_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Threshold { name, value });
            }
        }

        if self.history_size == 0 {
            return Err(ConfigError::EmptyHistory);
        }

        if !(100..=599).contains(&self.error_status_code) {
            return Err(ConfigError::StatusCode(self.error_status_code));
        }

        Ok(())
    }
}

impl Default for QosConfig {
    fn default() -> Self {
        Self {
            min_lag_ms: Self::DEFAULT_MIN_LAG_MS,
            max_lag_ms: Self::DEFAULT_MAX_LAG_MS,
            user_lag_ms: Self::DEFAULT_USER_LAG_MS,

            min_bad_host_threshold: Self::DEFAULT_LAX_THRESHOLD,
            max_bad_host_threshold: Self::DEFAULT_STRICT_THRESHOLD,
            min_bad_ip_threshold: Self::DEFAULT_LAX_THRESHOLD,
            max_bad_ip_threshold: Self::DEFAULT_STRICT_THRESHOLD,

            min_host_requests: Self::DEFAULT_MIN_REQUESTS,
            min_ip_requests: Self::DEFAULT_MIN_REQUESTS,

            history_size: Self::DEFAULT_HISTORY_SIZE,

            error_status_code: Self::DEFAULT_ERROR_STATUS_CODE,
            exempt_local_address: true,
        }
    }
}
