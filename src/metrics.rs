//! Per-host and per-client-address bad-actor detection.

use parking_lot::Mutex;

use crate::{curve::ThresholdCurve, window::ObservationWindow, QosConfig};

/// Tracks which keys make up the traffic seen while overloaded, and flags keys taking more than
/// their allowed share.
///
/// Only traffic recorded during overload counts, so a key which is busy while the system is
/// healthy is never penalised.
#[derive(Debug)]
pub struct Metric {
    curve: ThresholdCurve,
    /// Total observations required before any key can be flagged.
    min_requests: usize,

    window: Mutex<ObservationWindow>,
}

/// The host and client address metrics used by a [Qos](crate::Qos) engine.
#[derive(Debug)]
pub struct Metrics {
    history_size: usize,

    host: Metric,
    ip: Metric,
}

impl Metric {
    /// Create a metric remembering `history_size` observations.
    pub fn new(curve: ThresholdCurve, min_requests: usize, history_size: usize) -> Self {
        Self {
            curve,
            min_requests,
            window: Mutex::new(ObservationWindow::with_capacity(history_size)),
        }
    }

    /// Optionally record an observation of `key`, then check whether `key` exceeds its allowed
    /// share at the given lag (in milliseconds).
    ///
    /// Returns `false` until at least `min_requests` observations have been recorded, across all
    /// keys. A key exactly at its allowed share is not flagged.
    pub fn record_and_check(&self, key: &str, record: bool, lag: f64) -> bool {
        let (ratio, total) = {
            let mut window = self.window.lock();
            if record {
                window.record(key);
            }
            (window.ratio(key), window.total())
        };

        if total < self.min_requests {
            tracing::trace!(key, total, min = self.min_requests, "Insufficient history");
            return false;
        }

        let threshold = self.curve.at(lag);

        tracing::trace!(key, ratio, threshold, lag, "Evaluated key");

        ratio > threshold
    }

    /// The share of recorded overload traffic attributed to `key`.
    pub fn ratio(&self, key: &str) -> f64 {
        self.window.lock().ratio(key)
    }

    /// Observations of `key` in the window.
    pub fn count(&self, key: &str) -> usize {
        self.window.lock().count(key)
    }

    /// Observations of all keys in the window.
    pub fn total(&self) -> usize {
        self.window.lock().total()
    }

    /// The allowed share at the given lag, in milliseconds.
    pub fn threshold(&self, lag: f64) -> f64 {
        self.curve.at(lag)
    }
}

impl Metrics {
    pub(crate) fn new(config: &QosConfig) -> Self {
        let lag_bounds = f64::from(config.min_lag_ms)..=f64::from(config.max_lag_ms);

        Self {
            history_size: config.history_size,

            host: Metric::new(
                ThresholdCurve::new(
                    lag_bounds.clone(),
                    config.min_bad_host_threshold,
                    config.max_bad_host_threshold,
                ),
                config.min_host_requests,
                config.history_size,
            ),
            ip: Metric::new(
                ThresholdCurve::new(
                    lag_bounds,
                    config.min_bad_ip_threshold,
                    config.max_bad_ip_threshold,
                ),
                config.min_ip_requests,
                config.history_size,
            ),
        }
    }

    /// Observations remembered per metric.
    pub fn history_size(&self) -> usize {
        self.history_size
    }

    /// Observations keyed by host.
    pub fn host(&self) -> &Metric {
        &self.host
    }

    /// Observations keyed by client address.
    pub fn ip(&self) -> &Metric {
        &self.ip
    }

    /// Shorthand for `self.host().ratio(key)`.
    pub fn host_ratio(&self, key: &str) -> f64 {
        self.host.ratio(key)
    }

    /// Shorthand for `self.ip().ratio(key)`.
    pub fn ip_ratio(&self, key: &str) -> f64 {
        self.ip.ratio(key)
    }
}
