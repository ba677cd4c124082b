//! The throttling decision engine.

use std::{fmt, sync::Arc};

use crate::{
    address::is_local_address,
    config::{ConfigError, QosConfig},
    metrics::Metrics,
    middleware::{Middleware, Request},
    probe::{as_millis_f64, EventLoopProbe, EventLoopProbeConfig, LagProbe, ProbeError},
};

/// Key used when a request has no host or client address.
pub const UNKNOWN_KEY: &str = "unknown";

/// Why a request should be throttled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BadActor {
    /// Lag is so high that every request is throttled.
    UserLag,
    /// The request's host takes more than its share of overload traffic.
    BadHost,
    /// The request's client address takes more than its share of overload traffic.
    BadIp,
}

/// Decides which requests to shed while the process is overloaded.
///
/// Under overload, every request is attributed to its host and client address. Hosts and
/// addresses responsible for a disproportionate share of overload traffic are throttled, while
/// everyone else continues to be served. The allowed share shrinks as lag grows, and above the
/// user lag every request is throttled.
#[derive(Debug)]
pub struct Qos {
    config: QosConfig,
    probe: Arc<dyn LagProbe>,
    metrics: Metrics,
}

impl Qos {
    /// Create an engine reading the overload signal from `probe`.
    pub fn new(config: QosConfig, probe: Arc<dyn LagProbe>) -> Result<Self, ConfigError> {
        config.validate()?;

        tracing::info!(?config, "Created QoS engine");

        Ok(Self {
            metrics: Metrics::new(&config),
            config,
            probe,
        })
    }

    /// Create an engine with an [EventLoopProbe] on the current Tokio runtime.
    ///
    /// The probe reports overload once the runtime's smoothed lag exceeds `min_lag_ms`.
    pub fn with_event_loop_probe(config: QosConfig) -> Result<Self, QosError> {
        config.validate()?;

        let probe = EventLoopProbe::spawn(EventLoopProbeConfig {
            high_water: std::time::Duration::from_millis(config.min_lag_ms.into()),
            ..Default::default()
        })?;

        Ok(Self::new(config, Arc::new(probe))?)
    }

    /// The engine's configuration.
    pub fn config(&self) -> &QosConfig {
        &self.config
    }

    /// The host and client address metrics.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// The overload signal.
    pub fn probe(&self) -> &dyn LagProbe {
        self.probe.as_ref()
    }

    /// A middleware which throttles requests using this engine.
    pub fn middleware<R: Request>(self: &Arc<Self>) -> Middleware<R> {
        Middleware::new(Arc::clone(self))
    }

    /// Decide whether to throttle `req`, and why.
    ///
    /// Returns `None` when the request should be served. Requests are only recorded while the
    /// probe reports overload.
    pub fn should_throttle_request<R: Request + ?Sized>(&self, req: &R) -> Option<BadActor> {
        if !self.probe.is_overloaded() {
            return None;
        }

        let lag = self.lag_ms();
        if lag >= f64::from(self.config.user_lag_ms) {
            return Some(BadActor::UserLag);
        }

        let host = req.host().unwrap_or(UNKNOWN_KEY);
        if self.metrics.host().record_and_check(host, true, lag) {
            return Some(BadActor::BadHost);
        }

        let ip = req.remote_addr().unwrap_or(UNKNOWN_KEY);
        if self.config.exempt_local_address && is_local_address(ip) {
            return None;
        }

        if self.metrics.ip().record_and_check(ip, true, lag) {
            return Some(BadActor::BadIp);
        }

        None
    }

    /// Whether `host` takes more than its share of overload traffic.
    ///
    /// Records an observation of `host` first if `record` is `Some(true)`, or if it's `None` and
    /// the probe reports overload.
    pub fn is_bad_host(&self, host: &str, record: Option<bool>) -> bool {
        let record = record.unwrap_or_else(|| self.probe.is_overloaded());
        self.metrics
            .host()
            .record_and_check(host, record, self.lag_ms())
    }

    /// Whether the client address `ip` takes more than its share of overload traffic.
    ///
    /// Records an observation of `ip` first if `record` is `Some(true)`, or if it's `None` and the
    /// probe reports overload.
    pub fn is_bad_ip(&self, ip: &str, record: Option<bool>) -> bool {
        let record = record.unwrap_or_else(|| self.probe.is_overloaded());
        self.metrics.ip().record_and_check(ip, record, self.lag_ms())
    }

    fn lag_ms(&self) -> f64 {
        as_millis_f64(self.probe.current_lag())
    }
}

/// Failed to create a [Qos] engine.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum QosError {
    #[allow(missing_docs)]
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[allow(missing_docs)]
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

impl fmt::Display for BadActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BadActor::UserLag => "userLag",
            BadActor::BadHost => "badHost",
            BadActor::BadIp => "badIp",
        };
        f.write_str(name)
    }
}
