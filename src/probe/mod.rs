//! Sources of the overload signal.

mod event_loop;
mod manual;
mod moving_avg;

use std::{fmt::Debug, time::Duration};

use thiserror::Error;

pub use event_loop::{EventLoopProbe, EventLoopProbeConfig};
pub use manual::ManualProbe;

/// Reports whether the process is overloaded, and by how much.
///
/// Read synchronously on every request, so implementations should only load cached values.
pub trait LagProbe: Debug + Send + Sync {
    /// Whether the process is currently considered overloaded.
    fn is_overloaded(&self) -> bool;

    /// The latest measured lag.
    fn current_lag(&self) -> Duration;
}

/// A probe could not be started.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProbeError {
    /// Sampling needs a Tokio runtime.
    #[error("lag probe must be started from within a Tokio runtime")]
    NoRuntime,

    /// The sampling interval must be non-zero.
    #[error("lag probe check interval must be > 0")]
    ZeroInterval,

    /// The smoothing factor must be within `(0, 1]`.
    #[error("lag probe smoothing factor must be within (0, 1]")]
    SmoothingFactor,
}

pub(crate) fn as_millis_f64(lag: Duration) -> f64 {
    lag.as_secs_f64() * 1000.0
}
