use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

use super::LagProbe;

/// A probe whose readings are set explicitly.
///
/// Useful for tests, or for driving overload detection from a signal measured elsewhere.
#[derive(Debug, Default)]
pub struct ManualProbe {
    overloaded: AtomicBool,
    lag_micros: AtomicU64,
}

impl ManualProbe {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether the process is overloaded.
    pub fn set_overloaded(&self, overloaded: bool) {
        self.overloaded.store(overloaded, Ordering::Release);
    }

    /// Set the current lag.
    pub fn set_lag(&self, lag: Duration) {
        let micros = u64::try_from(lag.as_micros()).unwrap_or(u64::MAX);
        self.lag_micros.store(micros, Ordering::Release);
    }

    /// Set the current lag, in milliseconds.
    pub fn set_lag_ms(&self, lag_ms: u64) {
        self.set_lag(Duration::from_millis(lag_ms));
    }
}

impl LagProbe for ManualProbe {
    fn is_overloaded(&self) -> bool {
        self.overloaded.load(Ordering::Acquire)
    }

    fn current_lag(&self) -> Duration {
        Duration::from_micros(self.lag_micros.load(Ordering::Acquire))
    }
}
