use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use conv::ConvUtil;
use tokio::{runtime::Handle, task::JoinHandle, time::Instant};

use super::{as_millis_f64, moving_avg::ExpSmoothed, LagProbe, ProbeError};

/// Settings for an [EventLoopProbe].
#[derive(Debug, Clone, PartialEq)]
pub struct EventLoopProbeConfig {
    /// How often to measure scheduling lag.
    pub check_interval: Duration,
    /// Smoothed lag above which the process is overloaded.
    pub high_water: Duration,
    /// Weighting of the newest measurement in the smoothed lag, within `(0, 1]`.
    pub smoothing_factor: f64,
}

impl Default for EventLoopProbeConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(500),
            high_water: Duration::from_millis(70),
            smoothing_factor: 1.0 / 3.0,
        }
    }
}

/// Measures how late the Tokio runtime runs a periodic timer.
///
/// A busy runtime wakes the timer later than requested; the difference is the lag. Lag is
/// smoothed with an exponential moving average, and the process is considered overloaded while
/// the smoothed lag is above the high-water mark.
///
/// Sampling runs in a background task, stopped when the probe is dropped.
#[derive(Debug)]
pub struct EventLoopProbe {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct Shared {
    lag_micros: AtomicU64,
    overloaded: AtomicBool,
}

#[derive(Debug)]
struct Sampler {
    high_water_ms: f64,
    smoothed: ExpSmoothed,
}

impl EventLoopProbe {
    /// Start sampling on the current Tokio runtime.
    pub fn spawn(config: EventLoopProbeConfig) -> Result<Self, ProbeError> {
        if config.check_interval.is_zero() {
            return Err(ProbeError::ZeroInterval);
        }
        if !(config.smoothing_factor > 0.0 && config.smoothing_factor <= 1.0) {
            return Err(ProbeError::SmoothingFactor);
        }
        let handle = Handle::try_current().map_err(|_| ProbeError::NoRuntime)?;

        let shared = Arc::new(Shared::default());
        let sampler = Sampler::new(&config);

        let task = handle.spawn(run(config.check_interval, sampler, Arc::clone(&shared)));

        tracing::debug!(
            interval = ?config.check_interval,
            high_water = ?config.high_water,
            "Started lag probe"
        );

        Ok(Self { shared, task })
    }
}

async fn run(check_interval: Duration, mut sampler: Sampler, shared: Arc<Shared>) {
    loop {
        let start = Instant::now();
        tokio::time::sleep(check_interval).await;

        let lag = start.elapsed().saturating_sub(check_interval);

        sampler.observe(lag, &shared);
    }
}

impl Sampler {
    fn new(config: &EventLoopProbeConfig) -> Self {
        Self {
            high_water_ms: as_millis_f64(config.high_water),
            smoothed: ExpSmoothed::new(config.smoothing_factor),
        }
    }

    fn observe(&mut self, lag: Duration, shared: &Shared) {
        let smoothed_ms = self.smoothed.sample(as_millis_f64(lag));

        let micros = (smoothed_ms * 1000.0)
            .approx_as::<u64>()
            .unwrap_or(u64::MAX);
        shared.lag_micros.store(micros, Ordering::Release);

        let overloaded = smoothed_ms > self.high_water_ms;
        let was_overloaded = shared.overloaded.swap(overloaded, Ordering::AcqRel);

        if overloaded != was_overloaded {
            tracing::debug!(lag_ms = smoothed_ms, overloaded, "Overload state changed");
        }
    }
}

impl LagProbe for EventLoopProbe {
    fn is_overloaded(&self) -> bool {
        self.shared.overloaded.load(Ordering::Acquire)
    }

    fn current_lag(&self) -> Duration {
        Duration::from_micros(self.shared.lag_micros.load(Ordering::Acquire))
    }
}

impl Drop for EventLoopProbe {
    fn drop(&mut self) {
        self.task.abort();
    }
}
