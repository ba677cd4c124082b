//! Moving averages.

/// An [exponential moving average](https://en.wikipedia.org/wiki/Exponential_smoothing).
#[derive(Debug)]
pub(crate) struct ExpSmoothed {
    /// Smoothing factor `α`. Weighting for the newest sample.
    ///
    /// 0 < `α` <= 1
    smoothing_factor: f64,

    value: f64,
}

impl ExpSmoothed {
    pub(crate) fn new(smoothing_factor: f64) -> Self {
        assert!(
            smoothing_factor > 0.0 && smoothing_factor <= 1.0,
            "smoothing factor must be within (0, 1]"
        );
        Self {
            smoothing_factor,
            value: 0.0,
        }
    }

    pub(crate) fn sample(&mut self, sample: f64) -> f64 {
        self.value += (sample - self.value) * self.smoothing_factor;
        self.value
    }
}
