//! Lag-dependent thresholds.

use std::ops::RangeInclusive;

/// Map a lag (in milliseconds) onto a threshold, linearly interpolating between `thresholds`
/// across `lag_bounds` and clamping outside of them.
///
/// ```text
/// lag <= min_lag  =>  lax
/// lag >= max_lag  =>  strict
/// otherwise       =>  lax + t * (strict - lax), t = (lag - min_lag) / (max_lag - min_lag)
/// ```
///
/// With `lax > strict` the threshold tightens as lag rises. A zero-width lag domain degrades to
/// a step at `max_lag`.
pub fn threshold(lag: f64, lag_bounds: &RangeInclusive<f64>, lax: f64, strict: f64) -> f64 {
    let (min_lag, max_lag) = (*lag_bounds.start(), *lag_bounds.end());

    // Exact at the bounds. Interpolating can round past them.
    if lag >= max_lag {
        return strict;
    }
    if lag <= min_lag {
        return lax;
    }

    let t = (lag - min_lag) / (max_lag - min_lag);

    lax + t * (strict - lax)
}

/// A [threshold] function with fixed bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdCurve {
    lag_bounds: RangeInclusive<f64>,
    /// Allowed ratio at or below the minimum lag.
    lax: f64,
    /// Allowed ratio at or above the maximum lag.
    strict: f64,
}

impl ThresholdCurve {
    /// Create a curve from `lax` at `lag_bounds.start()` to `strict` at `lag_bounds.end()`.
    pub fn new(lag_bounds: RangeInclusive<f64>, lax: f64, strict: f64) -> Self {
        assert!(
            lag_bounds.start() <= lag_bounds.end(),
            "min lag must not exceed max lag"
        );
        Self {
            lag_bounds,
            lax,
            strict,
        }
    }

    /// The allowed ratio at the given lag, in milliseconds.
    pub fn at(&self, lag: f64) -> f64 {
        threshold(lag, &self.lag_bounds, self.lax, self.strict)
    }
}
