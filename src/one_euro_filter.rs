//! One Euro filter: an adaptive low-pass filter for noisy rig-control input.
//!
//! The cutoff frequency rises with the estimated speed of the signal, so slow
//! motion is smoothed heavily (less jitter) and fast motion is tracked closely
//! (less lag). Every component of the signal is filtered independently.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::{Clock, SystemClock};
use crate::signal::Signal;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("signal shape {actual:?} does not match filter shape {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("elapsed time since the previous sample must be positive, got {elapsed} s")]
    DegenerateTimeStep { elapsed: f64 },
    #[error("invalid filter parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("a signal of shape {shape:?} cannot hold {len} values")]
    MalformedSignal { shape: Vec<usize>, len: usize },
}

/// A filter parameter given either once for all components or per component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Param {
    Scalar(f64),
    PerComponent(Vec<f64>),
}

impl Param {
    fn broadcast(&self, name: &'static str, len: usize) -> Result<Vec<f64>, FilterError> {
        match self {
            Param::Scalar(value) => Ok(vec![*value; len]),
            Param::PerComponent(values) if values.len() == len => Ok(values.clone()),
            Param::PerComponent(values) => Err(FilterError::InvalidParameter {
                name,
                reason: format!("expected {} components, got {}", len, values.len()),
            }),
        }
    }

    fn broadcast_rate(&self, name: &'static str, len: usize) -> Result<Vec<f64>, FilterError> {
        let values = self.broadcast(name, len)?;
        if let Some(bad) = values.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(FilterError::InvalidParameter {
                name,
                reason: format!("must be finite and non-negative, got {}", bad),
            });
        }
        Ok(values)
    }
}

impl From<f64> for Param {
    fn from(value: f64) -> Self {
        Param::Scalar(value)
    }
}

impl From<Vec<f64>> for Param {
    fn from(values: Vec<f64>) -> Self {
        Param::PerComponent(values)
    }
}

/// Construction parameters. Defaults: no initial derivative, 1 Hz minimum
/// cutoff, no speed adaptation, 1 Hz derivative cutoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    pub initial_derivative: Param,
    pub min_cutoff: Param,
    pub beta: Param,
    pub derivative_cutoff: Param,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            initial_derivative: Param::Scalar(0.0),
            min_cutoff: Param::Scalar(1.0),
            beta: Param::Scalar(0.0),
            derivative_cutoff: Param::Scalar(1.0),
        }
    }
}

/// Everything the filter remembers between calls.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterState {
    shape: Vec<usize>,
    min_cutoff: Vec<f64>,
    beta: Vec<f64>,
    derivative_cutoff: Vec<f64>,
    previous_value: Vec<f64>,
    previous_derivative: Vec<f64>,
    previous_timestamp: f64,
}

// Read-only inspection of the materialized parameters and memory.
#[allow(unused)]
impl FilterState {
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn min_cutoff(&self) -> &[f64] {
        &self.min_cutoff
    }

    pub fn beta(&self) -> &[f64] {
        &self.beta
    }

    pub fn derivative_cutoff(&self) -> &[f64] {
        &self.derivative_cutoff
    }

    pub fn previous_value(&self) -> &[f64] {
        &self.previous_value
    }

    pub fn previous_timestamp(&self) -> f64 {
        self.previous_timestamp
    }
}

impl FilterState {
    pub fn previous_derivative(&self) -> &[f64] {
        &self.previous_derivative
    }

    /// Cutoff used for component `index` given its smoothed derivative.
    pub fn adaptive_cutoff(&self, index: usize, derivative: f64) -> f64 {
        self.min_cutoff[index] + self.beta[index] * derivative.abs()
    }
}

/// Exponential moving average coefficient of a first-order low-pass filter
/// with the given cutoff, sampled after `elapsed` seconds.
pub fn smoothing_factor(elapsed: f64, cutoff: f64) -> f64 {
    let r = 2.0 * PI * cutoff * elapsed;
    r / (r + 1.0)
}

pub fn exponential_smoothing(alpha: f64, value: f64, previous: f64) -> f64 {
    alpha * value + (1.0 - alpha) * previous
}

#[derive(Clone)]
pub struct OneEuroFilter<C: Clock = SystemClock> {
    state: FilterState,
    clock: C,
}

impl OneEuroFilter<SystemClock> {
    pub fn new(initial_value: &Signal, params: &FilterParams) -> Result<Self, FilterError> {
        Self::with_clock(initial_value, params, SystemClock::new())
    }
}

impl<C: Clock> OneEuroFilter<C> {
    pub fn with_clock(
        initial_value: &Signal,
        params: &FilterParams,
        clock: C,
    ) -> Result<Self, FilterError> {
        let len = initial_value.len();

        let state = FilterState {
            shape: initial_value.shape().to_vec(),
            min_cutoff: params.min_cutoff.broadcast_rate("min_cutoff", len)?,
            beta: params.beta.broadcast_rate("beta", len)?,
            derivative_cutoff: params
                .derivative_cutoff
                .broadcast_rate("derivative_cutoff", len)?,
            previous_value: initial_value.as_slice().to_vec(),
            previous_derivative: params
                .initial_derivative
                .broadcast("initial_derivative", len)?,
            previous_timestamp: clock.now(),
        };

        Ok(Self { state, clock })
    }

    pub fn state(&self) -> &FilterState {
        &self.state
    }

    /// The most recent smoothed value (the initial value before any call).
    pub fn last_output(&self) -> Signal {
        Signal::from_parts(self.state.shape.clone(), self.state.previous_value.clone())
    }

    /// Filters `x`, sampled now according to the filter's clock.
    pub fn apply(&mut self, x: &Signal) -> Result<Signal, FilterError> {
        let now = self.clock.now();
        self.apply_at(x, now)
    }

    /// Filters `x` sampled at `timestamp` seconds on the filter's time base.
    ///
    /// The state is only updated when the call succeeds. A timestamp that is
    /// not strictly after the previous one is rejected with
    /// [`FilterError::DegenerateTimeStep`].
    pub fn apply_at(&mut self, x: &Signal, timestamp: f64) -> Result<Signal, FilterError> {
        if x.shape() != self.state.shape.as_slice() {
            return Err(FilterError::ShapeMismatch {
                expected: self.state.shape.clone(),
                actual: x.shape().to_vec(),
            });
        }

        let elapsed = timestamp - self.state.previous_timestamp;
        if !(elapsed > 0.0 && elapsed.is_finite()) {
            return Err(FilterError::DegenerateTimeStep { elapsed });
        }

        // Nothing below can fail, so the state is updated in place.
        let mut x_hat = Vec::with_capacity(x.len());
        for (i, &value) in x.as_slice().iter().enumerate() {
            let previous = self.state.previous_value[i];

            // Filtered derivative of the signal. `a_d * dx` is expanded so the
            // division by `elapsed` cancels and tiny steps cannot overflow.
            let fc_d = self.state.derivative_cutoff[i];
            let a_d = smoothing_factor(elapsed, fc_d);
            let r_d = 2.0 * PI * fc_d * elapsed;
            let weighted_dx = 2.0 * PI * fc_d * (value - previous) / (1.0 + r_d);
            let dx_hat = weighted_dx + (1.0 - a_d) * self.state.previous_derivative[i];

            // Filtered signal.
            let cutoff = self.state.adaptive_cutoff(i, dx_hat);
            let a = smoothing_factor(elapsed, cutoff);
            let filtered = exponential_smoothing(a, value, previous);

            self.state.previous_value[i] = filtered;
            self.state.previous_derivative[i] = dx_hat;
            x_hat.push(filtered);
        }
        self.state.previous_timestamp = timestamp;

        Ok(x.with_data(x_hat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const TOLERANCE: f64 = 1e-6;

    fn manual_filter(x0: Signal, params: FilterParams) -> (OneEuroFilter<ManualClock>, ManualClock) {
        let clock = ManualClock::new(0.0);
        let filter = OneEuroFilter::with_clock(&x0, &params, clock.clone()).unwrap();
        (filter, clock)
    }

    #[test]
    fn single_step_matches_formula() {
        let (mut filter, clock) = manual_filter(Signal::column(vec![0.0]), FilterParams::default());

        clock.advance(0.1);
        let out = filter.apply(&Signal::column(vec![1.0])).unwrap();

        let r = 2.0 * PI * 1.0 * 0.1;
        let alpha = r / (r + 1.0);
        assert!((out.as_slice()[0] - alpha).abs() < TOLERANCE);
        assert!((filter.state().previous_derivative()[0] - alpha * 10.0).abs() < TOLERANCE);
        assert!((filter.state().previous_timestamp() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn constant_input_converges_to_input() {
        let x0 = Signal::column(vec![0.0, -2.0, 5.0]);
        let target = Signal::column(vec![1.0, 3.0, -4.0]);
        let (mut filter, clock) = manual_filter(x0, FilterParams::default());

        for _ in 0..2000 {
            clock.advance(1.0 / 60.0);
            filter.apply(&target).unwrap();
        }
        let out = filter.last_output();

        for (a, b) in out.as_slice().iter().zip(target.as_slice()) {
            assert!((a - b).abs() < 1e-6, "{} vs {}", a, b);
        }
    }

    #[test]
    fn output_keeps_construction_shape() {
        let x0 = Signal::new(vec![4, 3], vec![0.0; 12]).unwrap();
        let (mut filter, clock) = manual_filter(x0, FilterParams::default());

        for k in 0..5 {
            clock.advance(0.02);
            let x = Signal::new(vec![4, 3], vec![k as f64; 12]).unwrap();
            let out = filter.apply(&x).unwrap();
            assert_eq!(out.shape(), &[4, 3]);
            assert_eq!(out.len(), 12);
        }
    }

    #[test]
    fn rejects_mismatched_shape_without_touching_state() {
        let (mut filter, clock) =
            manual_filter(Signal::column(vec![1.0, 2.0, 3.0]), FilterParams::default());
        let before = filter.state().clone();

        clock.advance(0.1);
        let result = filter.apply(&Signal::column(vec![1.0, 2.0]));

        assert_eq!(
            result,
            Err(FilterError::ShapeMismatch {
                expected: vec![3, 1],
                actual: vec![2, 1],
            })
        );
        assert_eq!(filter.state(), &before);
    }

    #[test]
    fn same_length_different_shape_is_a_mismatch() {
        let (mut filter, clock) =
            manual_filter(Signal::column(vec![0.0; 4]), FilterParams::default());
        clock.advance(0.1);
        let x = Signal::new(vec![2, 2], vec![1.0; 4]).unwrap();
        assert!(matches!(
            filter.apply(&x),
            Err(FilterError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn zero_elapsed_time_is_rejected() {
        let (mut filter, _clock) =
            manual_filter(Signal::column(vec![0.0]), FilterParams::default());
        let before = filter.state().clone();

        let result = filter.apply(&Signal::column(vec![1.0]));

        assert_eq!(result, Err(FilterError::DegenerateTimeStep { elapsed: 0.0 }));
        assert_eq!(filter.state(), &before);
    }

    #[test]
    fn timestamps_going_backwards_are_rejected() {
        let (mut filter, _clock) =
            manual_filter(Signal::column(vec![0.0]), FilterParams::default());
        filter.apply_at(&Signal::column(vec![1.0]), 1.0).unwrap();

        let result = filter.apply_at(&Signal::column(vec![2.0]), 0.5);
        assert!(matches!(result, Err(FilterError::DegenerateTimeStep { .. })));
    }

    #[test]
    fn tiny_positive_elapsed_time_stays_finite() {
        let (mut filter, _clock) =
            manual_filter(Signal::column(vec![0.0]), FilterParams::default());
        let out = filter.apply_at(&Signal::column(vec![1.0]), 1e-9).unwrap();
        assert!(out.is_finite());
        assert!(filter.state().previous_derivative()[0].is_finite());
    }

    #[test]
    fn subnormal_elapsed_time_stays_finite() {
        let (mut filter, _clock) =
            manual_filter(Signal::column(vec![0.0]), FilterParams::default());
        let out = filter.apply_at(&Signal::column(vec![1.0]), 1e-310).unwrap();

        assert!(out.is_finite());
        // The derivative term tends to 2*pi*fc*(x - x_prev) as the step vanishes.
        assert!((filter.state().previous_derivative()[0] - 2.0 * PI).abs() < TOLERANCE);
        assert!(out.as_slice()[0].abs() < TOLERANCE);
    }

    #[test]
    fn large_jump_over_tiny_step_stays_finite() {
        let (mut filter, _clock) =
            manual_filter(Signal::column(vec![0.0]), FilterParams::default());
        let out = filter.apply_at(&Signal::column(vec![1e20]), 1e-290).unwrap();

        assert!(out.is_finite());
        assert!(filter.state().previous_derivative()[0].is_finite());
    }

    #[test]
    fn zero_beta_keeps_cutoff_at_minimum() {
        let params = FilterParams {
            min_cutoff: Param::Scalar(0.7),
            ..FilterParams::default()
        };
        let (filter, _clock) = manual_filter(Signal::column(vec![0.0, 0.0]), params);

        for derivative in [0.0, 1.0, -3.5, 1e6, -1e-9] {
            assert_eq!(filter.state().adaptive_cutoff(0, derivative), 0.7);
            assert_eq!(filter.state().adaptive_cutoff(1, derivative), 0.7);
        }
    }

    #[test]
    fn cutoff_grows_with_speed_when_beta_is_positive() {
        let params = FilterParams {
            beta: Param::Scalar(0.5),
            ..FilterParams::default()
        };
        let (filter, _clock) = manual_filter(Signal::column(vec![0.0]), params);

        assert_eq!(filter.state().adaptive_cutoff(0, 0.0), 1.0);
        assert_eq!(filter.state().adaptive_cutoff(0, -4.0), 3.0);
        assert!(filter.state().adaptive_cutoff(0, 10.0) > filter.state().adaptive_cutoff(0, 1.0));
    }

    #[test]
    fn larger_beta_reduces_lag_on_a_ramp() {
        let run = |beta: f64| {
            let params = FilterParams {
                beta: Param::Scalar(beta),
                ..FilterParams::default()
            };
            let (mut filter, clock) = manual_filter(Signal::column(vec![0.0]), params);
            let mut lag = 0.0;
            for k in 1..=120 {
                clock.advance(1.0 / 60.0);
                let raw = 5.0 * k as f64 / 60.0;
                let out = filter.apply(&Signal::column(vec![raw])).unwrap();
                lag = raw - out.as_slice()[0];
            }
            lag
        };

        let lag_fixed = run(0.0);
        let lag_adaptive = run(0.1);
        let lag_fast = run(1.0);

        assert!(lag_fixed > 0.0);
        assert!(lag_adaptive < lag_fixed);
        assert!(lag_fast < lag_adaptive);
    }

    #[test]
    fn scalar_parameters_are_broadcast() {
        let params = FilterParams {
            initial_derivative: Param::Scalar(2.0),
            min_cutoff: Param::Scalar(0.5),
            beta: Param::Scalar(0.01),
            derivative_cutoff: Param::Scalar(3.0),
        };
        let (filter, _clock) = manual_filter(Signal::column(vec![0.0; 3]), params);
        let state = filter.state();

        assert_eq!(state.min_cutoff(), &[0.5; 3]);
        assert_eq!(state.beta(), &[0.01; 3]);
        assert_eq!(state.derivative_cutoff(), &[3.0; 3]);
        assert_eq!(state.previous_derivative(), &[2.0; 3]);
    }

    #[test]
    fn per_component_parameters_filter_independently() {
        let params = FilterParams {
            min_cutoff: Param::PerComponent(vec![0.1, 10.0]),
            ..FilterParams::default()
        };
        let (mut filter, clock) = manual_filter(Signal::column(vec![0.0, 0.0]), params);

        clock.advance(0.1);
        let out = filter.apply(&Signal::column(vec![1.0, 1.0])).unwrap();

        assert!((out.as_slice()[0] - smoothing_factor(0.1, 0.1)).abs() < TOLERANCE);
        assert!((out.as_slice()[1] - smoothing_factor(0.1, 10.0)).abs() < TOLERANCE);
        assert!(out.as_slice()[1] > out.as_slice()[0]);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let x0 = Signal::column(vec![0.0, 0.0]);
        let cases = [
            FilterParams {
                min_cutoff: Param::Scalar(-1.0),
                ..FilterParams::default()
            },
            FilterParams {
                beta: Param::Scalar(f64::NAN),
                ..FilterParams::default()
            },
            FilterParams {
                derivative_cutoff: Param::Scalar(f64::INFINITY),
                ..FilterParams::default()
            },
            FilterParams {
                beta: Param::PerComponent(vec![0.0, 0.0, 0.0]),
                ..FilterParams::default()
            },
            FilterParams {
                initial_derivative: Param::PerComponent(vec![1.0]),
                ..FilterParams::default()
            },
        ];

        for params in cases {
            let result = OneEuroFilter::with_clock(&x0, &params, ManualClock::new(0.0));
            assert!(matches!(
                result,
                Err(FilterError::InvalidParameter { .. })
            ));
        }
    }

    #[test]
    fn params_deserialize_from_scalars_and_lists() {
        let params: FilterParams =
            serde_json::from_str(r#"{ "min_cutoff": 0.5, "beta": [0.1, 0.2] }"#).unwrap();

        assert_eq!(params.min_cutoff, Param::Scalar(0.5));
        assert_eq!(params.beta, Param::PerComponent(vec![0.1, 0.2]));
        assert_eq!(params.derivative_cutoff, Param::Scalar(1.0));
    }

    #[test]
    fn smoothing_helpers() {
        assert_eq!(smoothing_factor(0.0, 1.0), 0.0);
        assert!(smoothing_factor(10.0, 100.0) > 0.999);
        assert_eq!(exponential_smoothing(0.25, 4.0, 0.0), 1.0);
        assert_eq!(exponential_smoothing(1.0, 4.0, 2.0), 4.0);
    }
}
