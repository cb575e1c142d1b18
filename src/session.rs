use anyhow::{bail, Result};
use log::debug;

use crate::clock::{Clock, SystemClock};
use crate::engine::{SimulationEngine, SimulationState};
use crate::one_euro_filter::{FilterError, FilterParams, FilterState, OneEuroFilter};
use crate::signal::Signal;

/// What one frame produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutput {
    pub raw: Signal,
    pub smoothed: Signal,
    pub z: Signal,
    pub step: u64,
}

/// Per-frame loop: raw rig parameters in, filtered, stepped through the
/// engine, reduced coordinates out.
pub struct InteractiveSession<E: SimulationEngine, C: Clock + Clone = SystemClock> {
    engine: E,
    state: SimulationState,
    filter: OneEuroFilter<C>,
    filter_params: FilterParams,
    filter_enabled: bool,
    clock: C,
    steps: u64,
}

impl<E: SimulationEngine> InteractiveSession<E, SystemClock> {
    /// Session timed by the host clock.
    pub fn new(engine: E, p0: Signal, filter_params: FilterParams) -> Result<Self> {
        let filter = OneEuroFilter::new(&p0, &filter_params)?;
        Ok(Self::from_parts(engine, p0, filter, filter_params, SystemClock::new()))
    }
}

impl<E: SimulationEngine, C: Clock + Clone> InteractiveSession<E, C> {
    #[allow(unused)]
    pub fn with_clock(engine: E, p0: Signal, filter_params: FilterParams, clock: C) -> Result<Self> {
        let filter = OneEuroFilter::with_clock(&p0, &filter_params, clock.clone())?;
        Ok(Self::from_parts(engine, p0, filter, filter_params, clock))
    }

    fn from_parts(
        engine: E,
        p0: Signal,
        filter: OneEuroFilter<C>,
        filter_params: FilterParams,
        clock: C,
    ) -> Self {
        let z0 = Signal::zeros(vec![engine.reduced_dimension(), 1]);
        Self {
            engine,
            state: SimulationState::new(z0, p0),
            filter,
            filter_params,
            filter_enabled: true,
            clock,
            steps: 0,
        }
    }

    /// Runs one frame. Nothing is committed, filter memory included, unless
    /// the engine step succeeds.
    pub fn advance(&mut self, raw: Signal) -> Result<FrameOutput> {
        if !raw.is_finite() {
            bail!("rig parameters contain non-finite values");
        }

        let mut filter = None;
        let smoothed = if self.filter_enabled {
            let mut next = self.filter.clone();
            let smoothed = match next.apply(&raw) {
                Ok(smoothed) => smoothed,
                Err(FilterError::DegenerateTimeStep { elapsed }) => {
                    debug!("Skipping filter update, elapsed time {} s", elapsed);
                    next.last_output()
                }
                Err(error) => return Err(error.into()),
            };
            filter = Some(next);
            smoothed
        } else {
            raw.clone()
        };

        let z = self.engine.step(&smoothed, &self.state)?;
        if let Some(filter) = filter {
            self.filter = filter;
        }
        self.state.update(z.clone(), smoothed.clone());
        self.steps += 1;

        Ok(FrameOutput {
            raw,
            smoothed,
            z,
            step: self.steps,
        })
    }

    /// Swaps filter parameters, seeding the new filter with the current rig
    /// parameters. On error the previous filter stays in place.
    pub fn set_filter_params(&mut self, params: FilterParams) -> Result<()> {
        self.filter = OneEuroFilter::with_clock(self.state.p(), &params, self.clock.clone())?;
        self.filter_params = params;
        Ok(())
    }

    pub fn set_filter_enabled(&mut self, enabled: bool) -> Result<()> {
        if enabled && !self.filter_enabled {
            // Restart from where the unfiltered signal left off.
            self.filter =
                OneEuroFilter::with_clock(self.state.p(), &self.filter_params, self.clock.clone())?;
        }
        self.filter_enabled = enabled;
        Ok(())
    }

    pub fn filter_enabled(&self) -> bool {
        self.filter_enabled
    }

    pub fn filter_params(&self) -> &FilterParams {
        &self.filter_params
    }

    /// Memory of the active filter, `None` while smoothing is off.
    pub fn filter_state(&self) -> Option<&FilterState> {
        self.filter_enabled.then(|| self.filter.state())
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
}
