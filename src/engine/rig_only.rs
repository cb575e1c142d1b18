use anyhow::{bail, Result};
use log::info;

use super::{SimulationEngine, SimulationState, Subspace, SubspaceRequest};
use crate::rig::PARAMS_PER_HANDLE;
use crate::signal::Signal;

/// Stand-in engine used when no external engine is configured. The mesh
/// follows the rig exactly: reduced coordinates stay at zero.
pub struct RigOnlyEngine {
    num_modes: usize,
}

impl RigOnlyEngine {
    pub fn new(num_modes: usize) -> Self {
        Self { num_modes }
    }
}

impl SimulationEngine for RigOnlyEngine {
    fn compute_subspace(&mut self, request: &SubspaceRequest) -> Result<Subspace> {
        info!(
            "Rig-only engine: empty subspace with {} modes, {} clusters",
            request.num_modes, request.num_clusters
        );
        Ok(Subspace {
            basis: Signal::zeros(vec![0, request.num_modes * PARAMS_PER_HANDLE]),
            clusters: Vec::new(),
            weights: Signal::zeros(vec![0, request.num_modes]),
        })
    }

    fn prepare(&mut self, subspace: &Subspace) -> Result<()> {
        self.num_modes = subspace.reduced_dimension() / PARAMS_PER_HANDLE;
        Ok(())
    }

    fn step(&mut self, p: &Signal, _state: &SimulationState) -> Result<Signal> {
        if p.len() % PARAMS_PER_HANDLE != 0 {
            bail!("rig parameter count {} is not a multiple of {}", p.len(), PARAMS_PER_HANDLE);
        }
        Ok(Signal::zeros(vec![self.reduced_dimension(), 1]))
    }

    fn reduced_dimension(&self) -> usize {
        self.num_modes * PARAMS_PER_HANDLE
    }

    // Its placeholder must never shadow a real engine's subspace.
    fn caches_subspace(&self) -> bool {
        false
    }
}
