//! Boundary to the reduced-order simulation engine.
//!
//! The engine builds the skinning subspace once and is then stepped once per
//! frame with the current rig parameters. Everything numerical happens on the
//! other side of [`SimulationEngine`].

mod remote;
mod rig_only;

pub use remote::RemoteEngine;
pub use rig_only::RigOnlyEngine;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::signal::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintEnforcement {
    /// Unconstrained eigenproblem projected onto the constraint set.
    Project,
    /// Full constrained generalized eigenproblem.
    #[default]
    Optimal,
}

impl ConstraintEnforcement {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintEnforcement::Project => "project",
            ConstraintEnforcement::Optimal => "optimal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubspaceRequest {
    pub num_modes: usize,
    pub num_clusters: usize,
    pub constraint_enforcement: ConstraintEnforcement,
}

/// Skinning subspace: the basis `B`, per-tet cluster labels and the
/// secondary skinning weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subspace {
    pub basis: Signal,
    pub clusters: Vec<usize>,
    pub weights: Signal,
}

impl Subspace {
    /// Number of reduced coordinates one step produces.
    pub fn reduced_dimension(&self) -> usize {
        self.basis.shape().get(1).copied().unwrap_or(0)
    }

    pub fn num_clusters(&self) -> usize {
        self.clusters.iter().max().map_or(0, |max| max + 1)
    }
}

/// Reduced coordinates `z` and rig parameters `p` of the last step.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationState {
    z: Signal,
    p: Signal,
}

impl SimulationState {
    pub fn new(z0: Signal, p0: Signal) -> Self {
        Self { z: z0, p: p0 }
    }

    pub fn update(&mut self, z: Signal, p: Signal) {
        self.z = z;
        self.p = p;
    }

    pub fn z(&self) -> &Signal {
        &self.z
    }

    pub fn p(&self) -> &Signal {
        &self.p
    }
}

pub trait SimulationEngine {
    fn compute_subspace(&mut self, request: &SubspaceRequest) -> Result<Subspace>;

    /// Loads a subspace (freshly computed or cached) before the first step.
    fn prepare(&mut self, subspace: &Subspace) -> Result<()>;

    /// Advances one time step driven by rig parameters `p`.
    fn step(&mut self, p: &Signal, state: &SimulationState) -> Result<Signal>;

    fn reduced_dimension(&self) -> usize;

    /// Whether the subspace this engine computes is worth keeping in the
    /// shared on-disk cache.
    fn caches_subspace(&self) -> bool {
        true
    }
}

impl<E: SimulationEngine + ?Sized> SimulationEngine for Box<E> {
    fn compute_subspace(&mut self, request: &SubspaceRequest) -> Result<Subspace> {
        (**self).compute_subspace(request)
    }

    fn prepare(&mut self, subspace: &Subspace) -> Result<()> {
        (**self).prepare(subspace)
    }

    fn step(&mut self, p: &Signal, state: &SimulationState) -> Result<Signal> {
        (**self).step(p, state)
    }

    fn reduced_dimension(&self) -> usize {
        (**self).reduced_dimension()
    }

    fn caches_subspace(&self) -> bool {
        (**self).caches_subspace()
    }
}
