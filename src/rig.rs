use anyhow::{bail, Result};
use nalgebra::{Matrix3, Rotation3, Vector3};

use crate::signal::Signal;

/// Number of rig parameters per affine handle.
pub const PARAMS_PER_HANDLE: usize = 12;

/// One affine rig handle `x -> R x + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineHandle {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl Default for AffineHandle {
    fn default() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }
}

impl AffineHandle {
    /// Builds a rigid handle from a translation and `[roll, pitch, yaw]` in radians.
    pub fn from_translation_euler(translation: [f64; 3], angles: [f64; 3]) -> Self {
        let rotation = Rotation3::from_euler_angles(angles[0], angles[1], angles[2]);
        Self {
            rotation: rotation.into_inner(),
            translation: Vector3::from(translation),
        }
    }

    pub fn transform_point(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * point + self.translation
    }
}

/// A primary rig made of affine handles.
///
/// Flattened parameters follow the layout the simulation engine expects:
/// every handle contributes the 4x3 block `[R^T; t^T]`, blocks are stacked
/// vertically and the resulting `4m x 3` matrix is read column-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Rig {
    handles: Vec<AffineHandle>,
}

impl Rig {
    pub fn identity(num_handles: usize) -> Self {
        Self {
            handles: vec![AffineHandle::default(); num_handles],
        }
    }

    pub fn handles(&self) -> &[AffineHandle] {
        &self.handles
    }

    pub fn num_handles(&self) -> usize {
        self.handles.len()
    }

    pub fn set_handle(&mut self, index: usize, handle: AffineHandle) -> Result<()> {
        match self.handles.get_mut(index) {
            Some(slot) => {
                *slot = handle;
                Ok(())
            }
            None => bail!("handle {} out of range for a rig with {} handles", index, self.handles.len()),
        }
    }

    /// Replaces only the rotation part of a handle, keeping its translation.
    pub fn set_rotation(&mut self, index: usize, rotation: Matrix3<f64>) -> Result<()> {
        match self.handles.get_mut(index) {
            Some(slot) => {
                slot.rotation = rotation;
                Ok(())
            }
            None => bail!("handle {} out of range for a rig with {} handles", index, self.handles.len()),
        }
    }

    /// Writes `block` straight into the three rotation rows of the handle's
    /// parameter block. The handle then rotates points by `block^T`, which is
    /// how head-pose matrices from the face tracker drive a handle.
    pub fn set_block_rotation(&mut self, index: usize, block: Matrix3<f64>) -> Result<()> {
        self.set_rotation(index, block.transpose())
    }

    pub fn to_parameters(&self) -> Signal {
        let rows = 4 * self.handles.len();
        let mut p = vec![0.0; rows * 3];

        for (h, handle) in self.handles.iter().enumerate() {
            for c in 0..3 {
                for r in 0..3 {
                    p[c * rows + 4 * h + r] = handle.rotation[(c, r)];
                }
                p[c * rows + 4 * h + 3] = handle.translation[c];
            }
        }

        Signal::column(p)
    }

    pub fn from_parameters(p: &Signal) -> Result<Self> {
        let values = p.as_slice();
        if values.is_empty() || values.len() % PARAMS_PER_HANDLE != 0 {
            bail!(
                "expected a multiple of {} rig parameters, got {}",
                PARAMS_PER_HANDLE,
                values.len()
            );
        }

        let num_handles = values.len() / PARAMS_PER_HANDLE;
        let rows = 4 * num_handles;
        let mut rig = Self::identity(num_handles);

        for (h, handle) in rig.handles.iter_mut().enumerate() {
            for c in 0..3 {
                for r in 0..3 {
                    handle.rotation[(c, r)] = values[c * rows + 4 * h + r];
                }
                handle.translation[c] = values[c * rows + 4 * h + 3];
            }
        }

        Ok(rig)
    }
}
