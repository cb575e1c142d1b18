use log::{debug, info};
use nalgebra::{Matrix3, Rotation3};
use serde::{Deserialize, Serialize};

use crate::osc_server::OscServer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AngleUnits {
    #[default]
    Degrees,
    Radians,
}

/// Head rotation from a face tracker streaming over OSC.
///
/// A sample is either `[pitch, yaw, roll]` or a row-major 3x3 rotation.
pub struct FaceCaptor {
    server: OscServer,
    units: AngleUnits,
    rotation: Matrix3<f64>,
    samples: u64,
}

impl FaceCaptor {
    pub fn new(port: u16, pattern: &str, units: AngleUnits) -> Self {
        info!("Face captor waiting for head pose on {} (port {})", pattern, port);
        Self {
            server: OscServer::new(port, pattern),
            units,
            rotation: Matrix3::identity(),
            samples: 0,
        }
    }

    /// Latest head rotation and whether a new sample arrived since the last
    /// query. Identity until the tracker sends anything.
    pub fn query_rotation(&mut self) -> (Matrix3<f64>, bool) {
        let Some(sample) = self.server.try_read_latest() else {
            return (self.rotation, false);
        };

        match rotation_from_values(&sample.values, self.units) {
            Some(rotation) => {
                self.rotation = rotation;
                self.samples += 1;
                (self.rotation, true)
            }
            None => {
                debug!(
                    "Ignoring {} values from {}, expected 3 angles or 9 matrix entries",
                    sample.values.len(),
                    sample.address
                );
                (self.rotation, false)
            }
        }
    }

    pub fn samples_received(&self) -> u64 {
        self.samples
    }

    pub fn server(&self) -> &OscServer {
        &self.server
    }
}

pub fn rotation_from_values(values: &[f32], units: AngleUnits) -> Option<Matrix3<f64>> {
    let values: Vec<f64> = values.iter().map(|v| *v as f64).collect();
    if values.iter().any(|v| !v.is_finite()) {
        return None;
    }

    match values.len() {
        3 => {
            let scale = match units {
                AngleUnits::Degrees => std::f64::consts::PI / 180.0,
                AngleUnits::Radians => 1.0,
            };
            let (pitch, yaw, roll) = (values[0] * scale, values[1] * scale, values[2] * scale);
            Some(Rotation3::from_euler_angles(roll, pitch, yaw).into_inner())
        }
        9 => Some(Matrix3::from_row_slice(&values)),
        _ => None,
    }
}
