use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::engine::{ConstraintEnforcement, SubspaceRequest};
use crate::face_tracking::AngleUnits;
use crate::one_euro_filter::FilterParams;

lazy_static! {
    static ref SETTINGS_PATH: PathBuf = {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("settings.json")))
            .unwrap_or_else(|| PathBuf::from("settings.json"))
    };
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// Drag a single affine handle from the side panel.
    #[default]
    AffineHandle,
    /// Rotate one handle with the head pose from a face tracker.
    FaceTracking,
}

impl ControlMode {
    pub fn app_name(&self) -> &'static str {
        match self {
            ControlMode::AffineHandle => "interactive_cd_affine_handle",
            ControlMode::FaceTracking => "interactive_cd_face_tracking",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub mode: ControlMode,
    pub osc_port: u16,
    pub osc_pattern: String,
    pub angle_units: AngleUnits,
    pub handle_index: usize,
    pub num_handles: usize,
    pub mesh_name: String,
    pub results_dir: Option<PathBuf>,
    pub num_modes: usize,
    pub num_clusters: usize,
    pub constraint_enforcement: ConstraintEnforcement,
    pub read_cache: bool,
    pub engine_url: Option<String>,
    /// How long a frame waits for the engine's answer.
    pub engine_timeout_ms: u64,
    pub filter_enabled: bool,
    pub filter: FilterParams,
    pub max_fps: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: ControlMode::default(),
            osc_port: 9001,
            osc_pattern: "/face/pose".into(),
            angle_units: AngleUnits::default(),
            handle_index: 0,
            num_handles: 1,
            mesh_name: "cd_fish".into(),
            results_dir: None,
            num_modes: 16,
            num_clusters: 100,
            constraint_enforcement: ConstraintEnforcement::default(),
            read_cache: false,
            engine_url: None,
            engine_timeout_ms: 2000,
            filter_enabled: true,
            filter: FilterParams::default(),
            max_fps: 100.0,
        }
    }
}

impl Settings {
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&SETTINGS_PATH)
    }

    pub fn load_or_default() -> anyhow::Result<Self> {
        Self::load_from(&SETTINGS_PATH)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        let settings = serde_json::to_string_pretty(&self)?;
        std::fs::write(path, settings)?;
        Ok(())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let settings = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&settings)?;
        Ok(settings)
    }

    pub fn subspace_request(&self) -> SubspaceRequest {
        SubspaceRequest {
            num_modes: self.num_modes,
            num_clusters: self.num_clusters,
            constraint_enforcement: self.constraint_enforcement,
        }
    }

    pub fn results_dir(&self) -> PathBuf {
        self.results_dir.clone().unwrap_or_else(|| {
            crate::subspace_cache::default_results_dir(self.mode.app_name(), &self.mesh_name)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::one_euro_filter::Param;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("settings.json")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn saved_settings_load_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let settings = Settings {
            mode: ControlMode::FaceTracking,
            handle_index: 2,
            num_handles: 3,
            engine_url: Some("tcp://127.0.0.1:7000".into()),
            filter: FilterParams {
                beta: Param::Scalar(0.05),
                ..FilterParams::default()
            },
            ..Settings::default()
        };
        settings.save_to(&path).unwrap();

        assert_eq!(Settings::load_from(&path).unwrap(), settings);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "mode": "face_tracking", "filter": { "beta": 0.2 } }"#).unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.mode, ControlMode::FaceTracking);
        assert_eq!(settings.filter.beta, Param::Scalar(0.2));
        assert_eq!(settings.filter.min_cutoff, Param::Scalar(1.0));
        assert_eq!(settings.osc_port, 9001);
    }

    #[test]
    fn results_dir_defaults_per_mode_and_mesh() {
        let settings = Settings {
            mode: ControlMode::FaceTracking,
            ..Settings::default()
        };
        assert!(settings
            .results_dir()
            .ends_with("results/interactive_cd_face_tracking/cd_fish"));

        let settings = Settings {
            results_dir: Some(PathBuf::from("/tmp/out")),
            ..Settings::default()
        };
        assert_eq!(settings.results_dir(), PathBuf::from("/tmp/out"));
    }
}
