//! Start-up configuration of a [`Stage`](crate::stage::Stage).
//!
//! Every field has a default, so `{}` is a valid configuration:
//!
//! ```json
//! {
//!   "room": { "width": 8, "height": 3, "depth": 8, "palette": { "floor": "oak", "wall": "plaster" } },
//!   "lighting": { "backdrop": [0.9, 0.9, 0.92, 1.0] },
//!   "camera": { "distance": 9.0, "pitch": 0.5 },
//!   "controls": { "rotate_speed": 0.8, "enable_damping": true },
//!   "asset_root": "assets"
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{camera::ControlOptions, room::RoomSpec, stage::LightingRig};

#[derive(Debug, thiserror::Error)]
pub enum StageConfigError {
    #[error("could not read stage config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid stage config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Initial orbit of the camera around `target`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub distance: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub target: [f32; 3],
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            distance: 8.0,
            pitch: 0.45,
            yaw: std::f32::consts::FRAC_PI_4,
            target: [0.0, 1.0, 0.0],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub room: Option<RoomSpec>,
    pub lighting: LightingRig,
    pub camera: CameraConfig,
    pub controls: ControlOptions,
    /// Directory (or, on the web, path below the page) relative URLs are
    /// fetched from.
    pub asset_root: String,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            room: None,
            lighting: LightingRig::default(),
            camera: CameraConfig::default(),
            controls: ControlOptions::new(),
            asset_root: "assets".to_string(),
        }
    }
}

impl StageConfig {
    pub fn from_json(json: &str) -> Result<Self, StageConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StageConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| StageConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }
}
