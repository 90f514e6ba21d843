//! JSON configuration for calibration and tracking sessions.

use std::fs;
use std::path::{Path, PathBuf};

use charuco_tracker_core::{BoardDescriptor, BoardError, BoardSpec};
use serde::{Deserialize, Serialize};

use crate::collector::CalibrationParams;
use crate::tracker::TrackingParams;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error(
        "{mode} min_corners {min_corners} is unreachable: the board has {available} inner corners"
    )]
    CornerThresholdUnreachable {
        mode: &'static str,
        min_corners: usize,
        available: usize,
    },
    #[error(
        "calibration min_corners {min_corners} must cover a majority of the {available} inner corners"
    )]
    CalibrationThresholdBelowMajority {
        min_corners: usize,
        available: usize,
    },
    #[error(
        "sample counts must satisfy target_samples >= min_samples >= 1 \
         (got {target_samples} and {min_samples})"
    )]
    InvalidSampleCounts {
        target_samples: usize,
        min_samples: usize,
    },
}

fn default_artifact_path() -> PathBuf {
    PathBuf::from("data/calib_data.npz")
}

fn default_session_log_path() -> PathBuf {
    PathBuf::from("data/session.log")
}

fn default_pose_log_path() -> PathBuf {
    PathBuf::from("data/pose_log.txt")
}

/// Everything a session needs besides the camera and the vision backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub board: BoardSpec,
    #[serde(default)]
    pub calibration: CalibrationParams,
    #[serde(default)]
    pub tracking: TrackingParams,
    #[serde(default)]
    pub camera_index: i32,
    #[serde(default = "default_artifact_path")]
    pub artifact_path: PathBuf,
    #[serde(default = "default_session_log_path")]
    pub session_log_path: PathBuf,
    #[serde(default = "default_pose_log_path")]
    pub pose_log_path: PathBuf,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            board: BoardSpec::default(),
            calibration: CalibrationParams::default(),
            tracking: TrackingParams::default(),
            camera_index: 0,
            artifact_path: default_artifact_path(),
            session_log_path: default_session_log_path(),
            pose_log_path: default_pose_log_path(),
        }
    }
}

impl TrackerConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Build the board and check the thresholds against it.
    pub fn validate(&self) -> Result<BoardDescriptor, ConfigError> {
        let board = BoardDescriptor::new(self.board.clone())?;
        let available = board.inner_corner_count();

        for (mode, min_corners) in [
            ("calibration", self.calibration.min_corners),
            ("tracking", self.tracking.min_corners),
        ] {
            if min_corners >= available {
                return Err(ConfigError::CornerThresholdUnreachable {
                    mode,
                    min_corners,
                    available,
                });
            }
        }
        if self.calibration.min_corners * 2 <= available {
            return Err(ConfigError::CalibrationThresholdBelowMajority {
                min_corners: self.calibration.min_corners,
                available,
            });
        }

        let CalibrationParams {
            target_samples,
            min_samples,
            ..
        } = self.calibration;
        if min_samples == 0 || target_samples < min_samples {
            return Err(ConfigError::InvalidSampleCounts {
                target_samples,
                min_samples,
            });
        }
        Ok(board)
    }
}
