//! Calibration results and pose samples.

use crate::image::ImageSize;
use chrono::{DateTime, Local};
use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Intrinsic calibration of one camera, as persisted in the artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub camera_matrix: Matrix3<f64>,
    pub distortion_coefficients: Vec<f64>,
    /// RMS reprojection error in pixels.
    pub reprojection_error: f64,
    #[serde(default)]
    pub per_view_rotations: Option<Vec<Vector3<f64>>>,
    #[serde(default)]
    pub per_view_translations: Option<Vec<Vector3<f64>>>,
    pub image_size: ImageSize,
}

impl CalibrationResult {
    #[inline]
    pub fn fx(&self) -> f64 {
        self.camera_matrix[(0, 0)]
    }

    #[inline]
    pub fn fy(&self) -> f64 {
        self.camera_matrix[(1, 1)]
    }

    #[inline]
    pub fn principal_point(&self) -> Point2<f64> {
        Point2::new(self.camera_matrix[(0, 2)], self.camera_matrix[(1, 2)])
    }

    /// Pinhole projection of a board-frame point under `pose`, ignoring lens
    /// distortion. `None` when the point is not in front of the camera.
    pub fn project_undistorted(
        &self,
        point: &Point3<f64>,
        pose: &BoardPose,
    ) -> Option<Point2<f64>> {
        let cam = pose.rotation_matrix() * point.coords + pose.translation;
        if cam.z <= f64::EPSILON {
            return None;
        }
        let uvw = self.camera_matrix * cam;
        Some(Point2::new(uvw.x / uvw.z, uvw.y / uvw.z))
    }
}

/// Board pose in the camera frame: `x_cam = R(rotation) * x_board + translation`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardPose {
    /// Axis-angle rotation (Rodrigues vector).
    pub rotation: Vector3<f64>,
    pub translation: Vector3<f64>,
}

impl BoardPose {
    pub fn rotation_matrix(&self) -> Rotation3<f64> {
        Rotation3::from_scaled_axis(self.rotation)
    }

    pub fn is_finite(&self) -> bool {
        self.rotation.iter().chain(self.translation.iter()).all(|v| v.is_finite())
    }
}

/// One accepted pose of a tracking session.
#[derive(Clone, Debug, PartialEq)]
pub struct PoseSample {
    pub timestamp: DateTime<Local>,
    pub frame_index: u64,
    pub translation: Vector3<f64>,
    pub rotation: Vector3<f64>,
}

impl PoseSample {
    pub fn new(timestamp: DateTime<Local>, frame_index: u64, pose: BoardPose) -> Self {
        Self {
            timestamp,
            frame_index,
            translation: pose.translation,
            rotation: pose.rotation,
        }
    }

    /// `HH:MM:SS.mmm` rendering of the timestamp.
    pub fn timestamp_label(&self) -> String {
        self.timestamp.format("%H:%M:%S%.3f").to_string()
    }
}
