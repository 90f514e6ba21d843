//! The fiducial vision backend seam.
//!
//! Marker detection, ChArUco corner interpolation, the intrinsic calibration
//! solve and single-frame pose estimation are provided by an external
//! library. Sessions only orchestrate calls through [`FiducialVision`].

use charuco_tracker_core::{
    BoardDescriptor, BoardPose, CalibrationResult, GrayImageView, MarkerDetections, Observation,
    ObservationError, ObservationSet,
};
use nalgebra::{Matrix3, Vector3};

/// Errors reported by a vision backend.
#[derive(thiserror::Error, Debug)]
pub enum VisionError {
    #[error("vision backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Observation(#[from] ObservationError),
}

/// Unvalidated output of the backend's calibration solve.
#[derive(Clone, Debug, PartialEq)]
pub struct RawCalibration {
    pub reprojection_error: f64,
    pub camera_matrix: Matrix3<f64>,
    pub distortion_coefficients: Vec<f64>,
    /// Per-view board rotations (axis-angle); may be empty.
    pub rotations: Vec<Vector3<f64>>,
    /// Per-view board translations; may be empty.
    pub translations: Vec<Vector3<f64>>,
}

/// Detection, interpolation and solving primitives.
///
/// Per-frame methods may fail for a single frame; sessions treat such a
/// failure like "nothing detected" and move on.
pub trait FiducialVision {
    /// Detect markers of the board's dictionary in `image`.
    fn detect_markers(
        &mut self,
        image: &GrayImageView<'_>,
        board: &BoardDescriptor,
    ) -> Result<MarkerDetections, VisionError>;

    /// Interpolate ChArUco corners from detected markers.
    fn interpolate_corners(
        &mut self,
        markers: &MarkerDetections,
        image: &GrayImageView<'_>,
        board: &BoardDescriptor,
    ) -> Result<Observation, VisionError>;

    /// Solve for intrinsics from accumulated observations.
    fn calibrate(
        &mut self,
        observations: &ObservationSet,
        board: &BoardDescriptor,
    ) -> Result<RawCalibration, VisionError>;

    /// Estimate the board pose in one frame; `Ok(None)` if the solver finds
    /// no valid pose.
    fn estimate_pose(
        &mut self,
        corners: &Observation,
        board: &BoardDescriptor,
        calibration: &CalibrationResult,
    ) -> Result<Option<BoardPose>, VisionError>;
}

impl<V: FiducialVision + ?Sized> FiducialVision for &mut V {
    fn detect_markers(
        &mut self,
        image: &GrayImageView<'_>,
        board: &BoardDescriptor,
    ) -> Result<MarkerDetections, VisionError> {
        (**self).detect_markers(image, board)
    }

    fn interpolate_corners(
        &mut self,
        markers: &MarkerDetections,
        image: &GrayImageView<'_>,
        board: &BoardDescriptor,
    ) -> Result<Observation, VisionError> {
        (**self).interpolate_corners(markers, image, board)
    }

    fn calibrate(
        &mut self,
        observations: &ObservationSet,
        board: &BoardDescriptor,
    ) -> Result<RawCalibration, VisionError> {
        (**self).calibrate(observations, board)
    }

    fn estimate_pose(
        &mut self,
        corners: &Observation,
        board: &BoardDescriptor,
        calibration: &CalibrationResult,
    ) -> Result<Option<BoardPose>, VisionError> {
        (**self).estimate_pose(corners, board, calibration)
    }
}

/// Detect the board's own markers and interpolate its corners.
///
/// Returns `Ok(None)` when no marker of this board is visible.
pub(crate) fn detect_board_corners<V: FiducialVision + ?Sized>(
    vision: &mut V,
    image: &GrayImageView<'_>,
    board: &BoardDescriptor,
) -> Result<Option<Observation>, VisionError> {
    let mut markers = vision.detect_markers(image, board)?;
    let foreign = board.retain_own_markers(&mut markers);
    if foreign > 0 {
        log::trace!("ignored {foreign} markers of other boards");
    }
    if markers.is_empty() {
        return Ok(None);
    }
    vision.interpolate_corners(&markers, image, board).map(Some)
}
