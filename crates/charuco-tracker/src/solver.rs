//! Intrinsic calibration from an accumulated observation set.

use charuco_tracker_core::{BoardDescriptor, CalibrationResult, ObservationSet};

use crate::error::SessionError;
use crate::vision::{FiducialVision, RawCalibration};

/// Checks the dataset, runs the backend solve and validates its output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CalibrationSolver {
    min_samples: usize,
}

impl Default for CalibrationSolver {
    fn default() -> Self {
        Self { min_samples: 5 }
    }
}

impl CalibrationSolver {
    pub fn new(min_samples: usize) -> Self {
        Self { min_samples }
    }

    #[inline]
    pub fn min_samples(&self) -> usize {
        self.min_samples
    }

    /// Calibrate from `observations`.
    ///
    /// The backend is not called at all when fewer than `min_samples`
    /// observations are available.
    pub fn solve<V>(
        &self,
        vision: &mut V,
        observations: &ObservationSet,
        board: &BoardDescriptor,
    ) -> Result<CalibrationResult, SessionError>
    where
        V: FiducialVision + ?Sized,
    {
        let found = observations.len();
        let image_size = match observations.image_size() {
            Some(size) if found >= self.min_samples => size,
            _ => {
                return Err(SessionError::InsufficientSamples {
                    found,
                    required: self.min_samples,
                })
            }
        };

        log::info!(
            "calibrating from {found} samples ({} corners, {image_size})",
            observations.total_corners()
        );
        let raw = vision
            .calibrate(observations, board)
            .map_err(|err| SessionError::SolverDivergence(err.to_string()))?;
        validate(&raw, found).map_err(SessionError::SolverDivergence)?;

        let RawCalibration {
            reprojection_error,
            camera_matrix,
            distortion_coefficients,
            rotations,
            translations,
        } = raw;
        let per_view = !rotations.is_empty();
        Ok(CalibrationResult {
            camera_matrix,
            distortion_coefficients,
            reprojection_error,
            per_view_rotations: per_view.then_some(rotations),
            per_view_translations: per_view.then_some(translations),
            image_size,
        })
    }
}

fn validate(raw: &RawCalibration, views: usize) -> Result<(), String> {
    if !raw.camera_matrix.iter().all(|v| v.is_finite()) {
        return Err("camera matrix is not finite".into());
    }
    if raw.camera_matrix[(0, 0)] <= 0.0 || raw.camera_matrix[(1, 1)] <= 0.0 {
        return Err(format!(
            "non-positive focal length (fx={}, fy={})",
            raw.camera_matrix[(0, 0)],
            raw.camera_matrix[(1, 1)]
        ));
    }
    if !raw.reprojection_error.is_finite() || raw.reprojection_error < 0.0 {
        return Err(format!("invalid reprojection error {}", raw.reprojection_error));
    }
    if !raw.distortion_coefficients.iter().all(|v| v.is_finite()) {
        return Err("distortion coefficients are not finite".into());
    }
    if raw.rotations.len() != raw.translations.len() {
        return Err(format!(
            "{} rotations but {} translations",
            raw.rotations.len(),
            raw.translations.len()
        ));
    }
    if !raw.rotations.is_empty() && raw.rotations.len() != views {
        return Err(format!("{} per-view poses for {views} views", raw.rotations.len()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::vision::VisionError;
    use charuco_tracker_core::{
        BoardPose, BoardSpec, GrayImageView, ImageSize, MarkerDetections, Observation,
    };
    use nalgebra::{Matrix3, Point2, Vector3};

    struct FixedSolve {
        result: Result<RawCalibration, String>,
        calls: usize,
    }

    impl FiducialVision for FixedSolve {
        fn detect_markers(
            &mut self,
            _image: &GrayImageView<'_>,
            _board: &BoardDescriptor,
        ) -> Result<MarkerDetections, VisionError> {
            Ok(MarkerDetections::default())
        }

        fn interpolate_corners(
            &mut self,
            _markers: &MarkerDetections,
            _image: &GrayImageView<'_>,
            _board: &BoardDescriptor,
        ) -> Result<Observation, VisionError> {
            Ok(Observation::empty())
        }

        fn calibrate(
            &mut self,
            _observations: &ObservationSet,
            _board: &BoardDescriptor,
        ) -> Result<RawCalibration, VisionError> {
            self.calls += 1;
            self.result.clone().map_err(VisionError::Backend)
        }

        fn estimate_pose(
            &mut self,
            _corners: &Observation,
            _board: &BoardDescriptor,
            _calibration: &CalibrationResult,
        ) -> Result<Option<BoardPose>, VisionError> {
            Ok(None)
        }
    }

    fn raw(views: usize) -> RawCalibration {
        RawCalibration {
            reprojection_error: 0.25,
            camera_matrix: Matrix3::new(900.0, 0.0, 320.0, 0.0, 900.0, 240.0, 0.0, 0.0, 1.0),
            distortion_coefficients: vec![0.01, -0.02, 0.0, 0.0, 0.0],
            rotations: vec![Vector3::new(0.1, 0.0, 0.0); views],
            translations: vec![Vector3::new(0.0, 0.0, 0.5); views],
        }
    }

    fn dataset(samples: usize) -> ObservationSet {
        let size = ImageSize {
            width: 640,
            height: 480,
        };
        let mut set = ObservationSet::new();
        for _ in 0..samples {
            let obs = Observation::new(
                (0..21).map(|i| Point2::new(i as f32, 2.0)).collect(),
                (0..21).collect(),
            )
            .expect("observation");
            set.push(obs, size).expect("same size");
        }
        set
    }

    fn board() -> BoardDescriptor {
        BoardDescriptor::new(BoardSpec::default()).expect("board")
    }

    #[test]
    fn too_few_samples_never_reach_the_backend() {
        let mut vision = FixedSolve {
            result: Ok(raw(4)),
            calls: 0,
        };
        let err = CalibrationSolver::default()
            .solve(&mut vision, &dataset(4), &board())
            .expect_err("insufficient");
        assert_eq!(err.kind(), ErrorKind::InsufficientSamples);
        assert_eq!(vision.calls, 0);

        let err = CalibrationSolver::default()
            .solve(&mut vision, &ObservationSet::new(), &board())
            .expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::InsufficientSamples);
        assert_eq!(vision.calls, 0);
    }

    #[test]
    fn successful_solve_carries_image_size_and_per_view_poses() {
        let mut vision = FixedSolve {
            result: Ok(raw(5)),
            calls: 0,
        };
        let result = CalibrationSolver::default()
            .solve(&mut vision, &dataset(5), &board())
            .expect("solve");
        assert_eq!(vision.calls, 1);
        assert_eq!(result.image_size.width, 640);
        assert_eq!(result.per_view_rotations.as_ref().map(Vec::len), Some(5));
        assert_eq!(result.fx(), 900.0);
    }

    #[test]
    fn backend_failure_is_divergence() {
        let mut vision = FixedSolve {
            result: Err("did not converge".into()),
            calls: 0,
        };
        let err = CalibrationSolver::default()
            .solve(&mut vision, &dataset(6), &board())
            .expect_err("diverged");
        assert_eq!(err.kind(), ErrorKind::SolverDivergence);
        assert!(err.to_string().contains("did not converge"));
    }

    #[test]
    fn nonsensical_output_is_divergence() {
        let mut bad_focal = raw(5);
        bad_focal.camera_matrix[(0, 0)] = -1.0;
        let mut nan_error = raw(5);
        nan_error.reprojection_error = f64::NAN;
        let wrong_views = raw(3);

        for result in [bad_focal, nan_error, wrong_views] {
            let mut vision = FixedSolve {
                result: Ok(result),
                calls: 0,
            };
            let err = CalibrationSolver::default()
                .solve(&mut vision, &dataset(5), &board())
                .expect_err("rejected");
            assert_eq!(err.kind(), ErrorKind::SolverDivergence);
        }
    }

    #[test]
    fn per_view_poses_are_optional() {
        let mut vision = FixedSolve {
            result: Ok(raw(0)),
            calls: 0,
        };
        let result = CalibrationSolver::default()
            .solve(&mut vision, &dataset(5), &board())
            .expect("solve");
        assert!(result.per_view_rotations.is_none());
        assert!(result.per_view_translations.is_none());
    }
}
