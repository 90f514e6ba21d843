use charuco_tracker_core::{
    BoardDescriptor, BoardPose, BoardSpec, CalibrationResult, GrayImageView, MarkerDetections,
    Observation, ObservationSet,
};
use nalgebra::{Matrix3, Point2, Vector3};
use opencv::calib3d;
use opencv::core::{Mat, Point2f, Point3f, Size, Vector};
use opencv::objdetect::{self, ArucoDetector, CharucoBoard, CharucoDetector};
use opencv::prelude::*;

use crate::vision::{FiducialVision, RawCalibration, VisionError};

use super::gray_to_mat;

fn cv(err: opencv::Error) -> VisionError {
    VisionError::Backend(err.to_string())
}

struct Detectors {
    spec: BoardSpec,
    aruco: ArucoDetector,
    charuco: CharucoDetector,
}

impl Detectors {
    fn new(board: &BoardDescriptor) -> opencv::Result<Self> {
        let dictionary =
            objdetect::get_predefined_dictionary_i32(board.dictionary().opencv_index())?;
        let ids: Vector<i32> = board.marker_ids().iter().map(|&id| id as i32).collect();
        let size = Size::new(board.grid_columns() as i32, board.grid_rows() as i32);
        let cv_board = CharucoBoard::new(
            size,
            board.square_length(),
            board.marker_length(),
            &dictionary,
            &ids,
        )?;
        Ok(Self {
            spec: board.spec().clone(),
            aruco: ArucoDetector::new_def(&dictionary)?,
            charuco: CharucoDetector::new_def(&cv_board)?,
        })
    }
}

/// [`FiducialVision`] over OpenCV's `objdetect` and `calib3d` modules.
///
/// Detectors are built on first use and rebuilt when the board changes.
#[derive(Default)]
pub struct OpenCvVision {
    detectors: Option<Detectors>,
}

impl OpenCvVision {
    pub fn new() -> Self {
        Self::default()
    }

    fn detectors(&mut self, board: &BoardDescriptor) -> Result<&mut Detectors, VisionError> {
        let stale = self
            .detectors
            .as_ref()
            .is_none_or(|d| &d.spec != board.spec());
        if stale {
            log::debug!(
                "building OpenCV detectors for {}x{} board",
                board.grid_columns(),
                board.grid_rows()
            );
            self.detectors = Some(Detectors::new(board).map_err(cv)?);
        }
        self.detectors
            .as_mut()
            .ok_or_else(|| VisionError::Backend("detectors unavailable".into()))
    }
}

fn object_and_image_points(
    observation: &Observation,
    board: &BoardDescriptor,
) -> (Vector<Point3f>, Vector<Point2f>) {
    let mut object = Vector::new();
    let mut image = Vector::new();
    for (id, p) in observation.iter() {
        if let Some(o) = board.corner_object_point(id) {
            object.push(Point3f::new(o.x, o.y, o.z));
            image.push(Point2f::new(p.x, p.y));
        }
    }
    (object, image)
}

fn mat_vector3(mat: &Mat) -> Result<Vector3<f64>, VisionError> {
    match mat.data_typed::<f64>().map_err(cv)? {
        [x, y, z] => Ok(Vector3::new(*x, *y, *z)),
        other => Err(VisionError::Backend(format!(
            "expected a 3-vector, got {} values",
            other.len()
        ))),
    }
}

impl FiducialVision for OpenCvVision {
    fn detect_markers(
        &mut self,
        image: &GrayImageView<'_>,
        board: &BoardDescriptor,
    ) -> Result<MarkerDetections, VisionError> {
        let mat = gray_to_mat(image).map_err(cv)?;
        let detectors = self.detectors(board)?;
        let mut corners: Vector<Vector<Point2f>> = Vector::new();
        let mut ids: Vector<i32> = Vector::new();
        detectors
            .aruco
            .detect_markers_def(&mat, &mut corners, &mut ids)
            .map_err(cv)?;

        let mut out = MarkerDetections::default();
        for (id, quad) in ids.iter().zip(corners.iter()) {
            if id < 0 || quad.len() != 4 {
                continue;
            }
            let mut points = [Point2::origin(); 4];
            for (slot, p) in points.iter_mut().zip(quad.iter()) {
                *slot = Point2::new(p.x, p.y);
            }
            out.push(id as u32, points);
        }
        Ok(out)
    }

    fn interpolate_corners(
        &mut self,
        markers: &MarkerDetections,
        image: &GrayImageView<'_>,
        board: &BoardDescriptor,
    ) -> Result<Observation, VisionError> {
        let mat = gray_to_mat(image).map_err(cv)?;
        let detectors = self.detectors(board)?;
        let mut marker_corners: Vector<Vector<Point2f>> = markers
            .corners()
            .iter()
            .map(|quad| quad.iter().map(|p| Point2f::new(p.x, p.y)).collect())
            .collect();
        let mut marker_ids: Vector<i32> = markers.ids().iter().map(|&id| id as i32).collect();
        let mut charuco_corners: Vector<Point2f> = Vector::new();
        let mut charuco_ids: Vector<i32> = Vector::new();
        detectors
            .charuco
            .detect_board(
                &mat,
                &mut charuco_corners,
                &mut charuco_ids,
                &mut marker_corners,
                &mut marker_ids,
            )
            .map_err(cv)?;

        let positions = charuco_corners
            .iter()
            .map(|p| Point2::new(p.x, p.y))
            .collect();
        let ids = charuco_ids.iter().map(|id| id.max(0) as u32).collect();
        Ok(Observation::new(positions, ids)?)
    }

    fn calibrate(
        &mut self,
        observations: &ObservationSet,
        board: &BoardDescriptor,
    ) -> Result<RawCalibration, VisionError> {
        let size = observations
            .image_size()
            .ok_or_else(|| VisionError::Backend("no observations".into()))?;
        let mut object_points: Vector<Vector<Point3f>> = Vector::new();
        let mut image_points: Vector<Vector<Point2f>> = Vector::new();
        for observation in observations.observations() {
            let (object, image) = object_and_image_points(observation, board);
            object_points.push(object);
            image_points.push(image);
        }

        let mut k = Mat::default();
        let mut dist = Mat::default();
        let mut rvecs: Vector<Mat> = Vector::new();
        let mut tvecs: Vector<Mat> = Vector::new();
        let rms = calib3d::calibrate_camera_def(
            &object_points,
            &image_points,
            Size::new(size.width as i32, size.height as i32),
            &mut k,
            &mut dist,
            &mut rvecs,
            &mut tvecs,
        )
        .map_err(cv)?;

        let mut camera_matrix = Matrix3::zeros();
        for r in 0..3 {
            for c in 0..3 {
                camera_matrix[(r, c)] = *k.at_2d::<f64>(r as i32, c as i32).map_err(cv)?;
            }
        }
        Ok(RawCalibration {
            reprojection_error: rms,
            camera_matrix,
            distortion_coefficients: dist.data_typed::<f64>().map_err(cv)?.to_vec(),
            rotations: rvecs.iter().map(|m| mat_vector3(&m)).collect::<Result<_, _>>()?,
            translations: tvecs.iter().map(|m| mat_vector3(&m)).collect::<Result<_, _>>()?,
        })
    }

    fn estimate_pose(
        &mut self,
        corners: &Observation,
        board: &BoardDescriptor,
        calibration: &CalibrationResult,
    ) -> Result<Option<BoardPose>, VisionError> {
        let (object, image) = object_and_image_points(corners, board);
        if object.len() < 4 {
            return Ok(None);
        }
        let km = &calibration.camera_matrix;
        let rows: [[f64; 3]; 3] = [
            [km[(0, 0)], km[(0, 1)], km[(0, 2)]],
            [km[(1, 0)], km[(1, 1)], km[(1, 2)]],
            [km[(2, 0)], km[(2, 1)], km[(2, 2)]],
        ];
        let k = Mat::from_slice_2d(&rows).map_err(cv)?;
        let dist = if calibration.distortion_coefficients.is_empty() {
            Mat::default()
        } else {
            Mat::from_slice_2d(&[calibration.distortion_coefficients.as_slice()]).map_err(cv)?
        };

        let mut rvec = Mat::default();
        let mut tvec = Mat::default();
        let solved = calib3d::solve_pnp_def(&object, &image, &k, &dist, &mut rvec, &mut tvec)
            .map_err(cv)?;
        if !solved {
            return Ok(None);
        }
        Ok(Some(BoardPose {
            rotation: mat_vector3(&rvec)?,
            translation: mat_vector3(&tvec)?,
        }))
    }
}
