#![allow(dead_code)]

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use charuco_tracker::core::GrayImageView;
use charuco_tracker::{
    BoardDescriptor, BoardPose, BoardSpec, CalibrationResult, CancelToken, CaptureDevice,
    CaptureError, FiducialVision, Frame, FrameSource, GrayImage, ImageSize, ManualClock,
    MarkerDetections, Observation, ObservationSet, Overlay, Preview, PreviewEvent,
    RawCalibration, VisionError,
};
use chrono::{DateTime, Local, TimeZone};
use nalgebra::{Matrix3, Point2, Vector3};

pub const WIDTH: usize = 8;
pub const HEIGHT: usize = 6;

/// Second pixel value that makes [`SyntheticVision`] report no pose.
pub const NO_POSE: u8 = 1;

pub fn board() -> BoardDescriptor {
    BoardDescriptor::new(BoardSpec::default()).expect("default board")
}

pub fn epoch() -> DateTime<Local> {
    Local
        .with_ymd_and_hms(2025, 1, 31, 14, 5, 59)
        .single()
        .expect("unambiguous")
}

/// A frame whose first pixel is the number of corners the synthetic vision
/// backend will "find" in it.
pub fn frame_with_corners(corners: u8) -> GrayImage {
    let mut image = GrayImage::zeros(ImageSize {
        width: WIDTH,
        height: HEIGHT,
    });
    image.data[0] = corners;
    image
}

pub fn frame_without_pose(corners: u8) -> GrayImage {
    let mut image = frame_with_corners(corners);
    image.data[1] = NO_POSE;
    image
}

pub fn reference_calibration() -> CalibrationResult {
    CalibrationResult {
        camera_matrix: Matrix3::new(800.0, 0.0, 320.0, 0.0, 810.0, 240.0, 0.0, 0.0, 1.0),
        distortion_coefficients: vec![0.1, -0.05, 0.001, 0.002, 0.0],
        reprojection_error: 0.31,
        per_view_rotations: None,
        per_view_translations: None,
        image_size: ImageSize {
            width: WIDTH,
            height: HEIGHT,
        },
    }
}

/// Vision backend driven by pixel values instead of real detection.
#[derive(Debug, Default)]
pub struct SyntheticVision {
    pub detect_calls: usize,
    pub calibrate_calls: usize,
    pub pose_calls: usize,
    /// Make `calibrate` return a degenerate camera matrix.
    pub diverge: bool,
    pub pose_blocked: bool,
}

impl SyntheticVision {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FiducialVision for SyntheticVision {
    fn detect_markers(
        &mut self,
        image: &GrayImageView<'_>,
        _board: &BoardDescriptor,
    ) -> Result<MarkerDetections, VisionError> {
        self.detect_calls += 1;
        let mut markers = MarkerDetections::default();
        if image.data[0] > 0 {
            let square = [
                Point2::new(1.0, 1.0),
                Point2::new(2.0, 1.0),
                Point2::new(2.0, 2.0),
                Point2::new(1.0, 2.0),
            ];
            markers.push(0, square);
        }
        Ok(markers)
    }

    fn interpolate_corners(
        &mut self,
        _markers: &MarkerDetections,
        image: &GrayImageView<'_>,
        _board: &BoardDescriptor,
    ) -> Result<Observation, VisionError> {
        self.pose_blocked = image.data[1] == NO_POSE;
        let count = u32::from(image.data[0]);
        let positions = (0..count)
            .map(|i| Point2::new(i as f32, (i / 6) as f32))
            .collect();
        Ok(Observation::new(positions, (0..count).collect())?)
    }

    fn calibrate(
        &mut self,
        observations: &ObservationSet,
        _board: &BoardDescriptor,
    ) -> Result<RawCalibration, VisionError> {
        self.calibrate_calls += 1;
        let views = observations.len();
        let reference = reference_calibration();
        let camera_matrix = if self.diverge {
            Matrix3::from_element(f64::NAN)
        } else {
            reference.camera_matrix
        };
        Ok(RawCalibration {
            reprojection_error: reference.reprojection_error,
            camera_matrix,
            distortion_coefficients: reference.distortion_coefficients,
            rotations: vec![Vector3::new(0.0, 0.1, 0.0); views],
            translations: vec![Vector3::new(0.0, 0.0, 0.5); views],
        })
    }

    fn estimate_pose(
        &mut self,
        corners: &Observation,
        _board: &BoardDescriptor,
        _calibration: &CalibrationResult,
    ) -> Result<Option<BoardPose>, VisionError> {
        self.pose_calls += 1;
        if self.pose_blocked || corners.valid_corner_count() == 0 {
            return Ok(None);
        }
        Ok(Some(BoardPose {
            rotation: Vector3::new(0.0, 0.0, 0.0),
            translation: Vector3::new(0.1, -0.25, 0.6),
        }))
    }
}

/// Counters shared between a test and the device it hands to a session.
#[derive(Clone, Debug, Default)]
pub struct DeviceStats {
    pub opens: Rc<Cell<u32>>,
    pub closes: Rc<Cell<u32>>,
    pub reads: Rc<Cell<u64>>,
}

/// Replays a fixed list of frames, advancing a shared clock by `step` per
/// read, then fails like an unplugged camera.
pub struct ScriptedDevice {
    frames: Vec<GrayImage>,
    clock: Rc<ManualClock>,
    step: Duration,
    cancel_after: Option<(u64, CancelToken)>,
    fail_open: bool,
    pub stats: DeviceStats,
}

impl ScriptedDevice {
    pub fn new(frames: Vec<GrayImage>, clock: Rc<ManualClock>, step: Duration) -> Self {
        Self {
            frames,
            clock,
            step,
            cancel_after: None,
            fail_open: false,
            stats: DeviceStats::default(),
        }
    }

    /// Cancel `token` once `reads` frames have been delivered.
    pub fn cancelling_after(mut self, reads: u64, token: CancelToken) -> Self {
        self.cancel_after = Some((reads, token));
        self
    }

    pub fn unavailable(clock: Rc<ManualClock>) -> Self {
        Self {
            fail_open: true,
            ..Self::new(Vec::new(), clock, Duration::ZERO)
        }
    }
}

impl CaptureDevice for ScriptedDevice {
    type Source = ScriptedSource;

    fn describe(&self) -> String {
        "scripted camera".to_string()
    }

    fn open(&mut self) -> Result<ScriptedSource, CaptureError> {
        self.stats.opens.set(self.stats.opens.get() + 1);
        if self.fail_open {
            return Err(CaptureError::DeviceUnavailable {
                device: self.describe(),
                reason: "no such device".to_string(),
            });
        }
        let mut pending = self.frames.clone();
        pending.reverse();
        Ok(ScriptedSource {
            pending,
            clock: self.clock.clone(),
            step: self.step,
            cancel_after: self.cancel_after.clone(),
            stats: self.stats.clone(),
        })
    }
}

pub struct ScriptedSource {
    pending: Vec<GrayImage>,
    clock: Rc<ManualClock>,
    step: Duration,
    cancel_after: Option<(u64, CancelToken)>,
    stats: DeviceStats,
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<GrayImage, CaptureError> {
        let image = self
            .pending
            .pop()
            .ok_or_else(|| CaptureError::ReadFailure("camera unplugged".to_string()))?;
        self.clock.advance(self.step);
        let reads = self.stats.reads.get() + 1;
        self.stats.reads.set(reads);
        if let Some((after, token)) = &self.cancel_after {
            if reads >= *after {
                token.cancel();
            }
        }
        Ok(image)
    }

    fn close(&mut self) {
        self.stats.closes.set(self.stats.closes.get() + 1);
    }
}

/// Records every overlay and optionally asks to stop after `stop_after` frames.
#[derive(Debug, Default)]
pub struct RecordingPreview {
    pub statuses: Vec<String>,
    pub origins: Vec<Option<Point2<f64>>>,
    pub stop_after: Option<usize>,
    pub closes: u32,
}

impl Preview for RecordingPreview {
    fn show(&mut self, _frame: &Frame, overlay: &Overlay) -> PreviewEvent {
        self.statuses.push(overlay.status.clone());
        self.origins.push(overlay.origin);
        match self.stop_after {
            Some(n) if self.statuses.len() >= n => PreviewEvent::StopRequested,
            _ => PreviewEvent::Continue,
        }
    }

    fn close(&mut self) {
        self.closes += 1;
    }
}
