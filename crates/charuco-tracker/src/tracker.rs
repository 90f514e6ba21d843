//! Per-frame board pose estimation against a persisted calibration.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use charuco_tracker_core::{BoardDescriptor, BoardPose, CalibrationResult, PoseSample};
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

use crate::capture::Frame;
use crate::clock::Clock;
use crate::vision::{detect_board_corners, FiducialVision};

/// Tracking-mode thresholds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingParams {
    /// A frame is used only with strictly more corners than this.
    pub min_corners: usize,
}

impl Default for TrackingParams {
    fn default() -> Self {
        Self { min_corners: 10 }
    }
}

/// Outcome of one tracked frame.
#[derive(Clone, Debug, PartialEq)]
pub enum TrackVerdict {
    NoMarkers,
    TooFewCorners { found: usize, threshold: usize },
    /// The backend found no valid pose or failed on this frame.
    NoPose,
    Tracked(PoseSample),
}

impl TrackVerdict {
    pub fn status(&self) -> String {
        match self {
            Self::NoMarkers => "no board".to_string(),
            Self::TooFewCorners { found, threshold } => {
                format!("{found} corners (need more than {threshold})")
            }
            Self::NoPose => "no pose".to_string(),
            Self::Tracked(sample) => format!(
                "x={:.3} y={:.3} z={:.3}",
                sample.translation.x, sample.translation.y, sample.translation.z
            ),
        }
    }
}

/// Per-frame result plus what the preview should draw.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameReport {
    pub verdict: TrackVerdict,
    /// Board origin in image coordinates.
    pub origin: Option<Point2<f64>>,
    pub corners: Vec<Point2<f32>>,
}

/// Where the board origin appears in the image.
///
/// With a pose, the origin is projected through the pinhole model; without
/// one, the principal point is used as a stable fallback.
pub fn origin_overlay(calibration: &CalibrationResult, pose: Option<&BoardPose>) -> Point2<f64> {
    pose.and_then(|pose| calibration.project_undistorted(&Point3::origin(), pose))
        .unwrap_or_else(|| calibration.principal_point())
}

/// Estimates board poses frame by frame.
pub struct PoseTracker<'a> {
    board: &'a BoardDescriptor,
    calibration: &'a CalibrationResult,
    params: TrackingParams,
}

impl<'a> PoseTracker<'a> {
    pub fn new(
        board: &'a BoardDescriptor,
        calibration: &'a CalibrationResult,
        params: TrackingParams,
    ) -> Self {
        Self {
            board,
            calibration,
            params,
        }
    }

    pub fn process_frame<V>(
        &self,
        vision: &mut V,
        frame: &Frame,
        clock: &dyn Clock,
    ) -> FrameReport
    where
        V: FiducialVision + ?Sized,
    {
        let skipped = |verdict, corners| FrameReport {
            verdict,
            origin: Some(self.calibration.principal_point()),
            corners,
        };

        let view = frame.image.view();
        let observation = match detect_board_corners(vision, &view, self.board) {
            Ok(Some(observation)) => observation,
            Ok(None) => return skipped(TrackVerdict::NoMarkers, Vec::new()),
            Err(err) => {
                log::warn!("frame {}: {err}", frame.index);
                return skipped(TrackVerdict::NoMarkers, Vec::new());
            }
        };

        let corners = observation.corner_positions().to_vec();
        let found = observation.valid_corner_count();
        if found <= self.params.min_corners {
            let verdict = TrackVerdict::TooFewCorners {
                found,
                threshold: self.params.min_corners,
            };
            return skipped(verdict, corners);
        }

        let pose = match vision.estimate_pose(&observation, self.board, self.calibration) {
            Ok(Some(pose)) if pose.is_finite() => Some(pose),
            Ok(_) => None,
            Err(err) => {
                log::warn!("frame {}: pose estimation failed: {err}", frame.index);
                None
            }
        };
        let origin = Some(origin_overlay(self.calibration, pose.as_ref()));
        let verdict = match pose {
            Some(pose) => {
                TrackVerdict::Tracked(PoseSample::new(clock.wall_time(), frame.index, pose))
            }
            None => TrackVerdict::NoPose,
        };
        FrameReport {
            verdict,
            origin,
            corners,
        }
    }
}

/// Destination for accepted pose samples.
pub trait PoseSink {
    /// Called once the calibration has loaded and the device is open.
    fn begin(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn record(&mut self, sample: &PoseSample) -> io::Result<()>;
}

impl PoseSink for Vec<PoseSample> {
    fn record(&mut self, sample: &PoseSample) -> io::Result<()> {
        self.push(sample.clone());
        Ok(())
    }
}

/// `Timestamp: <HH:MM:SS.mmm> - Frame <n>: x=<val>, y=<val>, z=<val>`
pub fn format_pose_line(sample: &PoseSample) -> String {
    format!(
        "Timestamp: {} - Frame {}: x={:.4}, y={:.4}, z={:.4}",
        sample.timestamp_label(),
        sample.frame_index,
        sample.translation.x,
        sample.translation.y,
        sample.translation.z
    )
}

/// Pose log file, truncated when opened and flushed after every line.
pub struct PoseLog {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl PoseLog {
    /// Truncate and open `path` now.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let mut log = Self::deferred(path);
        log.begin()?;
        Ok(log)
    }

    /// Leave `path` untouched until [`PoseSink::begin`] or the first record.
    pub fn deferred(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PoseSink for PoseLog {
    fn begin(&mut self) -> io::Result<()> {
        if self.writer.is_some() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&self.path)?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn record(&mut self, sample: &PoseSample) -> io::Result<()> {
        self.begin()?;
        let Some(writer) = self.writer.as_mut() else {
            return Err(io::Error::other("pose log is not open"));
        };
        writeln!(writer, "{}", format_pose_line(sample))?;
        writer.flush()
    }
}
