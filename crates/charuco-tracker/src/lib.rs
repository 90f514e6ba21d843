//! ChArUco camera calibration and live board pose tracking.
//!
//! The crate runs two kinds of sessions against one configurable board:
//! - **calibration**: accumulate well-spread ChArUco observations, solve for
//!   the camera intrinsics and persist them as a versioned artifact;
//! - **tracking**: load that artifact and report the board pose frame by
//!   frame to a timestamped pose log.
//!
//! Marker detection, corner interpolation and the numerical solvers live
//! behind the [`FiducialVision`] trait; frames come from a [`CaptureDevice`].
//! Both are plain traits, so sessions run the same against a real camera
//! and OpenCV (feature `opencv`), a directory of images (feature `image`),
//! or synthetic test doubles.
//!
//! ## Quickstart
//!
//! ```no_run
//! use charuco_tracker::{
//!     ArtifactStore, CalibrationSession, ImageDirDevice, NoPreview, TrackerConfig,
//! };
//! # fn vision() -> Box<dyn charuco_tracker::FiducialVision> { unimplemented!() }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TrackerConfig::default();
//! let board = config.validate()?;
//! let mut device = ImageDirDevice::new("frames/");
//! let mut vision = vision();
//!
//! let outcome = CalibrationSession::new(
//!     &board,
//!     config.calibration.clone(),
//!     ArtifactStore::new(&config.artifact_path),
//! )
//! .run(&mut device, vision.as_mut(), &mut NoPreview);
//! println!("success: {}", outcome.success);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `charuco_tracker::core`: board, observation and calibration types.
//! - [`session`]: the calibration and tracking runners and their outcome.
//! - [`collector`] / [`solver`] / [`tracker`]: the per-mode building blocks.
//! - [`artifact`]: the `.npz` calibration artifact.
//! - [`cli`] (feature `cli`): argument parsing and mode dispatch.
//! - [`opencv`] (feature `opencv`): camera, vision backend and preview window.

pub use charuco_tracker_core as core;

pub mod artifact;
pub mod cancel;
pub mod capture;
pub mod clock;
pub mod collector;
pub mod config;
pub mod error;
pub mod preview;
pub mod session;
pub mod session_log;
pub mod solver;
pub mod tracker;
pub mod vision;

#[cfg(feature = "cli")]
pub mod cli;
#[cfg(feature = "image")]
mod image_dir;
#[cfg(feature = "opencv")]
pub mod opencv;

pub use artifact::{ArtifactError, ArtifactStore};
pub use cancel::CancelToken;
pub use capture::{CaptureDevice, CaptureError, Frame, FrameSource};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collector::{
    CalibrationParams, CollectorState, FrameVerdict, ObservationCollector, SettlePolicy,
    StopReason,
};
pub use config::{ConfigError, TrackerConfig};
pub use error::{ErrorKind, SessionError};
pub use preview::{NoPreview, Overlay, Preview, PreviewEvent};
pub use session::{CalibrationSession, SessionOutcome, TrackingSession};
pub use session_log::SessionLog;
pub use solver::CalibrationSolver;
pub use tracker::{
    format_pose_line, origin_overlay, PoseLog, PoseSink, PoseTracker, TrackVerdict,
    TrackingParams,
};
pub use vision::{FiducialVision, RawCalibration, VisionError};

#[cfg(feature = "image")]
pub use image_dir::{ImageDirDevice, ImageDirSource};

pub use charuco_tracker_core::{
    BoardDescriptor, BoardPose, BoardSpec, CalibrationResult, DictionaryId, GrayImage, ImageSize,
    MarkerDetections, Observation, ObservationSet, PoseSample,
};
