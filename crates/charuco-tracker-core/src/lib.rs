//! Core types for ChArUco calibration and tracking sessions.
//!
//! This crate is intentionally small and free of I/O. It describes the board,
//! the per-frame detections and accumulated dataset, and the calibration and
//! pose results that the `charuco-tracker` session runner moves around. It does
//! *not* detect markers or solve for intrinsics; those live behind the
//! `FiducialVision` trait in `charuco-tracker`.

mod board;
mod calibration;
mod dictionary;
mod image;
mod logger;
mod observation;

pub use board::{BoardDescriptor, BoardError, BoardSpec, MarkerLayout};
pub use calibration::{BoardPose, CalibrationResult, PoseSample};
pub use dictionary::DictionaryId;
pub use image::{GrayImage, GrayImageView, ImageSize};
pub use observation::{MarkerDetections, Observation, ObservationError, ObservationSet};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, level_from_verbosity};
