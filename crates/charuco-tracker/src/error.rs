//! Session-level error taxonomy.

use std::io;
use std::path::PathBuf;

use crate::artifact::ArtifactError;
use crate::capture::CaptureError;
use crate::config::ConfigError;

/// Coarse classification of a [`SessionError`], stable across message changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DeviceUnavailable,
    ReadFailure,
    InsufficientSamples,
    SolverDivergence,
    ArtifactNotFound,
    ArtifactCorrupt,
    ArtifactWrite,
    Config,
}

/// Why a calibration or tracking session failed.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("frame read failed after {frames_read} frames: {reason}")]
    ReadFailure { frames_read: u64, reason: String },
    #[error("not enough samples for calibration: {found} collected, {required} required")]
    InsufficientSamples { found: usize, required: usize },
    #[error("calibration solver failed: {0}")]
    SolverDivergence(String),
    #[error("calibration artifact not found at {}", .0.display())]
    ArtifactNotFound(PathBuf),
    #[error("calibration artifact {} is corrupt: {reason}", path.display())]
    ArtifactCorrupt { path: PathBuf, reason: String },
    #[error("failed to write calibration artifact {}: {source}", path.display())]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            Self::ReadFailure { .. } => ErrorKind::ReadFailure,
            Self::InsufficientSamples { .. } => ErrorKind::InsufficientSamples,
            Self::SolverDivergence(_) => ErrorKind::SolverDivergence,
            Self::ArtifactNotFound(_) => ErrorKind::ArtifactNotFound,
            Self::ArtifactCorrupt { .. } => ErrorKind::ArtifactCorrupt,
            Self::ArtifactWrite { .. } => ErrorKind::ArtifactWrite,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn from_capture(err: CaptureError, frames_read: u64) -> Self {
        match err {
            CaptureError::DeviceUnavailable { device, reason } => {
                Self::DeviceUnavailable(format!("{device}: {reason}"))
            }
            CaptureError::ReadFailure(reason) => Self::ReadFailure {
                frames_read,
                reason,
            },
            CaptureError::EndOfStream => Self::ReadFailure {
                frames_read,
                reason: CaptureError::EndOfStream.to_string(),
            },
        }
    }
}

impl From<ArtifactError> for SessionError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::NotFound(path) => Self::ArtifactNotFound(path),
            ArtifactError::Corrupt { path, reason } => Self::ArtifactCorrupt { path, reason },
            ArtifactError::Io { path, source } => Self::ArtifactWrite { path, source },
        }
    }
}
