//! Replay a directory of still images as a capture device.

use std::fs;
use std::path::{Path, PathBuf};

use charuco_tracker_core::GrayImage;
use image::ImageReader;

use crate::capture::{CaptureDevice, CaptureError, FrameSource};

const EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "tif"];

/// Frames are the supported image files of `dir` in lexicographic order.
/// Running out of files ends the stream; it is not a read failure.
#[derive(Clone, Debug)]
pub struct ImageDirDevice {
    dir: PathBuf,
}

impl ImageDirDevice {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl CaptureDevice for ImageDirDevice {
    type Source = ImageDirSource;

    fn describe(&self) -> String {
        format!("image directory {}", self.dir.display())
    }

    fn is_live(&self) -> bool {
        false
    }

    fn open(&mut self) -> Result<ImageDirSource, CaptureError> {
        let unavailable = |reason: String| CaptureError::DeviceUnavailable {
            device: self.describe(),
            reason,
        };
        let entries = fs::read_dir(&self.dir).map_err(|err| unavailable(err.to_string()))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_image(path))
            .collect();
        if files.is_empty() {
            return Err(unavailable("no image files".to_string()));
        }
        files.sort();
        log::debug!("replaying {} frames from {}", files.len(), self.dir.display());
        files.reverse();
        Ok(ImageDirSource { pending: files })
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .is_some_and(|ext| EXTENSIONS.contains(&ext.as_str()))
}

/// Open replay; files are popped from the back of a reversed list.
#[derive(Debug)]
pub struct ImageDirSource {
    pending: Vec<PathBuf>,
}

impl ImageDirSource {
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<GrayImage, CaptureError> {
        let path = self.pending.pop().ok_or(CaptureError::EndOfStream)?;
        let luma = ImageReader::open(&path)
            .map_err(|err| CaptureError::ReadFailure(format!("{}: {err}", path.display())))?
            .decode()
            .map_err(|err| CaptureError::ReadFailure(format!("{}: {err}", path.display())))?
            .to_luma8();
        let (width, height) = luma.dimensions();
        GrayImage::from_raw(width as usize, height as usize, luma.into_raw()).ok_or_else(|| {
            CaptureError::ReadFailure(format!("{}: unexpected buffer size", path.display()))
        })
    }

    fn close(&mut self) {
        self.pending.clear();
    }
}
