use opencv::core::Mat;
use opencv::prelude::*;
use opencv::{imgproc, videoio};

use charuco_tracker_core::GrayImage;

use crate::capture::{CaptureDevice, CaptureError, FrameSource};

use super::mat_to_gray;

/// A camera opened through `videoio::VideoCapture` by index.
#[derive(Clone, Copy, Debug)]
pub struct OpenCvCamera {
    index: i32,
}

impl OpenCvCamera {
    pub fn new(index: i32) -> Self {
        Self { index }
    }
}

impl CaptureDevice for OpenCvCamera {
    type Source = OpenCvCapture;

    fn describe(&self) -> String {
        format!("camera {}", self.index)
    }

    fn open(&mut self) -> Result<OpenCvCapture, CaptureError> {
        let unavailable = |reason: String| CaptureError::DeviceUnavailable {
            device: self.describe(),
            reason,
        };
        let capture = videoio::VideoCapture::new(self.index, videoio::CAP_ANY)
            .map_err(|err| unavailable(err.to_string()))?;
        if !capture
            .is_opened()
            .map_err(|err| unavailable(err.to_string()))?
        {
            return Err(unavailable("could not be opened".to_string()));
        }
        Ok(OpenCvCapture {
            capture,
            bgr: Mat::default(),
            gray: Mat::default(),
        })
    }
}

pub struct OpenCvCapture {
    capture: videoio::VideoCapture,
    bgr: Mat,
    gray: Mat,
}

impl FrameSource for OpenCvCapture {
    fn next_frame(&mut self) -> Result<GrayImage, CaptureError> {
        let read_failure = |err: opencv::Error| CaptureError::ReadFailure(err.to_string());
        let grabbed = self.capture.read(&mut self.bgr).map_err(read_failure)?;
        if !grabbed || self.bgr.empty() {
            return Err(CaptureError::ReadFailure("camera returned no frame".into()));
        }
        if self.bgr.channels() == 1 {
            self.bgr.copy_to(&mut self.gray).map_err(read_failure)?;
        } else {
            imgproc::cvt_color_def(&self.bgr, &mut self.gray, imgproc::COLOR_BGR2GRAY)
                .map_err(read_failure)?;
        }
        mat_to_gray(&self.gray)
            .map_err(read_failure)?
            .ok_or_else(|| CaptureError::ReadFailure("unexpected frame layout".into()))
    }

    fn close(&mut self) {
        if let Err(err) = self.capture.release() {
            log::warn!("releasing camera: {err}");
        }
    }
}
