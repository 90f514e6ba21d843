//! Frame acquisition seams.
//!
//! A [`CaptureDevice`] is opened once per session and yields a
//! [`FrameSource`]: a lazy, blocking, non-restartable frame sequence.
//! [`OpenSource`] owns the open source for the duration of a session and
//! guarantees `close` runs on every exit path.

use charuco_tracker_core::{GrayImage, ImageSize};

/// Acquisition failures. "No marker in frame" is *not* one of these.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("{device}: {reason}")]
    DeviceUnavailable { device: String, reason: String },
    #[error("{0}")]
    ReadFailure(String),
    /// A finite source delivered its last frame. Sessions end normally.
    #[error("end of frame sequence")]
    EndOfStream,
}

/// One grayscale frame with its position in the session's frame sequence.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Zero-based index of the frame within the session.
    pub index: u64,
    pub image: GrayImage,
}

impl Frame {
    #[inline]
    pub fn size(&self) -> ImageSize {
        self.image.size()
    }
}

/// An open, exclusively owned frame stream.
pub trait FrameSource {
    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<GrayImage, CaptureError>;

    /// Release the underlying device. Called exactly once by [`OpenSource`].
    fn close(&mut self) {}
}

/// Something that can be opened into a [`FrameSource`].
pub trait CaptureDevice {
    type Source: FrameSource;

    /// Human-readable device name for logs and errors.
    fn describe(&self) -> String;

    /// False for sources that replay recorded frames as fast as they are
    /// read, where wall-clock pacing means nothing.
    fn is_live(&self) -> bool {
        true
    }

    fn open(&mut self) -> Result<Self::Source, CaptureError>;
}

/// Scoped ownership of an open frame source.
pub struct OpenSource<S: FrameSource> {
    source: S,
    frames_read: u64,
    closed: bool,
}

impl<S: FrameSource> OpenSource<S> {
    /// Open `device`; an open failure is always reported as `DeviceUnavailable`.
    pub fn open<D>(device: &mut D) -> Result<Self, CaptureError>
    where
        D: CaptureDevice<Source = S>,
    {
        let source = device.open().map_err(|err| match err {
            CaptureError::ReadFailure(reason) => CaptureError::DeviceUnavailable {
                device: device.describe(),
                reason,
            },
            CaptureError::EndOfStream => CaptureError::DeviceUnavailable {
                device: device.describe(),
                reason: "no frames".to_string(),
            },
            other => other,
        })?;
        Ok(Self {
            source,
            frames_read: 0,
            closed: false,
        })
    }

    pub fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        let image = self.source.next_frame()?;
        let frame = Frame {
            index: self.frames_read,
            image,
        };
        self.frames_read += 1;
        Ok(frame)
    }

    /// Number of frames successfully read so far.
    #[inline]
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Release the device now instead of at drop.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.source.close();
        }
    }
}

impl<S: FrameSource> Drop for OpenSource<S> {
    fn drop(&mut self) {
        self.release();
    }
}
