//! Operator preview seam.

use crate::capture::Frame;
use nalgebra::Point2;

/// What the preview asks the session loop to do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreviewEvent {
    Continue,
    StopRequested,
}

/// Per-frame annotations for the operator.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overlay {
    /// Image position of the board origin, when it can be computed.
    pub origin: Option<Point2<f64>>,
    /// Interpolated corners found in this frame.
    pub corners: Vec<Point2<f32>>,
    pub status: String,
}

/// A display that shows frames and can request a stop (e.g. a `q` keypress).
pub trait Preview {
    fn show(&mut self, frame: &Frame, overlay: &Overlay) -> PreviewEvent;

    /// Tear down the display. Called once when the session ends.
    fn close(&mut self) {}
}

/// Headless sessions.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPreview;

impl Preview for NoPreview {
    fn show(&mut self, _frame: &Frame, _overlay: &Overlay) -> PreviewEvent {
        PreviewEvent::Continue
    }
}

/// Closes the wrapped preview when dropped.
pub(crate) struct PreviewGuard<'a, P: Preview + ?Sized> {
    preview: &'a mut P,
}

impl<'a, P: Preview + ?Sized> PreviewGuard<'a, P> {
    pub(crate) fn new(preview: &'a mut P) -> Self {
        Self { preview }
    }

    pub(crate) fn show(&mut self, frame: &Frame, overlay: &Overlay) -> PreviewEvent {
        self.preview.show(frame, overlay)
    }
}

impl<P: Preview + ?Sized> Drop for PreviewGuard<'_, P> {
    fn drop(&mut self) {
        self.preview.close();
    }
}
