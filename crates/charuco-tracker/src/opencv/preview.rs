use opencv::core::{Mat, Point, Scalar};
use opencv::prelude::*;
use opencv::{highgui, imgproc};

use crate::capture::Frame;
use crate::preview::{Overlay, Preview, PreviewEvent};

use super::gray_to_mat;

const QUIT_KEY: i32 = 'q' as i32;

/// A `highgui` window; pressing `q` asks the session to stop.
pub struct HighGuiPreview {
    window: String,
    canvas: Mat,
}

impl HighGuiPreview {
    pub fn new(window: impl Into<String>) -> Self {
        Self {
            window: window.into(),
            canvas: Mat::default(),
        }
    }

    fn render(&mut self, frame: &Frame, overlay: &Overlay) -> opencv::Result<i32> {
        let gray = gray_to_mat(&frame.image.view())?;
        imgproc::cvt_color_def(&gray, &mut self.canvas, imgproc::COLOR_GRAY2BGR)?;

        for corner in &overlay.corners {
            let center = Point::new(corner.x.round() as i32, corner.y.round() as i32);
            imgproc::circle(
                &mut self.canvas,
                center,
                3,
                Scalar::new(0.0, 255.0, 0.0, 0.0),
                -1,
                imgproc::LINE_8,
                0,
            )?;
        }
        if let Some(origin) = overlay.origin {
            let center = Point::new(origin.x.round() as i32, origin.y.round() as i32);
            imgproc::circle(
                &mut self.canvas,
                center,
                6,
                Scalar::new(0.0, 0.0, 255.0, 0.0),
                2,
                imgproc::LINE_AA,
                0,
            )?;
        }
        imgproc::put_text(
            &mut self.canvas,
            &overlay.status,
            Point::new(10, 24),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.6,
            Scalar::new(0.0, 255.0, 255.0, 0.0),
            1,
            imgproc::LINE_AA,
            false,
        )?;

        highgui::imshow(&self.window, &self.canvas)?;
        highgui::wait_key(1)
    }
}

impl Preview for HighGuiPreview {
    fn show(&mut self, frame: &Frame, overlay: &Overlay) -> PreviewEvent {
        match self.render(frame, overlay) {
            Ok(key) if key & 0xFF == QUIT_KEY => PreviewEvent::StopRequested,
            Ok(_) => PreviewEvent::Continue,
            Err(err) => {
                log::warn!("preview: {err}");
                PreviewEvent::Continue
            }
        }
    }

    fn close(&mut self) {
        if let Err(err) = highgui::destroy_window(&self.window) {
            log::debug!("closing preview: {err}");
        }
    }
}
