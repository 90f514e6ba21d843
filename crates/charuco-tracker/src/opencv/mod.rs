//! OpenCV-backed camera, vision and preview (feature `opencv`).

mod camera;
mod preview;
mod vision;

pub use camera::{OpenCvCamera, OpenCvCapture};
pub use preview::HighGuiPreview;
pub use vision::OpenCvVision;

use charuco_tracker_core::{GrayImage, GrayImageView};
use opencv::core::{self, Mat, Scalar};
use opencv::prelude::*;

/// Copy a grayscale view into a new single-channel `Mat`.
pub(crate) fn gray_to_mat(image: &GrayImageView<'_>) -> opencv::Result<Mat> {
    let mut mat = Mat::new_rows_cols_with_default(
        image.height as i32,
        image.width as i32,
        core::CV_8UC1,
        Scalar::all(0.0),
    )?;
    mat.data_bytes_mut()?.copy_from_slice(image.data);
    Ok(mat)
}

/// Copy a continuous `CV_8UC1` `Mat` into a [`GrayImage`].
pub(crate) fn mat_to_gray(mat: &Mat) -> opencv::Result<Option<GrayImage>> {
    let data = mat.data_bytes()?.to_vec();
    Ok(GrayImage::from_raw(mat.cols() as usize, mat.rows() as usize, data))
}
