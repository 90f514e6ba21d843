//! Per-frame detections and the accumulated calibration dataset.

use crate::image::ImageSize;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Errors raised while assembling observations.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ObservationError {
    #[error("corner positions ({positions}) and ids ({ids}) differ in length")]
    LengthMismatch { positions: usize, ids: usize },
    #[error("corner id {0} appears more than once in one observation")]
    DuplicateCornerId(u32),
    #[error("observation captured at {got}, set was captured at {expected}")]
    ImageSizeMismatch { expected: ImageSize, got: ImageSize },
}

/// Raw marker detections of a single frame: ids with their four image corners.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MarkerDetections {
    ids: Vec<u32>,
    corners: Vec<[Point2<f32>; 4]>,
}

impl MarkerDetections {
    pub fn push(&mut self, id: u32, corners: [Point2<f32>; 4]) {
        self.ids.push(id);
        self.corners.push(corners);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[inline]
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    #[inline]
    pub fn corners(&self) -> &[[Point2<f32>; 4]] {
        &self.corners
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &[Point2<f32>; 4])> {
        self.ids.iter().copied().zip(self.corners.iter())
    }

    /// Keep only the detections whose id satisfies `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(u32) -> bool) {
        let mut index = 0;
        while index < self.ids.len() {
            if keep(self.ids[index]) {
                index += 1;
            } else {
                self.ids.remove(index);
                self.corners.remove(index);
            }
        }
    }
}

/// Interpolated ChArUco corners of one frame.
///
/// `corner_positions[k]` is the image position of board corner `corner_ids[k]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    corner_positions: Vec<Point2<f32>>,
    corner_ids: Vec<u32>,
}

impl Observation {
    /// Build an observation from parallel position/id sequences.
    pub fn new(
        corner_positions: Vec<Point2<f32>>,
        corner_ids: Vec<u32>,
    ) -> Result<Self, ObservationError> {
        if corner_positions.len() != corner_ids.len() {
            return Err(ObservationError::LengthMismatch {
                positions: corner_positions.len(),
                ids: corner_ids.len(),
            });
        }
        let mut seen = HashSet::with_capacity(corner_ids.len());
        if let Some(&dup) = corner_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(ObservationError::DuplicateCornerId(dup));
        }
        Ok(Self {
            corner_positions,
            corner_ids,
        })
    }

    /// An observation with no corners.
    pub fn empty() -> Self {
        Self {
            corner_positions: Vec::new(),
            corner_ids: Vec::new(),
        }
    }

    #[inline]
    pub fn corner_positions(&self) -> &[Point2<f32>] {
        &self.corner_positions
    }

    #[inline]
    pub fn corner_ids(&self) -> &[u32] {
        &self.corner_ids
    }

    /// Number of interpolated corners.
    #[inline]
    pub fn valid_corner_count(&self) -> usize {
        self.corner_ids.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, Point2<f32>)> + '_ {
        self.corner_ids
            .iter()
            .copied()
            .zip(self.corner_positions.iter().copied())
    }
}

/// Ordered observations sharing one image size.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObservationSet {
    image_size: Option<ImageSize>,
    observations: Vec<Observation>,
}

impl ObservationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observation captured at `size`.
    ///
    /// The first insertion fixes the image size of the set; later ones must match.
    pub fn push(
        &mut self,
        observation: Observation,
        size: ImageSize,
    ) -> Result<(), ObservationError> {
        match self.image_size {
            Some(expected) if expected != size => {
                return Err(ObservationError::ImageSizeMismatch {
                    expected,
                    got: size,
                })
            }
            Some(_) => {}
            None => self.image_size = Some(size),
        }
        self.observations.push(observation);
        Ok(())
    }

    #[inline]
    pub fn image_size(&self) -> Option<ImageSize> {
        self.image_size
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    #[inline]
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Sum of corners over all observations.
    pub fn total_corners(&self) -> usize {
        self.observations.iter().map(Observation::valid_corner_count).sum()
    }
}
