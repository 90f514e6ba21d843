//! Board specification and layout helpers for ChArUco.

use crate::dictionary::DictionaryId;
use crate::observation::MarkerDetections;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Marker placement scheme for the board.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MarkerLayout {
    /// OpenCV-style ChArUco layout:
    /// - markers are placed on white squares only (assuming top-left square is black),
    /// - marker IDs are assigned in row-major order over those squares.
    #[serde(rename = "opencv_charuco", alias = "open_cv_charuco")]
    #[default]
    OpenCvCharuco,
}

fn default_square_length() -> f32 {
    0.04
}

fn default_marker_length() -> f32 {
    0.03
}

/// Static ChArUco board specification.
///
/// `cols`/`rows` are **square counts** (not inner corner counts). Lengths are
/// in the physical unit the poses should be reported in (metres by default).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardSpec {
    pub cols: u32,
    pub rows: u32,
    #[serde(default = "default_square_length")]
    pub square_length: f32,
    #[serde(default = "default_marker_length")]
    pub marker_length: f32,
    #[serde(default)]
    pub dictionary: DictionaryId,
    /// Explicit marker ids in layout order. When absent, ids are assigned
    /// sequentially starting at `first_marker_id`.
    #[serde(default)]
    pub marker_ids: Option<Vec<u32>>,
    #[serde(default)]
    pub first_marker_id: u32,
    #[serde(default)]
    pub marker_layout: MarkerLayout,
}

impl Default for BoardSpec {
    /// The 7x5 board with 4 cm squares and 3 cm `DICT_4X4_50` markers.
    fn default() -> Self {
        Self {
            cols: 7,
            rows: 5,
            square_length: default_square_length(),
            marker_length: default_marker_length(),
            dictionary: DictionaryId::Dict4x4_50,
            marker_ids: None,
            first_marker_id: 0,
            marker_layout: MarkerLayout::OpenCvCharuco,
        }
    }
}

/// Board specification validation errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BoardError {
    #[error("rows and cols must be >= 2")]
    InvalidSize,
    #[error("square_length must be a positive finite number")]
    InvalidSquareLength,
    #[error("marker_length must be positive and smaller than square_length")]
    InvalidMarkerLength,
    #[error("board needs {expected} marker ids, got {got}")]
    MarkerCountMismatch { expected: usize, got: usize },
    #[error("marker id {0} appears more than once")]
    DuplicateMarkerId(u32),
    #[error("marker id {id} is outside dictionary {dictionary} (capacity {capacity})")]
    MarkerIdOutOfRange {
        id: u32,
        dictionary: DictionaryId,
        capacity: u32,
    },
}

/// Validated, immutable board description.
#[derive(Clone, Debug)]
pub struct BoardDescriptor {
    spec: BoardSpec,
    marker_ids: Vec<u32>,
    id_index: HashMap<u32, usize>,
}

impl BoardDescriptor {
    /// Validate and create a board from a spec.
    pub fn new(spec: BoardSpec) -> Result<Self, BoardError> {
        if spec.rows < 2 || spec.cols < 2 {
            return Err(BoardError::InvalidSize);
        }
        if !spec.square_length.is_finite() || spec.square_length <= 0.0 {
            return Err(BoardError::InvalidSquareLength);
        }
        if !spec.marker_length.is_finite()
            || spec.marker_length <= 0.0
            || spec.marker_length >= spec.square_length
        {
            return Err(BoardError::InvalidMarkerLength);
        }

        let marker_positions = match spec.marker_layout {
            MarkerLayout::OpenCvCharuco => open_cv_charuco_marker_positions(spec.rows, spec.cols),
        };
        let expected = marker_positions.len();

        let marker_ids: Vec<u32> = match &spec.marker_ids {
            Some(ids) => ids.clone(),
            None => (0..expected as u32)
                .map(|i| spec.first_marker_id.saturating_add(i))
                .collect(),
        };
        if marker_ids.len() != expected {
            return Err(BoardError::MarkerCountMismatch {
                expected,
                got: marker_ids.len(),
            });
        }

        let capacity = spec.dictionary.capacity();
        let mut id_index = HashMap::with_capacity(expected);
        for (index, &id) in marker_ids.iter().enumerate() {
            if id >= capacity {
                return Err(BoardError::MarkerIdOutOfRange {
                    id,
                    dictionary: spec.dictionary,
                    capacity,
                });
            }
            if id_index.insert(id, index).is_some() {
                return Err(BoardError::DuplicateMarkerId(id));
            }
        }

        Ok(Self {
            spec,
            marker_ids,
            id_index,
        })
    }

    /// Return the underlying board specification.
    #[inline]
    pub fn spec(&self) -> &BoardSpec {
        &self.spec
    }

    #[inline]
    pub fn grid_columns(&self) -> u32 {
        self.spec.cols
    }

    #[inline]
    pub fn grid_rows(&self) -> u32 {
        self.spec.rows
    }

    #[inline]
    pub fn square_length(&self) -> f32 {
        self.spec.square_length
    }

    #[inline]
    pub fn marker_length(&self) -> f32 {
        self.spec.marker_length
    }

    #[inline]
    pub fn dictionary(&self) -> DictionaryId {
        self.spec.dictionary
    }

    /// Marker ids in layout (row-major white square) order.
    #[inline]
    pub fn marker_ids(&self) -> &[u32] {
        &self.marker_ids
    }

    /// Number of markers on the board.
    #[inline]
    pub fn marker_count(&self) -> usize {
        self.marker_ids.len()
    }

    /// Expected number of *inner* chessboard corners in vertical direction.
    #[inline]
    pub fn inner_rows(&self) -> u32 {
        self.spec.rows - 1
    }

    /// Expected number of *inner* chessboard corners in horizontal direction.
    #[inline]
    pub fn inner_cols(&self) -> u32 {
        self.spec.cols - 1
    }

    /// Total number of ChArUco (inner chessboard) corners.
    #[inline]
    pub fn inner_corner_count(&self) -> usize {
        (self.inner_rows() * self.inner_cols()) as usize
    }

    /// True if `id` is one of this board's markers.
    #[inline]
    pub fn contains_marker(&self, id: u32) -> bool {
        self.id_index.contains_key(&id)
    }

    /// Board-frame 3D point (z = 0) of a ChArUco corner id.
    ///
    /// The origin is the top-left outer board corner, matching OpenCV's
    /// ChArUco object points, so pose translations are reported relative to it.
    pub fn corner_object_point(&self, corner_id: u32) -> Option<Point3<f32>> {
        let cols = self.inner_cols();
        if corner_id >= cols * self.inner_rows() {
            return None;
        }
        let i = (corner_id % cols) as f32 + 1.0;
        let j = (corner_id / cols) as f32 + 1.0;
        Some(Point3::new(
            i * self.spec.square_length,
            j * self.spec.square_length,
            0.0,
        ))
    }

    /// Drop detections whose id does not belong to this board.
    ///
    /// Several boards may share one dictionary with disjoint id ranges; this
    /// keeps a neighbouring board's markers out of the corner interpolation.
    pub fn retain_own_markers(&self, detections: &mut MarkerDetections) -> usize {
        let before = detections.len();
        detections.retain(|id| self.contains_marker(id));
        before - detections.len()
    }
}

fn open_cv_charuco_marker_positions(rows: u32, cols: u32) -> Vec<[i32; 2]> {
    let mut out = Vec::new();
    for j in 0..(rows as i32) {
        for i in 0..(cols as i32) {
            // OpenCV: top-left square is black => white squares have (i+j) odd.
            if ((i + j) & 1) == 1 {
                out.push([i, j]);
            }
        }
    }
    out
}
