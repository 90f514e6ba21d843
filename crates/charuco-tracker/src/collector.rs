//! Calibration sample accumulation.
//!
//! [`ObservationCollector`] gates frames on corner count, spaces accepted
//! samples apart with a settle policy and stops at the target sample count.
//!
//! ```text
//! WaitingForBoard --accept--> Settling --settle over--> Accumulating
//!        |                       ^                           |
//!        |                       +---------accept------------+
//!        +------ target reached or cancelled ------> Done <--+
//! ```

use std::time::Duration;

use charuco_tracker_core::{BoardDescriptor, ObservationSet};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::capture::Frame;
use crate::clock::Clock;
use crate::vision::{detect_board_corners, FiducialVision};

/// How long the collector ignores frames after accepting one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettlePolicy {
    /// Wait this many milliseconds of session time.
    WallClock { millis: u64 },
    /// Skip this many frames.
    Frames { count: u32 },
}

impl Default for SettlePolicy {
    fn default() -> Self {
        Self::WallClock { millis: 1500 }
    }
}

/// Calibration-mode thresholds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationParams {
    /// Stop collecting after this many accepted samples.
    pub target_samples: usize,
    /// A frame is accepted only with strictly more corners than this.
    pub min_corners: usize,
    /// Fewer accepted samples than this cannot be calibrated.
    pub min_samples: usize,
    pub settle: SettlePolicy,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            target_samples: 30,
            min_corners: 20,
            min_samples: 5,
            settle: SettlePolicy::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectorState {
    WaitingForBoard,
    Settling,
    Accumulating,
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    TargetReached,
    Cancelled,
    /// A finite frame source ran out of frames.
    SourceExhausted,
}

/// What happened to one frame handed to the collector.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameVerdict {
    /// Drawn during the settle period and not evaluated.
    Settling,
    NoMarkers,
    TooFewCorners { found: usize, threshold: usize },
    /// The frame became sample number `sample` (1-based).
    Accepted { sample: usize, corners: usize },
    /// The backend failed on this frame or the frame did not fit the dataset.
    Rejected(String),
    /// The collector had already finished.
    Done,
}

impl FrameVerdict {
    /// Short operator-facing description.
    pub fn status(&self) -> String {
        match self {
            Self::Settling => "settling".to_string(),
            Self::NoMarkers => "no board".to_string(),
            Self::TooFewCorners { found, threshold } => {
                format!("{found} corners (need more than {threshold})")
            }
            Self::Accepted { sample, corners } => {
                format!("sample {sample} accepted ({corners} corners)")
            }
            Self::Rejected(reason) => format!("rejected: {reason}"),
            Self::Done => "done".to_string(),
        }
    }
}

/// Accumulates calibration observations of one board.
pub struct ObservationCollector<'b> {
    board: &'b BoardDescriptor,
    params: CalibrationParams,
    state: CollectorState,
    observations: ObservationSet,
    settle_started: Duration,
    settle_skipped: u32,
    acceptance_times: Vec<Duration>,
    last_corners: Vec<Point2<f32>>,
    stop: Option<StopReason>,
}

impl<'b> ObservationCollector<'b> {
    pub fn new(board: &'b BoardDescriptor, params: CalibrationParams) -> Self {
        Self {
            board,
            params,
            state: CollectorState::WaitingForBoard,
            observations: ObservationSet::new(),
            settle_started: Duration::ZERO,
            settle_skipped: 0,
            acceptance_times: Vec::new(),
            last_corners: Vec::new(),
            stop: None,
        }
    }

    #[inline]
    pub fn state(&self) -> CollectorState {
        self.state
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.state == CollectorState::Done
    }

    #[inline]
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }

    /// Number of accepted samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    #[inline]
    pub fn params(&self) -> &CalibrationParams {
        &self.params
    }

    /// Session time of every acceptance, in order.
    pub fn acceptance_times(&self) -> &[Duration] {
        &self.acceptance_times
    }

    /// Corners interpolated in the most recently evaluated frame.
    pub fn last_corners(&self) -> &[Point2<f32>] {
        &self.last_corners
    }

    pub fn observations(&self) -> &ObservationSet {
        &self.observations
    }

    pub fn into_observations(self) -> ObservationSet {
        self.observations
    }

    /// Stop collecting; a no-op once done.
    pub fn cancel(&mut self) {
        self.finish(StopReason::Cancelled);
    }

    /// Stop because a replayed sequence has no more frames.
    pub fn source_exhausted(&mut self) {
        self.finish(StopReason::SourceExhausted);
    }

    /// Feed one frame through the state machine.
    pub fn process_frame<V>(
        &mut self,
        vision: &mut V,
        frame: &Frame,
        clock: &dyn Clock,
    ) -> FrameVerdict
    where
        V: FiducialVision + ?Sized,
    {
        match self.state {
            CollectorState::Done => return FrameVerdict::Done,
            CollectorState::Settling => {
                if !self.settle_over(clock) {
                    return FrameVerdict::Settling;
                }
                log::debug!("settle period over at frame {}", frame.index);
                self.state = CollectorState::Accumulating;
            }
            CollectorState::WaitingForBoard | CollectorState::Accumulating => {}
        }
        self.evaluate(vision, frame, clock)
    }

    fn settle_over(&mut self, clock: &dyn Clock) -> bool {
        match self.params.settle {
            SettlePolicy::WallClock { millis } => {
                let waited = clock.elapsed().saturating_sub(self.settle_started);
                waited >= Duration::from_millis(millis)
            }
            SettlePolicy::Frames { count } => {
                if self.settle_skipped >= count {
                    true
                } else {
                    self.settle_skipped += 1;
                    false
                }
            }
        }
    }

    fn evaluate<V>(&mut self, vision: &mut V, frame: &Frame, clock: &dyn Clock) -> FrameVerdict
    where
        V: FiducialVision + ?Sized,
    {
        self.last_corners.clear();
        let view = frame.image.view();
        let observation = match detect_board_corners(vision, &view, self.board) {
            Ok(Some(observation)) => observation,
            Ok(None) => return FrameVerdict::NoMarkers,
            Err(err) => {
                log::warn!("frame {}: {err}", frame.index);
                return FrameVerdict::Rejected(err.to_string());
            }
        };

        let corners = observation.valid_corner_count();
        self.last_corners.extend_from_slice(observation.corner_positions());
        if corners <= self.params.min_corners {
            return FrameVerdict::TooFewCorners {
                found: corners,
                threshold: self.params.min_corners,
            };
        }

        if let Err(err) = self.observations.push(observation, frame.size()) {
            log::warn!("frame {}: {err}", frame.index);
            return FrameVerdict::Rejected(err.to_string());
        }

        let now = clock.elapsed();
        self.acceptance_times.push(now);
        let sample = self.observations.len();
        log::info!(
            "sample {sample}/{} accepted from frame {} ({corners} corners)",
            self.params.target_samples,
            frame.index
        );

        if sample >= self.params.target_samples {
            self.finish(StopReason::TargetReached);
        } else {
            self.state = CollectorState::Settling;
            self.settle_started = now;
            self.settle_skipped = 0;
        }
        FrameVerdict::Accepted { sample, corners }
    }

    fn finish(&mut self, reason: StopReason) {
        if self.state != CollectorState::Done {
            self.state = CollectorState::Done;
            self.stop = Some(reason);
        }
    }
}
