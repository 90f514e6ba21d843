//! Calibration and tracking session runners.
//!
//! A session owns the device for its whole duration, feeds frames through
//! the collector or tracker, and turns every fatal condition into a
//! [`SessionOutcome`] instead of propagating it.

use charuco_tracker_core::{BoardDescriptor, CalibrationResult, PoseSample};

use crate::artifact::ArtifactStore;
use crate::cancel::CancelToken;
use crate::capture::{CaptureDevice, CaptureError, OpenSource};
use crate::clock::{Clock, SystemClock};
use crate::collector::{
    CalibrationParams, FrameVerdict, ObservationCollector, SettlePolicy, StopReason,
};
use crate::error::{ErrorKind, SessionError};
use crate::preview::{Overlay, Preview, PreviewEvent, PreviewGuard};
use crate::session_log::SessionLog;
use crate::solver::CalibrationSolver;
use crate::tracker::{PoseSink, PoseTracker, TrackVerdict, TrackingParams};
use crate::vision::FiducialVision;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Result of one session, computed once when it ends.
#[derive(Debug)]
pub struct SessionOutcome {
    pub success: bool,
    pub error: Option<SessionError>,
    /// Pose samples of a tracking session; `None` for calibration.
    pub poses: Option<Vec<PoseSample>>,
    /// The persisted calibration of a successful calibration session.
    pub calibration: Option<CalibrationResult>,
    pub frames_read: u64,
}

impl SessionOutcome {
    fn failed(error: SessionError, frames_read: u64) -> Self {
        Self {
            success: false,
            error: Some(error),
            poses: None,
            calibration: None,
            frames_read,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(SessionError::kind)
    }
}

/// Collects samples, solves for intrinsics and persists the artifact.
pub struct CalibrationSession<'a, C: Clock = SystemClock> {
    board: &'a BoardDescriptor,
    params: CalibrationParams,
    store: ArtifactStore,
    clock: C,
    cancel: CancelToken,
    log: SessionLog,
}

impl<'a> CalibrationSession<'a> {
    pub fn new(
        board: &'a BoardDescriptor,
        params: CalibrationParams,
        store: ArtifactStore,
    ) -> Self {
        Self {
            board,
            params,
            store,
            clock: SystemClock::new(),
            cancel: CancelToken::new(),
            log: SessionLog::disabled(),
        }
    }
}

impl<'a, C: Clock> CalibrationSession<'a, C> {
    pub fn with_clock<C2: Clock>(self, clock: C2) -> CalibrationSession<'a, C2> {
        CalibrationSession {
            board: self.board,
            params: self.params,
            store: self.store,
            clock,
            cancel: self.cancel,
            log: self.log,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_log(mut self, log: SessionLog) -> Self {
        self.log = log;
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(device = %device.describe()))
    )]
    pub fn run<D, V, P>(&self, device: &mut D, vision: &mut V, preview: &mut P) -> SessionOutcome
    where
        D: CaptureDevice,
        V: FiducialVision + ?Sized,
        P: Preview + ?Sized,
    {
        self.log.log("Calibration session started");
        log::info!(
            "collecting {} samples from {} (press 'q' to stop early)",
            self.params.target_samples,
            device.describe()
        );

        let mut source = match OpenSource::open(device) {
            Ok(source) => source,
            Err(err) => return self.fail(SessionError::from_capture(err, 0), 0),
        };
        let mut display = PreviewGuard::new(preview);
        let mut params = self.params.clone();
        if !device.is_live() {
            if let SettlePolicy::WallClock { millis } = params.settle {
                log::info!(
                    "{} is a replay; ignoring the {millis} ms settle period",
                    device.describe()
                );
                params.settle = SettlePolicy::Frames { count: 0 };
            }
        }
        let mut collector = ObservationCollector::new(self.board, params);

        while !collector.is_done() {
            if self.cancel.is_cancelled() {
                collector.cancel();
                break;
            }
            let frame = match source.next_frame() {
                Ok(frame) => frame,
                Err(CaptureError::EndOfStream) => {
                    collector.source_exhausted();
                    break;
                }
                Err(err) => {
                    let frames_read = source.frames_read();
                    return self.fail(SessionError::from_capture(err, frames_read), frames_read);
                }
            };

            let verdict = collector.process_frame(vision, &frame, &self.clock);
            if let FrameVerdict::Accepted { sample, .. } = verdict {
                self.log.log(&format!(
                    "Valid frames acquired: {sample}/{}",
                    self.params.target_samples
                ));
            }
            let corners = match verdict {
                FrameVerdict::Settling | FrameVerdict::Done => Vec::new(),
                _ => collector.last_corners().to_vec(),
            };
            let overlay = Overlay {
                origin: None,
                corners,
                status: verdict.status(),
            };
            if display.show(&frame, &overlay) == PreviewEvent::StopRequested {
                collector.cancel();
            }
        }

        let frames_read = source.frames_read();
        source.close();
        drop(display);

        match collector.stop_reason() {
            Some(StopReason::Cancelled) => {
                log::info!("collection stopped with {} samples", collector.len());
            }
            Some(StopReason::SourceExhausted) => {
                log::info!("frame sequence ended with {} samples", collector.len());
            }
            _ => {}
        }
        let solver = CalibrationSolver::new(self.params.min_samples);
        let result = match solver.solve(vision, collector.observations(), self.board) {
            Ok(result) => result,
            Err(err) => return self.fail(err, frames_read),
        };
        if let Err(err) = self.store.save(&result) {
            return self.fail(err.into(), frames_read);
        }

        self.log.log(&format!(
            "Calibration completed (rms {:.4} px) and saved to {}",
            result.reprojection_error,
            self.store.path().display()
        ));
        SessionOutcome {
            success: true,
            error: None,
            poses: None,
            calibration: Some(result),
            frames_read,
        }
    }

    fn fail(&self, error: SessionError, frames_read: u64) -> SessionOutcome {
        log::error!("calibration failed: {error}");
        self.log.log(&format!("Calibration failed: {error}"));
        SessionOutcome::failed(error, frames_read)
    }
}

/// Estimates the board pose in every frame until cancelled.
pub struct TrackingSession<'a, C: Clock = SystemClock> {
    board: &'a BoardDescriptor,
    params: TrackingParams,
    store: ArtifactStore,
    clock: C,
    cancel: CancelToken,
    log: SessionLog,
}

impl<'a> TrackingSession<'a> {
    pub fn new(board: &'a BoardDescriptor, params: TrackingParams, store: ArtifactStore) -> Self {
        Self {
            board,
            params,
            store,
            clock: SystemClock::new(),
            cancel: CancelToken::new(),
            log: SessionLog::disabled(),
        }
    }
}

impl<'a, C: Clock> TrackingSession<'a, C> {
    pub fn with_clock<C2: Clock>(self, clock: C2) -> TrackingSession<'a, C2> {
        TrackingSession {
            board: self.board,
            params: self.params,
            store: self.store,
            clock,
            cancel: self.cancel,
            log: self.log,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_log(mut self, log: SessionLog) -> Self {
        self.log = log;
        self
    }

    /// Track until a stop request or the end of a replayed sequence.
    ///
    /// The artifact is loaded before the device is opened; a missing or
    /// corrupt artifact fails the session without touching the camera.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(device = %device.describe()))
    )]
    pub fn run<D, V, P, S>(
        &self,
        device: &mut D,
        vision: &mut V,
        preview: &mut P,
        sink: &mut S,
    ) -> SessionOutcome
    where
        D: CaptureDevice,
        V: FiducialVision + ?Sized,
        P: Preview + ?Sized,
        S: PoseSink + ?Sized,
    {
        self.log.log("Tracking session started");
        let calibration = match self.store.load() {
            Ok(calibration) => calibration,
            Err(err) => return self.fail(err.into(), 0, None),
        };
        log::info!(
            "loaded calibration: fx={:.1} fy={:.1} rms={:.4}",
            calibration.fx(),
            calibration.fy(),
            calibration.reprojection_error
        );

        let mut source = match OpenSource::open(device) {
            Ok(source) => source,
            Err(err) => return self.fail(SessionError::from_capture(err, 0), 0, None),
        };
        let sink_ready = match sink.begin() {
            Ok(()) => true,
            Err(err) => {
                log::warn!("pose sink unavailable: {err}");
                false
            }
        };
        let mut display = PreviewGuard::new(preview);
        let tracker = PoseTracker::new(self.board, &calibration, self.params.clone());
        let mut poses = Vec::new();

        while !self.cancel.is_cancelled() {
            let frame = match source.next_frame() {
                Ok(frame) => frame,
                Err(CaptureError::EndOfStream) => break,
                Err(err) => {
                    let frames_read = source.frames_read();
                    let error = SessionError::from_capture(err, frames_read);
                    return self.fail(error, frames_read, Some(poses));
                }
            };

            let report = tracker.process_frame(vision, &frame, &self.clock);
            if let TrackVerdict::Tracked(sample) = &report.verdict {
                if sink_ready {
                    if let Err(err) = sink.record(sample) {
                        log::warn!("pose sink: {err}");
                    }
                }
                poses.push(sample.clone());
            }
            let overlay = Overlay {
                origin: report.origin,
                corners: report.corners,
                status: report.verdict.status(),
            };
            if display.show(&frame, &overlay) == PreviewEvent::StopRequested {
                break;
            }
        }

        let frames_read = source.frames_read();
        source.close();
        drop(display);

        self.log.log(&format!(
            "Tracking stopped after {frames_read} frames with {} poses",
            poses.len()
        ));
        SessionOutcome {
            success: true,
            error: None,
            poses: Some(poses),
            calibration: Some(calibration),
            frames_read,
        }
    }

    fn fail(
        &self,
        error: SessionError,
        frames_read: u64,
        poses: Option<Vec<PoseSample>>,
    ) -> SessionOutcome {
        log::error!("tracking failed: {error}");
        self.log.log(&format!("Tracking failed: {error}"));
        SessionOutcome {
            poses,
            ..SessionOutcome::failed(error, frames_read)
        }
    }
}
