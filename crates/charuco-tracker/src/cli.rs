//! Command-line front end: argument parsing, config overrides and mode
//! dispatch. The binary only supplies the camera, vision backend and preview.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use crate::artifact::ArtifactStore;
use crate::cancel::CancelToken;
use crate::capture::CaptureDevice;
use crate::config::{ConfigError, TrackerConfig};
use crate::preview::Preview;
use crate::session::{CalibrationSession, SessionOutcome, TrackingSession};
use crate::session_log::SessionLog;
use crate::tracker::PoseLog;
use crate::vision::FiducialVision;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Collect samples and write the calibration artifact.
    Calibrate,
    /// Track the board pose with a previously written artifact.
    Track,
}

/// ChArUco camera calibration and board pose tracking.
#[derive(Debug, Parser)]
#[command(name = "charuco-tracker", version, about)]
pub struct Cli {
    /// Session to run.
    #[arg(long, value_enum)]
    pub mode: Mode,

    /// JSON configuration file. Defaults are used if omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Camera index, overriding the config.
    #[arg(long)]
    pub camera: Option<i32>,

    /// Replay images from a directory instead of opening a camera.
    #[arg(long)]
    pub frames_dir: Option<PathBuf>,

    /// Calibration artifact path, overriding the config.
    #[arg(long)]
    pub artifact: Option<PathBuf>,

    /// Run without a preview window.
    #[arg(long)]
    pub no_preview: bool,

    /// More diagnostics (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Load the config file (if any) and apply command-line overrides.
    pub fn load_config(&self) -> Result<TrackerConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => TrackerConfig::load_json(path)?,
            None => TrackerConfig::default(),
        };
        if let Some(camera) = self.camera {
            config.camera_index = camera;
        }
        if let Some(artifact) = &self.artifact {
            config.artifact_path = artifact.clone();
        }
        Ok(config)
    }
}

/// Cancel `token` on Ctrl-C.
pub fn install_ctrlc(token: &CancelToken) -> Result<(), ctrlc::Error> {
    let token = token.clone();
    ctrlc::set_handler(move || token.cancel())
}

/// Run the session selected by `mode`.
pub fn run_mode<D, V, P>(
    mode: Mode,
    config: &TrackerConfig,
    device: &mut D,
    vision: &mut V,
    preview: &mut P,
    cancel: &CancelToken,
) -> SessionOutcome
where
    D: CaptureDevice,
    V: FiducialVision + ?Sized,
    P: Preview + ?Sized,
{
    let board = match config.validate() {
        Ok(board) => board,
        Err(err) => {
            log::error!("invalid configuration: {err}");
            return SessionOutcome {
                success: false,
                error: Some(err.into()),
                poses: None,
                calibration: None,
                frames_read: 0,
            };
        }
    };
    let store = ArtifactStore::new(&config.artifact_path);
    let log = SessionLog::open(&config.session_log_path);

    match mode {
        Mode::Calibrate => CalibrationSession::new(&board, config.calibration.clone(), store)
            .with_cancel(cancel.clone())
            .with_log(log)
            .run(device, vision, preview),
        Mode::Track => {
            let mut pose_log = PoseLog::deferred(&config.pose_log_path);
            TrackingSession::new(&board, config.tracking.clone(), store)
                .with_cancel(cancel.clone())
                .with_log(log)
                .run(device, vision, preview, &mut pose_log)
        }
    }
}

/// Process exit status for an outcome: `0` on success, `1` otherwise.
pub fn exit_status(outcome: &SessionOutcome) -> u8 {
    if outcome.success && outcome.error.is_none() {
        0
    } else {
        1
    }
}

/// Print the outcome for the operator and map it to an exit code.
pub fn report(mode: Mode, config: &TrackerConfig, outcome: &SessionOutcome) -> ExitCode {
    match (&outcome.error, mode) {
        (Some(err), _) => {
            eprintln!("error: {err}");
            ExitCode::from(exit_status(outcome))
        }
        (None, Mode::Calibrate) => {
            let rms = outcome
                .calibration
                .as_ref()
                .map(|c| c.reprojection_error)
                .unwrap_or(f64::NAN);
            println!(
                "Calibration completed (rms {rms:.4} px) and saved to {}",
                config.artifact_path.display()
            );
            ExitCode::SUCCESS
        }
        (None, Mode::Track) => {
            let poses = outcome.poses.as_ref().map_or(0, Vec::len);
            println!(
                "Tracking finished: {poses} poses written to {}",
                config.pose_log_path.display()
            );
            ExitCode::SUCCESS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn mode_is_required_and_closed() {
        assert!(Cli::try_parse_from(["charuco-tracker"]).is_err());
        assert!(Cli::try_parse_from(["charuco-tracker", "--mode", "detect"]).is_err());
        let cli = Cli::try_parse_from(["charuco-tracker", "--mode", "track"]).expect("parse");
        assert_eq!(cli.mode, Mode::Track);
        assert!(!cli.no_preview);
    }

    #[test]
    fn flags_override_the_config() {
        let cli = Cli::try_parse_from([
            "charuco-tracker",
            "--mode",
            "calibrate",
            "--camera",
            "3",
            "--artifact",
            "/tmp/elsewhere.npz",
            "-vv",
        ])
        .expect("parse");
        let config = cli.load_config().expect("config");
        assert_eq!(config.camera_index, 3);
        assert_eq!(config.artifact_path, PathBuf::from("/tmp/elsewhere.npz"));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn config_file_is_read_before_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{"camera_index": 5, "tracking": {"min_corners": 12}}"#)
            .expect("write");
        let cli = Cli::try_parse_from([
            "charuco-tracker",
            "--mode",
            "track",
            "--config",
            path.to_str().expect("utf-8 path"),
        ])
        .expect("parse");
        let config = cli.load_config().expect("config");
        assert_eq!(config.camera_index, 5);
        assert_eq!(config.tracking.min_corners, 12);
    }

    #[test]
    fn failures_exit_non_zero() {
        let config = TrackerConfig::default();
        let outcome = SessionOutcome {
            success: false,
            error: Some(crate::SessionError::InsufficientSamples {
                found: 2,
                required: 5,
            }),
            poses: None,
            calibration: None,
            frames_read: 40,
        };
        assert_eq!(exit_status(&outcome), 1);
        let _ = report(Mode::Calibrate, &config, &outcome);
    }
}
