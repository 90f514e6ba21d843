#![cfg(feature = "image")]

mod support;

use std::path::Path;
use std::rc::Rc;

use charuco_tracker::{
    ArtifactStore, CalibrationParams, CalibrationSession, CaptureDevice, CaptureError,
    ErrorKind, FrameSource, ImageDirDevice, ManualClock, NoPreview, PoseSample, SessionError,
    SettlePolicy, TrackingParams, TrackingSession,
};
use image::{GrayImage, Luma};
use support::{board, reference_calibration, SyntheticVision};

fn write_frame(dir: &Path, name: &str, first_pixel: u8) {
    let mut img = GrayImage::from_pixel(8, 6, Luma([0u8]));
    img.put_pixel(0, 0, Luma([first_pixel]));
    img.save(dir.join(name)).expect("save png");
}

#[test]
fn frames_replay_in_file_name_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_frame(dir.path(), "frame_002.png", 2);
    write_frame(dir.path(), "frame_001.png", 1);
    write_frame(dir.path(), "frame_010.png", 10);
    std::fs::write(dir.path().join("notes.txt"), "not a frame").expect("write");

    let mut device = ImageDirDevice::new(dir.path());
    let mut source = device.open().expect("open");
    assert_eq!(source.remaining(), 3);

    let firsts: Vec<u8> = (0..3)
        .map(|_| source.next_frame().expect("frame").data[0])
        .collect();
    assert_eq!(firsts, [1, 2, 10]);

    let err = source.next_frame().expect_err("exhausted");
    assert_eq!(err, CaptureError::EndOfStream);
}

#[test]
fn decoded_frames_keep_their_dimensions() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_frame(dir.path(), "a.png", 7);
    let mut source = ImageDirDevice::new(dir.path()).open().expect("open");
    let frame = source.next_frame().expect("frame");
    assert_eq!((frame.width, frame.height), (8, 6));
    assert_eq!(frame.data.len(), 48);
}

#[test]
fn empty_or_missing_directories_are_unavailable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let empty = ImageDirDevice::new(dir.path()).open();
    assert!(matches!(
        empty,
        Err(CaptureError::DeviceUnavailable { .. })
    ));

    let missing = ImageDirDevice::new(dir.path().join("nope")).open();
    assert!(matches!(
        missing,
        Err(CaptureError::DeviceUnavailable { .. })
    ));
}

#[test]
fn calibration_runs_from_a_frame_directory() {
    let frames = tempfile::tempdir().expect("tempdir");
    for i in 0..6 {
        write_frame(frames.path(), &format!("frame_{i:03}.png"), 24);
    }
    let out = tempfile::tempdir().expect("tempdir");
    let artifact = out.path().join("calib.npz");
    let board = board();
    let params = CalibrationParams {
        target_samples: 5,
        settle: SettlePolicy::Frames { count: 0 },
        ..CalibrationParams::default()
    };
    let mut vision = SyntheticVision::new();

    let outcome = CalibrationSession::new(&board, params, ArtifactStore::new(&artifact))
        .with_clock(Rc::new(ManualClock::new()))
        .run(
            &mut ImageDirDevice::new(frames.path()),
            &mut vision,
            &mut NoPreview,
        );

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.frames_read, 5);
    assert!(artifact.exists());
}

#[test]
fn default_settle_replays_every_frame() {
    let frames = tempfile::tempdir().expect("tempdir");
    for i in 0..12 {
        write_frame(frames.path(), &format!("frame_{i:03}.png"), 24);
    }
    let out = tempfile::tempdir().expect("tempdir");
    let artifact = out.path().join("calib_data.npz");
    let board = board();
    let mut vision = SyntheticVision::new();

    let outcome = CalibrationSession::new(
        &board,
        CalibrationParams::default(),
        ArtifactStore::new(&artifact),
    )
    .run(
        &mut ImageDirDevice::new(frames.path()),
        &mut vision,
        &mut NoPreview,
    );

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.frames_read, 12);
    assert_eq!(vision.calibrate_calls, 1);
    let calibration = outcome.calibration.expect("calibration");
    assert_eq!(
        calibration.per_view_rotations.as_ref().map(Vec::len),
        Some(12)
    );
    assert!(artifact.exists());
}

#[test]
fn running_out_of_frames_early_leaves_too_few_samples() {
    let frames = tempfile::tempdir().expect("tempdir");
    write_frame(frames.path(), "only.png", 24);
    let out = tempfile::tempdir().expect("tempdir");
    let board = board();
    let mut vision = SyntheticVision::new();

    let outcome = CalibrationSession::new(
        &board,
        CalibrationParams::default(),
        ArtifactStore::new(out.path().join("calib.npz")),
    )
    .with_clock(ManualClock::new())
    .run(
        &mut ImageDirDevice::new(frames.path()),
        &mut vision,
        &mut NoPreview,
    );

    assert_eq!(outcome.error_kind(), Some(ErrorKind::InsufficientSamples));
    assert!(matches!(
        outcome.error,
        Some(SessionError::InsufficientSamples {
            found: 1,
            required: 5
        })
    ));
    assert_eq!(outcome.frames_read, 1);
    assert_eq!(vision.calibrate_calls, 0);
}

#[test]
fn tracking_a_replay_ends_successfully() {
    let frames = tempfile::tempdir().expect("tempdir");
    for i in 0..3 {
        write_frame(frames.path(), &format!("frame_{i:03}.png"), 24);
    }
    let out = tempfile::tempdir().expect("tempdir");
    let store = ArtifactStore::new(out.path().join("calib_data.npz"));
    store.save(&reference_calibration()).expect("save");
    let board = board();
    let mut vision = SyntheticVision::new();
    let mut sink: Vec<PoseSample> = Vec::new();

    let outcome = TrackingSession::new(&board, TrackingParams::default(), store).run(
        &mut ImageDirDevice::new(frames.path()),
        &mut vision,
        &mut NoPreview,
        &mut sink,
    );

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.frames_read, 3);
    assert_eq!(sink.len(), 3);
}
