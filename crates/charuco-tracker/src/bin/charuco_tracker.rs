use std::error::Error;
use std::process::ExitCode;

use charuco_tracker::cli::{self, Cli, Mode};
use charuco_tracker::opencv::{HighGuiPreview, OpenCvCamera, OpenCvVision};
use charuco_tracker::{CancelToken, ImageDirDevice, NoPreview, Preview};
use clap::Parser;

fn init_logging(verbose: u8) -> Result<(), Box<dyn Error>> {
    let level = charuco_tracker::core::level_from_verbosity(verbose);
    #[cfg(feature = "tracing")]
    {
        let _ = tracing_log::LogTracer::init();
        charuco_tracker::core::init_tracing(false, level);
    }
    #[cfg(not(feature = "tracing"))]
    charuco_tracker::core::init_with_level(level)?;
    Ok(())
}

fn main() -> Result<ExitCode, Box<dyn Error>> {
    let args = Cli::parse();
    init_logging(args.verbose)?;
    let config = args.load_config()?;

    let cancel = CancelToken::new();
    cli::install_ctrlc(&cancel)?;

    let window = match args.mode {
        Mode::Calibrate => "Calibration",
        Mode::Track => "Tracking",
    };
    let mut preview: Box<dyn Preview> = if args.no_preview {
        Box::new(NoPreview)
    } else {
        Box::new(HighGuiPreview::new(window))
    };
    let mut vision = OpenCvVision::new();

    let outcome = match &args.frames_dir {
        Some(dir) => cli::run_mode(
            args.mode,
            &config,
            &mut ImageDirDevice::new(dir),
            &mut vision,
            preview.as_mut(),
            &cancel,
        ),
        None => cli::run_mode(
            args.mode,
            &config,
            &mut OpenCvCamera::new(config.camera_index),
            &mut vision,
            preview.as_mut(),
            &cancel,
        ),
    };
    Ok(cli::report(args.mode, &config, &outcome))
}
