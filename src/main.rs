// What you SEE:
// • The live camera fills the window.
// • Face preset: face skin is tinted semi-transparent purple.
// • Hair preset: hair is painted solid purple.
// • ESC or closing the window quits.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use seg_overlay::Result;
use seg_overlay::camera::{self, CameraCapture, FrameSource};
use seg_overlay::cli::Args;
use seg_overlay::model::OnnxSegmenter;
use seg_overlay::pipeline::{Pipeline, RunOptions};
use seg_overlay::present::WindowPresenter;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    if args.list_cameras {
        for cam in camera::list_cameras() {
            println!("{}: {}", cam.index, cam.name);
        }
        return Ok(());
    }

    let config = args.resolve_config()?;
    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    log::info!("seg-overlay v{} ({} preset)", env!("CARGO_PKG_VERSION"), config.label());

    /* 1) Camera first. If it can't be opened we stop here, before the model loads. */
    let mut cam = CameraCapture::new(
        config.camera.index,
        config.camera.width,
        config.camera.height,
        config.camera.fps,
    )?;
    camera::wait_for_first_frame(&mut cam, Duration::from_millis(config.camera.warmup_timeout_ms))?;
    let (w, h) = cam.resolution();

    /* 2) Model (local file or downloaded once from a URL). */
    let model = OnnxSegmenter::load(&config.model)?;

    /* 3) Window sized to the camera; it follows the mask size once frames arrive. */
    let title = format!("Segmentation Overlay ({})", config.label());
    let presenter = WindowPresenter::new(&title, w as usize, h as usize, config.label())?;

    /* 4) Loop until ESC / window close / max frames. */
    let mut pipeline = Pipeline::new(cam, model, presenter, config.overlay.clone(), RunOptions::from(&config));
    let summary = pipeline.run()?;
    log::debug!("Last accepted frame token: {:?}", summary.last_token);
    Ok(())
}
