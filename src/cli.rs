// Command-line flags layered over the preset and config file.
// Visual: `--preset hair` swaps the purple face tint for solid purple hair.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{Config, Delegate, ErrorPolicy, ModelSource, Preset};
use crate::error::Result;

/// Command line for the overlay viewer.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Live webcam segmentation overlay")]
pub struct Args {
    /// Built-in pipeline to start from.
    #[arg(long, value_enum, default_value_t = Preset::Face)]
    pub preset: Preset,
    /// JSON config file, applied on top of the preset.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Model file path or http(s) URL.
    #[arg(long)]
    pub model: Option<String>,
    /// Camera device index.
    #[arg(long)]
    pub camera: Option<u32>,
    /// What to do when a frame fails.
    #[arg(long, value_enum)]
    pub on_error: Option<ErrorPolicy>,
    /// Compute backend for the model.
    #[arg(long, value_enum)]
    pub delegate: Option<Delegate>,
    /// Flip the mask horizontally (mirrored camera).
    #[arg(long, default_value_t = false)]
    pub mirror: bool,
    /// Stop after this many frames.
    #[arg(long)]
    pub max_frames: Option<u64>,
    /// Print the available cameras and exit.
    #[arg(long, default_value_t = false)]
    pub list_cameras: bool,
    /// Print the effective config as JSON and exit.
    #[arg(long, default_value_t = false)]
    pub print_config: bool,
}

impl Args {
    /// Preset, patched by the file, then flag overrides, then validation.
    pub fn resolve_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path, self.preset.config())?,
            None => self.preset.config(),
        };

        if let Some(model) = &self.model {
            config.model.source = ModelSource::parse(model);
        }
        if let Some(index) = self.camera {
            config.camera.index = index;
        }
        if let Some(policy) = self.on_error {
            config.run.on_error = policy;
        }
        if let Some(delegate) = self.delegate {
            config.model.delegate = delegate;
        }
        if self.mirror {
            config.model.mirror = true;
        }
        if self.max_frames.is_some() {
            config.run.max_frames = self.max_frames;
        }

        config.validate()?;
        Ok(config)
    }
}
