//! Live segmentation overlay.
//!
//! Captures webcam video, runs an external segmentation model on each frame
//! and paints a colored mask on top of the live image.

pub mod camera;
pub mod cli;
pub mod compositor;
pub mod config;
pub mod error;
pub mod gamma;
pub mod model;
pub mod pipeline;
pub mod present;
pub mod types;

pub use error::{Error, Result};
