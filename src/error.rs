// One error type for the whole program.
// Every variant states *where* things went wrong.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Window init error: {0}")]
    WindowInit(String), // Creating the window failed
    #[error("Window update error: {0}")]
    WindowUpdate(String), // Updating the window buffer failed
    #[error("Camera init error: {0}")]
    CameraInit(String), // Opening/starting the camera failed (no retry)
    #[error("Camera frame error: {0}")]
    CameraFrame(String), // Grabbing/decoding a frame failed
    #[error("Model load error: {0}")]
    ModelLoad(String), // Fetching the model or building the runtime session failed
    #[error("Inference error: {0}")]
    Inference(String), // One segmentation call failed
    #[error("Config error: {0}")]
    Config(String), // Settings are inconsistent or out of range
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config file error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
