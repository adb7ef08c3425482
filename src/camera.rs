// Opens a camera and hands out RGB frames for the model.
// Visual expectation: when the pipeline calls `next_frame()`, you get the
// image the camera sees right now, ready to be segmented and shown.

use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::types::Frame;

// Bring in nokhwa types for camera control.
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    utils::{
        ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
        Resolution,
    },
};

/// Anything that can feed frames into the loop (a real camera, a test generator).
pub trait FrameSource {
    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Resolution the source is actually delivering.
    fn resolution(&self) -> (u32, u32);
}

/// A camera the OS reports.
#[derive(Clone, Debug)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
}

/// Enumerate capture devices. Errors are logged and yield an empty list.
pub fn list_cameras() -> Vec<CameraInfo> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(found) => found
            .iter()
            .enumerate()
            .map(|(idx, info)| CameraInfo { index: idx as u32, name: info.human_name() })
            .collect(),
        Err(e) => {
            log::warn!("Failed to enumerate cameras: {e}");
            Vec::new()
        }
    }
}

// A small wrapper around nokhwa::Camera so the pipeline stays clean.
pub struct CameraCapture {
    cam: Camera,
    width: u32,
    height: u32,
}

impl CameraCapture {
    /// Open camera `index` near the requested resolution/fps and start streaming.
    /// Tries the closest format first, then the highest resolution, then anything.
    /// On success nothing is shown yet; we just hold an open stream.
    pub fn new(index: u32, width: u32, height: u32, fps: u32) -> Result<Self> {
        let idx = CameraIndex::Index(index);

        let closest = CameraFormat::new(
            Resolution::new(width, height),
            FrameFormat::YUYV, // uncompressed; cheap to convert to RGB
            fps,
        );
        let attempts = [
            RequestedFormatType::Closest(closest),
            RequestedFormatType::HighestResolution(Resolution::new(width, height)),
            RequestedFormatType::None,
        ];

        let mut last_err = String::from("no format attempted");
        let mut opened = None;
        for kind in attempts {
            let label = format!("{kind:?}");
            let req = RequestedFormat::new::<RgbFormat>(kind);
            match Camera::new(idx.clone(), req) {
                Ok(cam) => {
                    opened = Some(cam);
                    break;
                }
                Err(e) => {
                    log::debug!("Camera {index}: format request {label} refused: {e}");
                    last_err = e.to_string();
                }
            }
        }
        let mut cam = opened
            .ok_or_else(|| Error::CameraInit(format!("Create camera {index}: {last_err}")))?;

        cam.open_stream()
            .map_err(|e| Error::CameraInit(format!("Open stream: {e}")))?;

        // The stream might pick a slightly different resolution than asked.
        let actual = cam.resolution();
        log::info!(
            "Camera opened: {} ({}x{} @ {} fps)",
            cam.info().human_name(),
            actual.width(),
            actual.height(),
            cam.frame_rate()
        );

        Ok(Self { cam, width: actual.width(), height: actual.height() })
    }
}

impl FrameSource for CameraCapture {
    /// Grab one frame and decode it to RGB.
    fn next_frame(&mut self) -> Result<Frame> {
        // Blocks until the device delivers a new buffer.
        let frame = self
            .cam
            .frame()
            .map_err(|e| Error::CameraFrame(format!("Fetch frame: {e}")))?;

        // Decode to ImageBuffer<Rgb<u8>, Vec<u8>> (handles the various raw formats).
        frame
            .decode_image::<RgbFormat>()
            .map_err(|e| Error::CameraFrame(format!("Decode RGB: {e}")))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for CameraCapture {
    fn drop(&mut self) {
        if let Err(e) = self.cam.stop_stream() {
            log::warn!("Failed to stop camera stream: {e}");
        }
    }
}

/// Pull frames until one is decodable and non-empty, so the model never sees
/// a blank first frame. Gives up after `timeout` with `CameraInit`.
pub fn wait_for_first_frame<S: FrameSource + ?Sized>(source: &mut S, timeout: Duration) -> Result<Frame> {
    let started = Instant::now();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match source.next_frame() {
            Ok(frame) if frame.width() > 0 && frame.height() > 0 => {
                log::debug!("First frame ready after {attempts} attempt(s)");
                return Ok(frame);
            }
            Ok(_) => log::debug!("Camera warm-up: empty frame"),
            Err(e) => log::debug!("Camera warm-up: {e}"),
        }
        if started.elapsed() >= timeout {
            return Err(Error::CameraInit(format!(
                "no decodable frame within {} ms ({attempts} attempts)",
                timeout.as_millis()
            )));
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
