// Segmentation model: an external, pretrained network behind `Segmenter`.
// The bundled implementation runs an ONNX model through ONNX Runtime; the
// model file comes from a local path or is downloaded once from a URL.
// Visual: nothing on screen by itself; it decides which pixels get painted.

use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use ndarray::Array4;

use crate::compositor::OutputKind;
use crate::config::{Delegate, ModelConfig, ModelSource};
use crate::error::{Error, Result};
use crate::types::{ClassMask, ConfidenceMask, Frame, FrameToken, Segmentation, UNLABELED};

/// Anything that turns a frame into a segmentation.
///
/// `token` must be strictly increasing across calls; video-mode models use it
/// to order frames.
pub trait Segmenter {
    fn segment(&mut self, frame: &Frame, token: FrameToken) -> Result<Segmentation>;
}

/// Rejects tokens that do not move forward.
pub fn check_token(last: Option<FrameToken>, token: FrameToken) -> Result<()> {
    match last {
        Some(prev) if token <= prev => Err(Error::Inference(format!(
            "frame token {} is not after {}",
            token.0, prev.0
        ))),
        _ => Ok(()),
    }
}

/// ONNX Runtime segmenter.
pub struct OnnxSegmenter {
    session: ort::session::Session,
    config: ModelConfig,
    last_token: Option<FrameToken>,
}

impl OnnxSegmenter {
    /// Resolve the model file, initialize ONNX Runtime and build a session.
    pub fn load(config: &ModelConfig) -> Result<Self> {
        let model_path = resolve_model(&config.source, config.cache_dir.as_deref())?;
        log::info!("Loading segmentation model from {:?}", model_path);

        ort::init()
            .with_name("seg-overlay")
            .commit()
            .map_err(|e| Error::ModelLoad(format!("Failed to initialize ORT: {e}")))?;

        let builder = ort::session::Session::builder()
            .map_err(|e| Error::ModelLoad(format!("Failed to create session builder: {e}")))?
            .with_intra_threads(config.intra_threads.max(1))
            .map_err(|e| Error::ModelLoad(format!("Failed to set threads: {e}")))?;
        let builder = with_delegate(builder, config.delegate)?;

        let session = builder
            .commit_from_file(&model_path)
            .map_err(|e| Error::ModelLoad(format!("Failed to load {:?}: {e}", model_path)))?;

        log::info!(
            "Model ready ({:?} output, {:?} resolution, delegate {:?})",
            config.output,
            config.resolution,
            config.delegate
        );

        Ok(Self { session, config: config.clone(), last_token: None })
    }

    /// Size the frame is resized to before it enters the network.
    fn input_dims(&self, frame: &Frame) -> (u32, u32) {
        match self.config.input_size {
            Some([w, h]) => (w, h),
            None => {
                let s = self.config.resolution.scale();
                let w = ((frame.width() as f32 * s).round() as u32).max(1);
                let h = ((frame.height() as f32 * s).round() as u32).max(1);
                (w, h)
            }
        }
    }
}

impl Segmenter for OnnxSegmenter {
    fn segment(&mut self, frame: &Frame, token: FrameToken) -> Result<Segmentation> {
        check_token(self.last_token, token)?;
        if frame.width() == 0 || frame.height() == 0 {
            return Err(Error::Inference("empty frame".into()));
        }

        let (w, h) = self.input_dims(frame);
        let input = preprocess_nhwc(frame, w, h);

        // NHWC (1, h, w, 3), RGB in [0, 1]
        let input_array = Array4::from_shape_vec((1, h as usize, w as usize, 3), input)
            .map_err(|e| Error::Inference(format!("Failed to create input array: {e}")))?;
        let input_tensor = ort::value::Tensor::from_array(input_array)
            .map_err(|e| Error::Inference(format!("Failed to create tensor: {e}")))?;

        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e| Error::Inference(format!("Inference failed: {e}")))?;

        let output = outputs
            .iter()
            .next()
            .ok_or_else(|| Error::Inference("No output from segmentation model".into()))?;

        let (shape, data) = output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::Inference(format!("Failed to extract output: {e}")))?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();

        let mut masks = decode_output(&dims, data, Some((h as usize, w as usize)))?;
        if self.config.mirror {
            masks.iter_mut().for_each(mirror_mask);
        }

        self.last_token = Some(token);

        Ok(match self.config.output {
            OutputKind::Confidence => Segmentation::from_confidences(masks),
            OutputKind::Category => {
                let classes = argmax_classes(&masks, self.config.segmentation_threshold)
                    .ok_or_else(|| Error::Inference("model produced no channels".into()))?;
                Segmentation::from_classes(classes)
            }
        })
    }
}

/// Register the requested compute backend, falling back to CPU where the
/// platform has none wired up.
fn with_delegate(
    builder: ort::session::builder::SessionBuilder,
    delegate: Delegate,
) -> Result<ort::session::builder::SessionBuilder> {
    if delegate == Delegate::Cpu {
        return Ok(builder);
    }

    #[cfg(target_os = "macos")]
    let builder = builder
        .with_execution_providers([ort::execution_providers::CoreMLExecutionProvider::default().build()])
        .map_err(|e| Error::ModelLoad(format!("Failed to register CoreML: {e}")))?;

    #[cfg(target_os = "windows")]
    let builder = builder
        .with_execution_providers([ort::execution_providers::DirectMLExecutionProvider::default().build()])
        .map_err(|e| Error::ModelLoad(format!("Failed to register DirectML: {e}")))?;

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    log::warn!("No GPU delegate available on this platform, running on CPU");

    Ok(builder)
}

/// Find the model on disk, downloading it first when the source is a URL.
pub fn resolve_model(source: &ModelSource, cache_dir: Option<&Path>) -> Result<PathBuf> {
    match source {
        ModelSource::Path(path) => {
            if path.exists() {
                Ok(path.clone())
            } else {
                Err(Error::ModelLoad(format!("Model not found: {:?}", path)))
            }
        }
        ModelSource::Url(url) => {
            let dir = cache_dir.map(Path::to_path_buf).unwrap_or_else(default_cache_dir);
            let target = dir.join(cache_file_name(url)?);
            if target.exists() {
                log::info!("Using cached model {:?}", target);
                return Ok(target);
            }
            download(url, &target)?;
            Ok(target)
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("seg-overlay"))
        .unwrap_or_else(|| PathBuf::from("models").join("cache"))
}

/// Last path segment of the URL, without query or fragment.
pub fn cache_file_name(url: &str) -> Result<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() && path.matches('/').count() > 2 => {
            Ok(name.to_string())
        }
        _ => Err(Error::ModelLoad(format!("Cannot derive a file name from {url}"))),
    }
}

fn download(url: &str, target: &Path) -> Result<()> {
    log::info!("Downloading model from {url}");
    let response = reqwest::blocking::Client::new()
        .get(url)
        .send()
        .map_err(|e| Error::ModelLoad(format!("request error: {e}")))?;
    if !response.status().is_success() {
        return Err(Error::ModelLoad(format!("model server responded with {}", response.status())));
    }
    let bytes = response
        .bytes()
        .map_err(|e| Error::ModelLoad(format!("failed to read model response: {e}")))?;

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // Write next to the target, then move, so an interrupted download never looks cached.
    let partial = target.with_extension("part");
    std::fs::write(&partial, &bytes)?;
    std::fs::rename(&partial, target)?;
    log::info!("Saved {} bytes to {:?}", bytes.len(), target);
    Ok(())
}

/// Resize the frame and lay it out as NHWC floats in [0, 1].
fn preprocess_nhwc(frame: &Frame, target_width: u32, target_height: u32) -> Vec<f32> {
    let resized;
    let src = if frame.dimensions() == (target_width, target_height) {
        frame
    } else {
        resized = imageops::resize(frame, target_width, target_height, FilterType::Triangle);
        &resized
    };
    src.as_raw().iter().map(|&v| v as f32 / 255.0).collect()
}

/// Split a raw output tensor into one confidence mask per channel.
///
/// Accepts `[1, H, W]`, `[1, H, W, C]` (NHWC) and `[1, C, H, W]` (NCHW).
/// `input_hw` is the `(height, width)` fed to the network: when exactly one
/// layout puts that size in its spatial dimensions, that layout wins.
/// Otherwise the layout is taken to be NCHW when the second dimension is
/// small and the last is not. Values are clamped to [0, 1].
pub fn decode_output(
    dims: &[usize],
    data: &[f32],
    input_hw: Option<(usize, usize)>,
) -> Result<Vec<ConfidenceMask>> {
    const MAX_CHANNELS: usize = 64;

    let (channels, height, width, nchw) = match dims {
        [1, h, w] => (1, *h, *w, true),
        [1, a, b, c] => {
            let spatial_last = input_hw == Some((*b, *c));
            let spatial_first = input_hw == Some((*a, *b));
            let nchw = match (spatial_last, spatial_first) {
                (true, false) => true,
                (false, true) => false,
                _ => *a <= MAX_CHANNELS && *c > MAX_CHANNELS,
            };
            if nchw { (*a, *b, *c, true) } else { (*c, *a, *b, false) }
        }
        _ => return Err(Error::Inference(format!("unexpected output shape {dims:?}"))),
    };

    let plane = width * height;
    if data.len() != plane * channels {
        return Err(Error::Inference(format!(
            "output has {} values, shape {dims:?} needs {}",
            data.len(),
            plane * channels
        )));
    }

    let masks = (0..channels)
        .map(|ch| {
            let values: Vec<f32> = if nchw {
                data[ch * plane..(ch + 1) * plane].iter().map(|v| v.clamp(0.0, 1.0)).collect()
            } else {
                data.iter().skip(ch).step_by(channels).map(|v| v.clamp(0.0, 1.0)).collect()
            };
            ConfidenceMask { width: width as u32, height: height as u32, values }
        })
        .collect();
    Ok(masks)
}

/// Collapse confidence maps into a class-id map.
///
/// Each pixel gets the channel with the highest score, or `UNLABELED` when that
/// score is not above `threshold`. A single-channel (person/background) model
/// maps to class 0 above the threshold.
pub fn argmax_classes(masks: &[ConfidenceMask], threshold: f32) -> Option<ClassMask> {
    let first = masks.first()?;
    let len = (first.width * first.height) as usize;
    let classes = (0..len)
        .map(|i| {
            let mut best = UNLABELED;
            let mut best_score = threshold;
            for (class, mask) in masks.iter().enumerate() {
                let score = mask.values.get(i).copied().unwrap_or(0.0);
                if score > best_score {
                    best = class.min(UNLABELED as usize - 1) as u8;
                    best_score = score;
                }
            }
            best
        })
        .collect();
    Some(ClassMask { width: first.width, height: first.height, classes })
}

/// Flip a mask left-to-right in place.
pub fn mirror_mask(mask: &mut ConfidenceMask) {
    let w = mask.width as usize;
    if w == 0 {
        return;
    }
    for row in mask.values.chunks_mut(w) {
        row.reverse();
    }
}
