// Settings for one overlay run.
// A run starts from a preset (`face` or `hair`), a JSON file patches it field
// by field, then command-line flags patch the result. A config file only
// needs the parts it changes.
// Visual: none directly; picks which pipeline the window shows.

use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compositor::{MaskPolicy, OutputKind};
use crate::error::{Error, Result};

/// The two built-in pipelines.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// Body-part class mask, face skin parts highlighted.
    Face,
    /// Multiclass confidence masks, hair channel highlighted.
    Hair,
}

impl Preset {
    pub fn config(self) -> Config {
        match self {
            Preset::Face => Config {
                camera: CameraConfig { snapshot_size: Some([640, 480]), ..CameraConfig::default() },
                model: ModelConfig {
                    source: ModelSource::Path(PathBuf::from("models/body_parts.onnx")),
                    output: OutputKind::Category,
                    resolution: ResolutionTier::High,
                    segmentation_threshold: 0.9,
                    ..ModelConfig::default()
                },
                overlay: MaskPolicy::face_parts(),
                run: RunConfig::default(),
            },
            Preset::Hair => Config {
                camera: CameraConfig::default(),
                model: ModelConfig {
                    source: ModelSource::Path(PathBuf::from("models/selfie_multiclass_256x256.onnx")),
                    output: OutputKind::Confidence,
                    input_size: Some([256, 256]),
                    delegate: Delegate::Gpu,
                    ..ModelConfig::default()
                },
                overlay: MaskPolicy::hair(),
                run: RunConfig::default(),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub model: ModelConfig,
    pub overlay: MaskPolicy,
    pub run: RunConfig,
}

impl Default for Config {
    fn default() -> Self {
        Preset::Face.config()
    }
}

impl Config {
    /// Read a JSON config file on top of `base`. Fields the file leaves out,
    /// at any depth, keep the value from `base`.
    pub fn load(path: &Path, base: Config) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
        let patch: Value = serde_json::from_str(&text)?;
        if !patch.is_object() {
            return Err(Error::Config(format!("{} must hold a JSON object", path.display())));
        }
        let mut merged = serde_json::to_value(base)?;
        merge_json(&mut merged, patch);
        let config: Config = serde_json::from_value(merged)?;
        config.validate()?;
        Ok(config)
    }

    /// Short name shown in the window title and HUD.
    pub fn label(&self) -> &'static str {
        match self.overlay {
            MaskPolicy::ClassMembership { .. } => "face",
            MaskPolicy::ConfidenceThreshold { .. } => "hair",
        }
    }

    /// Reject settings that cannot work together.
    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(Error::Config("camera width/height must be non-zero".into()));
        }
        if let Some([w, h]) = self.camera.snapshot_size {
            if w == 0 || h == 0 {
                return Err(Error::Config("camera.snapshot_size must be non-zero".into()));
            }
        }
        if let Some([w, h]) = self.model.input_size {
            if w == 0 || h == 0 {
                return Err(Error::Config("model.input_size must be non-zero".into()));
            }
        }
        if !(0.0..=1.0).contains(&self.model.segmentation_threshold) {
            return Err(Error::Config(format!(
                "model.segmentation_threshold {} is outside [0, 1]",
                self.model.segmentation_threshold
            )));
        }
        if let MaskPolicy::ConfidenceThreshold { threshold, .. } = &self.overlay {
            if !threshold.is_finite() {
                return Err(Error::Config("overlay.threshold must be a finite number".into()));
            }
        }
        if self.overlay.output_kind() != self.model.output {
            return Err(Error::Config(format!(
                "overlay policy reads {:?} output but the model is set to produce {:?}",
                self.overlay.output_kind(),
                self.model.output
            )));
        }
        if self.run.target_fps == Some(0) {
            return Err(Error::Config("run.target_fps must be at least 1".into()));
        }
        Ok(())
    }
}

/// Overlay `patch` onto `base`. Objects merge key by key; anything else
/// replaces. An object switching to a different `policy` replaces wholesale,
/// since its fields belong to the other variant.
fn merge_json(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            if patch.get("policy").is_some_and(|p| base.get("policy") != Some(p)) {
                *base = patch;
                return;
            }
            for (key, value) in patch {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, patch) => *base = patch,
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// How long to wait for the first decodable frame before giving up.
    pub warmup_timeout_ms: u64,
    /// Resize every frame to this size before inference (off-screen snapshot).
    pub snapshot_size: Option<[u32; 2]>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self { index: 0, width: 640, height: 480, fps: 30, warmup_timeout_ms: 5_000, snapshot_size: None }
    }
}

/// Where the model file comes from. Written in config files as a plain
/// string; anything starting with `http://` or `https://` is a URL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModelSource {
    Path(PathBuf),
    Url(String),
}

impl ModelSource {
    pub fn parse(s: &str) -> Self {
        if s.starts_with("http://") || s.starts_with("https://") {
            ModelSource::Url(s.to_string())
        } else {
            ModelSource::Path(PathBuf::from(s))
        }
    }
}

impl From<String> for ModelSource {
    fn from(s: String) -> Self {
        ModelSource::parse(&s)
    }
}

impl From<ModelSource> for String {
    fn from(src: ModelSource) -> Self {
        src.to_string()
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Path(p) => write!(f, "{}", p.display()),
            ModelSource::Url(u) => f.write_str(u),
        }
    }
}

/// Internal resolution the frame is scaled to before inference, for models
/// that accept any input size. Trades accuracy for speed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionTier {
    Low,
    Medium,
    High,
    Full,
}

impl ResolutionTier {
    pub fn scale(self) -> f32 {
        match self {
            ResolutionTier::Low => 0.25,
            ResolutionTier::Medium => 0.5,
            ResolutionTier::High => 0.75,
            ResolutionTier::Full => 1.0,
        }
    }
}

/// Compute backend for the model.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delegate {
    Cpu,
    Gpu,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub source: ModelSource,
    pub output: OutputKind,
    pub resolution: ResolutionTier,
    /// Class-mask output: a pixel whose best score is not above this is unlabeled.
    pub segmentation_threshold: f32,
    /// Flip the model output horizontally (for mirrored video).
    pub mirror: bool,
    pub delegate: Delegate,
    /// Fixed model input size; overrides `resolution` for fixed-shape models.
    pub input_size: Option<[u32; 2]>,
    /// Where downloaded models are kept. Defaults to the user cache directory.
    pub cache_dir: Option<PathBuf>,
    pub intra_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            source: ModelSource::Path(PathBuf::from("models/segmentation.onnx")),
            output: OutputKind::Category,
            resolution: ResolutionTier::Medium,
            segmentation_threshold: 0.5,
            mirror: false,
            delegate: Delegate::Cpu,
            input_size: None,
            cache_dir: None,
            intra_threads: 2,
        }
    }
}

/// What the loop does when a frame fails (camera read or inference).
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Log it, keep the last overlay on screen, go on with the next frame.
    #[default]
    Skip,
    /// Stop the loop and return the error.
    FailFast,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub on_error: ErrorPolicy,
    /// Pace the loop to at most this many frames per second. `None` = as fast as frames come.
    pub target_fps: Option<u32>,
    /// Stop after this many loop iterations.
    pub max_frames: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { on_error: ErrorPolicy::Skip, target_fps: Some(60), max_frames: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        Preset::Face.config().validate().unwrap();
        Preset::Hair.config().validate().unwrap();
    }

    #[test]
    fn model_source_detects_urls() {
        assert_eq!(
            ModelSource::parse("https://example.com/m.onnx"),
            ModelSource::Url("https://example.com/m.onnx".into())
        );
        assert_eq!(ModelSource::parse("models/m.onnx"), ModelSource::Path(PathBuf::from("models/m.onnx")));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(
            &path,
            r#"{ "model": { "source": "https://example.com/m.onnx", "output": "confidence" },
                 "overlay": { "policy": "confidence_threshold", "channel": 1, "threshold": 0.3,
                              "highlight": { "color": [128, 0, 128], "alpha": 255 } },
                 "run": { "on_error": "fail-fast" } }"#,
        )
        .unwrap();

        let config = Config::load(&path, Preset::Face.config()).unwrap();
        assert_eq!(config.model.source, ModelSource::Url("https://example.com/m.onnx".into()));
        assert_eq!(config.run.on_error, ErrorPolicy::FailFast);
        assert_eq!(config.camera, Preset::Face.config().camera);
        assert_eq!(config.overlay, MaskPolicy::hair());
        assert_eq!(config.label(), "hair");
    }

    #[test]
    fn partial_model_section_keeps_preset_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.json");
        std::fs::write(&path, r#"{ "model": { "source": "x.onnx" } }"#).unwrap();

        let config = Config::load(&path, Preset::Face.config()).unwrap();
        let face = Preset::Face.config();
        assert_eq!(config.model.source, ModelSource::Path(PathBuf::from("x.onnx")));
        assert_eq!(config.model.segmentation_threshold, face.model.segmentation_threshold);
        assert_eq!(config.model.resolution, ResolutionTier::High);
        assert_eq!(config.camera.snapshot_size, Some([640, 480]));
        // Leaving the section out entirely gives the same preset values.
        std::fs::write(&path, "{}").unwrap();
        assert_eq!(Config::load(&path, Preset::Face.config()).unwrap(), face);
    }

    #[test]
    fn file_patches_the_chosen_preset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hair.json");
        std::fs::write(&path, r#"{ "overlay": { "threshold": 0.5 } }"#).unwrap();

        let config = Config::load(&path, Preset::Hair.config()).unwrap();
        assert_eq!(config.model.input_size, Some([256, 256]));
        match config.overlay {
            MaskPolicy::ConfidenceThreshold { channel, threshold, .. } => {
                assert_eq!(channel, 1);
                assert_eq!(threshold, 0.5);
            }
            other => panic!("unexpected policy {other:?}"),
        }
    }

    #[test]
    fn non_object_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(Config::load(&path, Config::default()), Err(Error::Config(_))));
    }

    #[test]
    fn mismatched_output_kind_is_rejected() {
        let mut config = Preset::Hair.config();
        config.model.output = OutputKind::Category;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let mut config = Preset::Face.config();
        config.model.segmentation_threshold = 1.5;
        assert!(config.validate().is_err());
    }
}
