// The render loop: camera -> model -> compositor -> presenter, one frame at a time.
// The next iteration starts only after the current frame has been presented,
// so a slow model just lowers the frame rate; nothing queues up. The loop owns
// the frame token and checks a `CancelToken` before every frame.
// Visual: the window updates once per loop turn; ESC or close ends the loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use image::imageops::{self, FilterType};

use crate::camera::FrameSource;
use crate::compositor::MaskPolicy;
use crate::config::{Config, ErrorPolicy};
use crate::error::{Error, Result};
use crate::model::Segmenter;
use crate::present::Presenter;
use crate::types::{Frame, FrameToken, OverlayBuffer};

/// Shared stop flag. Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Loop knobs, usually taken from [`Config`].
#[derive(Clone, Debug, PartialEq)]
pub struct RunOptions {
    pub on_error: ErrorPolicy,
    pub target_fps: Option<u32>,
    pub max_frames: Option<u64>,
    /// Resize each frame to this size before inference.
    pub snapshot_size: Option<(u32, u32)>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { on_error: ErrorPolicy::Skip, target_fps: None, max_frames: None, snapshot_size: None }
    }
}

impl From<&Config> for RunOptions {
    fn from(config: &Config) -> Self {
        Self {
            on_error: config.run.on_error,
            target_fps: config.run.target_fps,
            max_frames: config.run.max_frames,
            snapshot_size: config.camera.snapshot_size.map(|[w, h]| (w, h)),
        }
    }
}

/// What happened to one loop iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// A fresh overlay was drawn.
    Drawn,
    /// The model ran but the output the policy reads was missing.
    Empty,
    /// Camera or model failed; the previous overlay (if any) stays up.
    Skipped,
}

/// Counters reported when the loop ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub drawn: u64,
    pub empty: u64,
    pub failed: u64,
    /// Last token the model accepted.
    pub last_token: Option<FrameToken>,
}

impl RunSummary {
    pub fn iterations(&self) -> u64 {
        self.drawn + self.empty + self.failed
    }
}

pub struct Pipeline<S, M, P> {
    source: S,
    model: M,
    presenter: P,
    policy: MaskPolicy,
    options: RunOptions,
    cancel: CancelToken,
    next_token: FrameToken,
    last_overlay: Option<OverlayBuffer>,
    summary: RunSummary,
}

impl<S, M, P> Pipeline<S, M, P>
where
    S: FrameSource,
    M: Segmenter,
    P: Presenter,
{
    pub fn new(source: S, model: M, presenter: P, policy: MaskPolicy, options: RunOptions) -> Self {
        Self {
            source,
            model,
            presenter,
            policy,
            options,
            cancel: CancelToken::new(),
            next_token: FrameToken::FIRST,
            last_overlay: None,
            summary: RunSummary::default(),
        }
    }

    /// Share an existing stop flag instead of the pipeline's own.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A handle that stops the loop before its next frame.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Token the next model call will receive.
    pub fn next_token(&self) -> FrameToken {
        self.next_token
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    /// Run until cancelled, the window closes, `max_frames` is reached, or
    /// (with `fail-fast`) a frame fails.
    pub fn run(&mut self) -> Result<RunSummary> {
        let frame_interval = self
            .options
            .target_fps
            .map(|fps| Duration::from_secs_f64(1.0 / fps.max(1) as f64));
        let mut next_deadline = Instant::now();

        loop {
            if self.cancel.is_cancelled() {
                log::info!("Render loop cancelled");
                break;
            }
            if !self.presenter.is_open() {
                log::info!("Window closed, stopping");
                self.cancel.cancel();
                break;
            }
            if let Some(max) = self.options.max_frames {
                if self.summary.iterations() >= max {
                    log::info!("Reached {max} frames, stopping");
                    break;
                }
            }

            if let Err(e) = self.step() {
                self.log_summary();
                return Err(e);
            }

            // Pace to the target rate; a slow frame just pushes the next one back.
            if let Some(interval) = frame_interval {
                next_deadline += interval;
                let now = Instant::now();
                if next_deadline > now {
                    std::thread::sleep(next_deadline - now);
                } else {
                    next_deadline = now;
                }
            }
        }

        self.log_summary();
        Ok(self.summary)
    }

    fn log_summary(&self) {
        log::info!(
            "Done: {} drawn, {} empty, {} failed",
            self.summary.drawn,
            self.summary.empty,
            self.summary.failed
        );
    }

    /// One iteration: grab, segment, composite, present.
    pub fn step(&mut self) -> Result<StepOutcome> {
        // 1) Fresh frame from the source.
        let frame = match self.source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                self.fail(e)?;
                // No new picture, but the window still has to pump its events.
                self.presenter.refresh()?;
                return Ok(StepOutcome::Skipped);
            }
        };

        // 2) Off-screen snapshot at a fixed size, if configured.
        let frame = match self.options.snapshot_size {
            Some((w, h)) if frame.dimensions() != (w, h) => {
                imageops::resize(&frame, w, h, FilterType::Triangle)
            }
            _ => frame,
        };

        // 3) Inference. The token only advances when the call succeeds.
        let segmentation = match self.model.segment(&frame, self.next_token) {
            Ok(seg) => {
                self.summary.last_token = Some(self.next_token);
                self.next_token = self.next_token.next();
                seg
            }
            Err(e) => {
                self.fail(e)?;
                self.show_stale(&frame)?;
                return Ok(StepOutcome::Skipped);
            }
        };

        // 4) Overlay for this frame, or nothing to draw.
        match self.policy.composite(&segmentation) {
            Some(overlay) => {
                self.presenter.present(&frame, Some(&overlay))?;
                self.last_overlay = Some(overlay);
                self.summary.drawn += 1;
                Ok(StepOutcome::Drawn)
            }
            None => {
                log::debug!("Frame {:?}: expected mask output missing, nothing to draw", self.summary.last_token);
                self.show_stale(&frame)?;
                self.summary.empty += 1;
                Ok(StepOutcome::Empty)
            }
        }
    }

    /// Count the failure and apply the error policy.
    fn fail(&mut self, e: Error) -> Result<()> {
        self.summary.failed += 1;
        match self.options.on_error {
            ErrorPolicy::Skip => {
                log::warn!("Frame skipped: {e}");
                Ok(())
            }
            ErrorPolicy::FailFast => {
                log::error!("Frame failed, stopping: {e}");
                Err(e)
            }
        }
    }

    /// Present the new frame with whatever overlay was last drawn.
    fn show_stale(&mut self, frame: &Frame) -> Result<()> {
        self.presenter.present(frame, self.last_overlay.as_ref())
    }
}
