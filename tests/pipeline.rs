use std::collections::VecDeque;

use image::Rgb;
use seg_overlay::camera::FrameSource;
use seg_overlay::compositor::MaskPolicy;
use seg_overlay::config::ErrorPolicy;
use seg_overlay::model::Segmenter;
use seg_overlay::pipeline::{CancelToken, Pipeline, RunOptions, StepOutcome};
use seg_overlay::present::Presenter;
use seg_overlay::types::{ConfidenceMask, Frame, FrameToken, OverlayBuffer, Segmentation};
use seg_overlay::{Error, Result};

/// Solid grey frames forever; optionally cancels after handing out `cancel_after`.
/// Reads listed in `broken_reads` (1-based) fail as if the device dropped out.
struct TestCamera {
    served: u32,
    cancel_after: Option<(u32, CancelToken)>,
    broken_reads: Vec<u32>,
}

impl TestCamera {
    fn new() -> Self {
        Self { served: 0, cancel_after: None, broken_reads: Vec::new() }
    }

    fn failing_on(reads: &[u32]) -> Self {
        Self { broken_reads: reads.to_vec(), ..Self::new() }
    }
}

impl FrameSource for TestCamera {
    fn next_frame(&mut self) -> Result<Frame> {
        self.served += 1;
        if let Some((n, token)) = &self.cancel_after {
            if self.served >= *n {
                token.cancel();
            }
        }
        if self.broken_reads.contains(&self.served) {
            return Err(Error::CameraFrame("device unplugged".into()));
        }
        Ok(Frame::from_pixel(2, 2, Rgb([90, 90, 90])))
    }

    fn resolution(&self) -> (u32, u32) {
        (2, 2)
    }
}

enum Reply {
    Hair(Vec<f32>),
    NoHairChannel,
    Fail,
}

/// Replays scripted replies and records every token it was given.
struct ScriptedModel {
    replies: VecDeque<Reply>,
    seen: Vec<FrameToken>,
}

impl ScriptedModel {
    fn new(replies: Vec<Reply>) -> Self {
        Self { replies: replies.into(), seen: Vec::new() }
    }
}

impl Segmenter for ScriptedModel {
    fn segment(&mut self, _frame: &Frame, token: FrameToken) -> Result<Segmentation> {
        self.seen.push(token);
        let background = ConfidenceMask { width: 2, height: 2, values: vec![0.0; 4] };
        match self.replies.pop_front().unwrap_or(Reply::NoHairChannel) {
            Reply::Hair(values) => Ok(Segmentation::from_confidences(vec![
                background,
                ConfidenceMask { width: 2, height: 2, values },
            ])),
            Reply::NoHairChannel => Ok(Segmentation::from_confidences(vec![background])),
            Reply::Fail => Err(Error::Inference("gpu lost".into())),
        }
    }
}

/// Remembers what it was asked to show.
#[derive(Default)]
struct RecordingPresenter {
    shown: Vec<Option<OverlayBuffer>>,
    refreshes: u32,
}

impl Presenter for RecordingPresenter {
    fn present(&mut self, _frame: &Frame, overlay: Option<&OverlayBuffer>) -> Result<()> {
        self.shown.push(overlay.cloned());
        Ok(())
    }

    fn refresh(&mut self) -> Result<()> {
        self.refreshes += 1;
        Ok(())
    }

    fn is_open(&self) -> bool {
        true
    }
}

fn alphas(overlay: &OverlayBuffer) -> Vec<u8> {
    overlay.pixels().map(|p| p[3]).collect()
}

fn pipeline(
    model: ScriptedModel,
    on_error: ErrorPolicy,
) -> Pipeline<TestCamera, ScriptedModel, RecordingPresenter> {
    let options = RunOptions { on_error, ..RunOptions::default() };
    Pipeline::new(TestCamera::new(), model, RecordingPresenter::default(), MaskPolicy::hair(), options)
}

#[test]
fn token_advances_only_on_successful_calls() {
    let model = ScriptedModel::new(vec![
        Reply::Hair(vec![0.9; 4]),
        Reply::Fail,
        Reply::Hair(vec![0.9; 4]),
    ]);
    let mut p = pipeline(model, ErrorPolicy::Skip);

    assert_eq!(p.step().unwrap(), StepOutcome::Drawn);
    assert_eq!(p.next_token(), FrameToken(2));
    assert_eq!(p.step().unwrap(), StepOutcome::Skipped);
    assert_eq!(p.next_token(), FrameToken(2));
    assert_eq!(p.step().unwrap(), StepOutcome::Drawn);
    assert_eq!(p.next_token(), FrameToken(3));

    let summary = p.summary();
    assert_eq!(summary.drawn, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.last_token, Some(FrameToken(2)));
    // The failed call's token is offered again on the next frame.
    assert_eq!(p.model().seen, vec![FrameToken(1), FrameToken(2), FrameToken(2)]);
}

#[test]
fn skip_policy_keeps_stale_overlay_on_screen() {
    let model = ScriptedModel::new(vec![Reply::Hair(vec![0.1, 0.9, 0.4, 0.35]), Reply::Fail]);
    let mut p = pipeline(model, ErrorPolicy::Skip);

    p.step().unwrap();
    p.step().unwrap();

    let shown = &p.presenter().shown;
    assert_eq!(shown.len(), 2);
    let first = shown[0].as_ref().expect("overlay drawn");
    assert_eq!(alphas(first), vec![0, 255, 255, 255]);
    assert_eq!(shown[1].as_ref(), Some(first));
}

#[test]
fn fail_fast_policy_returns_the_error() {
    let model = ScriptedModel::new(vec![Reply::Hair(vec![0.9; 4]), Reply::Fail, Reply::Hair(vec![0.9; 4])]);
    let mut p = pipeline(model, ErrorPolicy::FailFast);

    let err = p.run().unwrap_err();
    assert!(matches!(err, Error::Inference(_)));
    assert_eq!(p.summary().drawn, 1);
    assert_eq!(p.summary().failed, 1);
}

#[test]
fn missing_channel_draws_nothing_new_and_continues() {
    let model = ScriptedModel::new(vec![Reply::NoHairChannel, Reply::Hair(vec![1.0; 4])]);
    let mut p = pipeline(model, ErrorPolicy::FailFast);

    assert_eq!(p.step().unwrap(), StepOutcome::Empty);
    assert_eq!(p.step().unwrap(), StepOutcome::Drawn);
    assert!(p.presenter().shown[0].is_none());
    // Missing output is not a failure, and the call still counted as successful.
    assert_eq!(p.summary().failed, 0);
    assert_eq!(p.next_token(), FrameToken(3));
}

#[test]
fn cancel_stops_before_the_next_frame() {
    let token = CancelToken::new();
    let camera = TestCamera { cancel_after: Some((3, token.clone())), ..TestCamera::new() };
    let mut p = Pipeline::new(
        camera,
        ScriptedModel::new(Vec::new()),
        RecordingPresenter::default(),
        MaskPolicy::hair(),
        RunOptions::default(),
    )
    .with_cancel(token.clone());

    // The third frame still completes; the flag is seen before a fourth is requested.
    let summary = p.run().unwrap();
    assert_eq!(summary.iterations(), 3);
    assert!(p.cancel_token().is_cancelled());
}

#[test]
fn already_cancelled_loop_requests_no_frames() {
    let mut p = pipeline(ScriptedModel::new(Vec::new()), ErrorPolicy::Skip);
    p.cancel_token().cancel();
    let summary = p.run().unwrap();
    assert_eq!(summary.iterations(), 0);
    assert!(p.presenter().shown.is_empty());
}

#[test]
fn max_frames_bounds_the_loop() {
    let model = ScriptedModel::new(Vec::new());
    let options = RunOptions { max_frames: Some(4), ..RunOptions::default() };
    let mut p = Pipeline::new(TestCamera::new(), model, RecordingPresenter::default(), MaskPolicy::hair(), options);

    let summary = p.run().unwrap();
    assert_eq!(summary.iterations(), 4);
    assert_eq!(p.presenter().shown.len(), 4);
}

#[test]
fn snapshot_size_is_applied_before_inference() {
    struct SizeProbe(Vec<(u32, u32)>);
    impl Segmenter for SizeProbe {
        fn segment(&mut self, frame: &Frame, _token: FrameToken) -> Result<Segmentation> {
            self.0.push(frame.dimensions());
            Ok(Segmentation::default())
        }
    }

    let options = RunOptions { snapshot_size: Some((8, 6)), max_frames: Some(1), ..RunOptions::default() };
    let mut p = Pipeline::new(
        TestCamera::new(),
        SizeProbe(Vec::new()),
        RecordingPresenter::default(),
        MaskPolicy::hair(),
        options,
    );
    p.run().unwrap();
    assert_eq!(p.model().0, vec![(8, 6)]);
    // The probe returns no masks, so there is nothing to draw.
    assert_eq!(p.summary().empty, 1);
}

#[test]
fn skip_policy_rides_out_camera_read_failures() {
    let model = ScriptedModel::new(vec![Reply::Hair(vec![0.9; 4]), Reply::Hair(vec![0.9; 4])]);
    let options = RunOptions { max_frames: Some(4), ..RunOptions::default() };
    let mut p = Pipeline::new(
        TestCamera::failing_on(&[2, 3]),
        model,
        RecordingPresenter::default(),
        MaskPolicy::hair(),
        options,
    );

    let summary = p.run().unwrap();
    assert_eq!(summary.drawn, 2);
    assert_eq!(summary.failed, 2);
    // Broken reads never reach the model, so tokens stay consecutive.
    assert_eq!(p.model().seen, vec![FrameToken(1), FrameToken(2)]);
    // The window is refreshed instead of left without events.
    assert_eq!(p.presenter().refreshes, 2);
    assert_eq!(p.presenter().shown.len(), 2);
}

#[test]
fn fail_fast_policy_stops_on_camera_read_failure() {
    let mut p = Pipeline::new(
        TestCamera::failing_on(&[2]),
        ScriptedModel::new(vec![Reply::Hair(vec![0.9; 4])]),
        RecordingPresenter::default(),
        MaskPolicy::hair(),
        RunOptions { on_error: ErrorPolicy::FailFast, ..RunOptions::default() },
    );

    let err = p.run().unwrap_err();
    assert!(matches!(err, Error::CameraFrame(_)));
    assert_eq!(p.summary().drawn, 1);
    assert_eq!(p.summary().failed, 1);
    assert_eq!(p.presenter().refreshes, 0);
}
