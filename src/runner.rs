//! Single-flight pipeline invocation
//!
//! At most one run is in flight. A trigger arriving while a run is active is
//! dropped, not queued, and is not an error.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info};

use crate::capture::frame::CapturedFrame;
use crate::capture::ScreenCapture;
use crate::vision::{PipelineResult, VisionPipeline};

/// Runner state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
}

/// What happened to a run request
#[derive(Debug)]
pub enum RunOutcome {
    Completed(PipelineResult),
    /// Another run was in flight
    Dropped,
}

/// Resets the busy flag when the run ends, including by unwinding
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Shares one pipeline between callers and enforces single-flight runs
#[derive(Clone)]
pub struct PipelineRunner {
    pipeline: Arc<VisionPipeline>,
    busy: Arc<AtomicBool>,
}

impl PipelineRunner {
    pub fn new(pipeline: VisionPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn pipeline(&self) -> &VisionPipeline {
        &self.pipeline
    }

    pub fn state(&self) -> RunState {
        if self.busy.load(Ordering::Acquire) {
            RunState::Running
        } else {
            RunState::Idle
        }
    }

    /// Idle -> Running, or `None` when already running
    fn acquire(&self) -> Option<BusyGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(self.busy.clone()))
    }

    /// Run on the calling thread unless a run is in flight
    pub fn try_run(&self, frame: &CapturedFrame) -> RunOutcome {
        let Some(_guard) = self.acquire() else {
            debug!("Run request dropped: pipeline busy");
            return RunOutcome::Dropped;
        };
        RunOutcome::Completed(self.pipeline.run(frame))
    }

    /// Run on a background thread. The runner is marked Running before this
    /// returns; `None` means the request was dropped.
    pub fn trigger<F>(&self, frame: CapturedFrame, on_done: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce(PipelineResult) + Send + 'static,
    {
        self.trigger_with(move || frame, on_done)
    }

    /// Like [`trigger`](Self::trigger), but the frame is only captured once
    /// the run has been accepted. A dropped request never calls `capture`.
    pub fn trigger_with<C, F>(&self, capture: C, on_done: F) -> Option<JoinHandle<()>>
    where
        C: FnOnce() -> CapturedFrame,
        F: FnOnce(PipelineResult) + Send + 'static,
    {
        let Some(guard) = self.acquire() else {
            debug!("Trigger dropped: pipeline busy");
            return None;
        };
        let frame = capture();
        let pipeline = self.pipeline.clone();
        Some(std::thread::spawn(move || {
            let _guard = guard;
            let result = pipeline.run(&frame);
            on_done(result);
        }))
    }
}

/// Events accepted by the trigger listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvent {
    /// Point of interest in source coordinates
    Point(i32, i32),
    Shutdown,
}

/// Background thread turning trigger events into pipeline runs
pub struct TriggerListener {
    sender: Sender<TriggerEvent>,
    dropped: Arc<AtomicUsize>,
    handle: Option<JoinHandle<()>>,
}

impl TriggerListener {
    pub fn send(&self, x: i32, y: i32) {
        let _ = self.sender.send(TriggerEvent::Point(x, y));
    }

    /// Triggers dropped so far because a run was in flight
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Acquire)
    }

    /// Stop listening, wait for the in-flight run, and return how many
    /// triggers were dropped
    pub fn shutdown(mut self) -> usize {
        let _ = self.sender.send(TriggerEvent::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.dropped()
    }
}

impl Drop for TriggerListener {
    fn drop(&mut self) {
        let _ = self.sender.send(TriggerEvent::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawn a listener capturing from `capture` on each point event and
/// delivering finished results to `results`
pub fn spawn_listener(
    runner: PipelineRunner,
    capture: ScreenCapture,
    results: Sender<PipelineResult>,
) -> TriggerListener {
    let (sender, receiver) = unbounded();
    let dropped = Arc::new(AtomicUsize::new(0));
    let counter = dropped.clone();
    let handle = std::thread::spawn(move || listen(runner, capture, receiver, results, counter));
    TriggerListener {
        sender,
        dropped,
        handle: Some(handle),
    }
}

fn listen(
    runner: PipelineRunner,
    capture: ScreenCapture,
    events: Receiver<TriggerEvent>,
    results: Sender<PipelineResult>,
    dropped: Arc<AtomicUsize>,
) {
    info!("Trigger listener started");
    let mut in_flight: Vec<JoinHandle<()>> = Vec::new();

    for event in events.iter() {
        match event {
            TriggerEvent::Point(x, y) => {
                let tx = results.clone();
                match runner.trigger_with(
                    || capture.capture_at((x, y)),
                    move |result| {
                        let _ = tx.send(result);
                    },
                ) {
                    Some(handle) => in_flight.push(handle),
                    None => {
                        dropped.fetch_add(1, Ordering::AcqRel);
                    }
                }
                in_flight.retain(|h| !h.is_finished());
            }
            TriggerEvent::Shutdown => break,
        }
    }

    for handle in in_flight {
        let _ = handle.join();
    }
    info!(
        "Trigger listener stopped ({} triggers dropped)",
        dropped.load(Ordering::Acquire)
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::vision::{Recognition, Recognizer};
    use image::{GrayImage, Rgb, RgbImage};
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect as DrawRect;
    use std::time::{Duration, Instant};

    fn text_frame() -> RgbImage {
        let mut img = RgbImage::from_pixel(300, 150, Rgb([235, 235, 235]));
        for i in 0..3 {
            draw_filled_rect_mut(&mut img, DrawRect::at(120 + i * 22, 62).of_size(16, 26), Rgb([20, 20, 20]));
        }
        img
    }

    /// Recognizer that reports entry and then blocks until the gate closes
    fn gated_recognizer() -> (Arc<dyn Recognizer>, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = unbounded::<()>();
        let (gate_tx, gate_rx) = unbounded::<()>();
        let recognizer: Arc<dyn Recognizer> = Arc::new(move |_: &GrayImage| -> anyhow::Result<Recognition> {
            let _ = entered_tx.send(());
            // Returns once the sender is dropped
            let _ = gate_rx.recv();
            Ok(Recognition {
                text: "Go".into(),
                confidence: 80.0,
            })
        });
        (recognizer, entered_rx, gate_tx)
    }

    fn runner(recognizer: Arc<dyn Recognizer>) -> PipelineRunner {
        let mut config = AppConfig::default();
        config.diagnostics.enabled = false;
        config.sampler.seed = Some(11);
        PipelineRunner::new(VisionPipeline::new(config, recognizer).unwrap())
    }

    #[test]
    fn test_try_run_when_idle() {
        let recognizer: Arc<dyn Recognizer> = Arc::new(|_: &GrayImage| -> anyhow::Result<Recognition> {
            Ok(Recognition {
                text: "Go".into(),
                confidence: 80.0,
            })
        });
        let runner = runner(recognizer);
        assert_eq!(runner.state(), RunState::Idle);

        match runner.try_run(&CapturedFrame::new(text_frame())) {
            RunOutcome::Completed(result) => assert_eq!(result.best_text, "Go"),
            RunOutcome::Dropped => panic!("idle runner dropped a run"),
        }
        assert_eq!(runner.state(), RunState::Idle);
    }

    #[test]
    fn test_second_request_dropped_while_running() {
        let (recognizer, entered, gate) = gated_recognizer();
        let runner = runner(recognizer);
        let (done_tx, done_rx) = unbounded();

        let handle = runner
            .trigger(CapturedFrame::new(text_frame()), move |result| {
                let _ = done_tx.send(result.best_text);
            })
            .expect("idle runner accepts a trigger");
        assert_eq!(runner.state(), RunState::Running);

        entered.recv().unwrap();
        assert!(matches!(runner.try_run(&CapturedFrame::new(text_frame())), RunOutcome::Dropped));
        assert!(runner.trigger(CapturedFrame::new(text_frame()), |_| {}).is_none());

        drop(gate);
        handle.join().unwrap();
        assert_eq!(done_rx.recv().unwrap(), "Go");
        assert_eq!(runner.state(), RunState::Idle);

        // Back to Idle, the next request runs
        assert!(matches!(
            runner.try_run(&CapturedFrame::new(text_frame())),
            RunOutcome::Completed(_)
        ));
    }

    #[test]
    fn test_dropped_trigger_skips_capture() {
        let (recognizer, entered, gate) = gated_recognizer();
        let runner = runner(recognizer);
        let handle = runner
            .trigger(CapturedFrame::new(text_frame()), |_| {})
            .expect("idle runner accepts a trigger");
        entered.recv().unwrap();

        let mut captures = 0;
        let dropped = runner.trigger_with(
            || {
                captures += 1;
                CapturedFrame::new(text_frame())
            },
            |_| {},
        );
        assert!(dropped.is_none());
        assert_eq!(captures, 0);

        drop(gate);
        handle.join().unwrap();

        let accepted = runner.trigger_with(
            || {
                captures += 1;
                CapturedFrame::new(text_frame())
            },
            |_| {},
        );
        accepted.expect("idle runner accepts a trigger").join().unwrap();
        assert_eq!(captures, 1);
    }

    #[test]
    fn test_listener_drops_overlapping_triggers() {
        let (recognizer, entered, gate) = gated_recognizer();
        let runner = runner(recognizer);
        let capture = ScreenCapture::new(text_frame(), AppConfig::default().capture);
        let (results_tx, results_rx) = unbounded();

        let listener = spawn_listener(runner, capture, results_tx);
        listener.send(150, 75);
        entered.recv().unwrap();
        listener.send(150, 75);
        listener.send(150, 75);

        let deadline = Instant::now() + Duration::from_secs(10);
        while listener.dropped() < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(listener.dropped(), 2);

        drop(gate);
        assert_eq!(listener.shutdown(), 2);

        let delivered: Vec<_> = results_rx.try_iter().collect();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].best_text, "Go");
    }
}
