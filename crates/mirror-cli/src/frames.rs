//! Frame worker: owns the camera and the pipeline, captures one frame at a
//! time and reports recognitions back to the session loop.

use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use mirror_proto::notification::{Notification, NotificationKind};
use mirror_vision::camera::{CameraConfig, FrameSource};
use mirror_vision::overlay::{self, DrawCommand};
use mirror_vision::pipeline::{FrameOutcome, Pipeline, PipelineState};
use mirror_vision::PipelineError;

use crate::session::SessionEvent;

#[derive(Debug)]
pub enum FrameCmd {
    SetDetecting(bool),
    /// A clip started; stop submitting frames.
    Suspend,
    /// The clip is over; resume with fresh vote counts.
    Resume,
    OpenCamera,
}

pub struct FrameWorker {
    pipeline: Pipeline,
    source: Option<FrameSource>,
    camera: CameraConfig,
    interval: Duration,
    max_frames: Option<u64>,
    overlay_out: Option<(String, u32, u32)>,
    events: mpsc::Sender<SessionEvent>,
    detecting: bool,
    frames: u64,
}

impl FrameWorker {
    pub fn new(
        pipeline: Pipeline,
        camera: CameraConfig,
        interval: Duration,
        max_frames: Option<u64>,
        overlay_out: Option<(String, u32, u32)>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            pipeline,
            source: None,
            camera,
            interval,
            max_frames,
            overlay_out,
            events,
            detecting: false,
            frames: 0,
        }
    }

    fn active(&self) -> bool {
        self.detecting && self.source.is_some() && self.pipeline.state() == PipelineState::Running
    }

    pub async fn run(mut self, mut cmds: mpsc::Receiver<FrameCmd>) {
        self.open_camera().await;
        loop {
            let active = self.active();
            tokio::select! {
                cmd = cmds.recv() => match cmd {
                    Some(cmd) => self.on_cmd(cmd).await,
                    None => break,
                },
                _ = tokio::time::sleep(self.interval), if active => {
                    self.step().await;
                    if self.max_frames.is_some_and(|max| self.frames >= max) {
                        info!("frames: reached max_frames={}", self.frames);
                        let _ = self.events.send(SessionEvent::FramesDone).await;
                        break;
                    }
                }
            }
        }
        debug!("frames: worker stopped after {} frames", self.frames);
    }

    async fn on_cmd(&mut self, cmd: FrameCmd) {
        debug!("frames: {:?}", cmd);
        match cmd {
            FrameCmd::SetDetecting(on) => self.detecting = on,
            FrameCmd::Suspend => self.pipeline.suspend(),
            FrameCmd::Resume => {
                self.pipeline.resume();
                self.pipeline.reset_votes();
            }
            FrameCmd::OpenCamera => self.open_camera().await,
        }
    }

    async fn open_camera(&mut self) {
        match FrameSource::open(&self.camera) {
            Ok(src) => {
                info!("frames: camera open ({})", self.camera.mode);
                self.source = Some(src);
            }
            Err(e) => {
                warn!("frames: {}", e);
                self.source = None;
                self.notify(
                    Notification::new(NotificationKind::CameraError, "Cannot open camera").with_detail(e.to_string()),
                )
                .await;
            }
        }
    }

    async fn step(&mut self) {
        let Some(source) = self.source.as_mut() else { return; };
        let frame = match source.next_frame().await {
            Ok(f) => f,
            Err(PipelineError::InvalidFrame(msg)) => {
                warn!("frames: dropping undecodable frame: {}", msg);
                return;
            }
            Err(e) => {
                warn!("frames: camera lost: {}", e);
                self.source = None;
                self.notify(
                    Notification::new(NotificationKind::CameraError, "Camera lost").with_detail(e.to_string()),
                )
                .await;
                return;
            }
        };
        self.frames += 1;

        match self.pipeline.process_frame(&frame) {
            Ok(FrameOutcome::Skipped) => {}
            Ok(FrameOutcome::Processed { overlay, fired, .. }) => {
                self.write_overlay(&overlay);
                if let Some(name) = fired {
                    info!("frames: recognized {}", name);
                    let _ = self
                        .events
                        .send(SessionEvent::Game(mirror_game::GameEvent::Recognized(name)))
                        .await;
                }
            }
            Err(e) => {
                debug!("frames: frame {} skipped: {}", self.frames, e);
                if self.pipeline.is_degraded(&e) {
                    self.notify(
                        Notification::new(NotificationKind::InferenceDegraded, "Detection is struggling")
                            .with_detail(e.to_string()),
                    )
                    .await;
                }
            }
        }
    }

    fn write_overlay(&self, cmds: &[DrawCommand]) {
        let Some((path, w, h)) = &self.overlay_out else { return; };
        if let Err(e) = overlay::rasterize(cmds, *w, *h).save(path) {
            warn!("frames: overlay write {} failed: {}", path, e);
        }
    }

    async fn notify(&mut self, n: Notification) {
        let _ = self.events.send(SessionEvent::Notify(n)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use mirror_game::GameEvent;
    use mirror_vision::executor::{InferenceExecutor, RawOutput};
    use mirror_vision::overlay::OverlayConfig;
    use mirror_vision::pipeline::PipelineConfig;
    use mirror_vision::postprocess::PostprocessConfig;
    use mirror_vision::preprocess::{Preprocessor, Tensor};
    use mirror_vision::voting::VotingEngine;
    use mirror_vision::{ClassCatalog, PipelineResult};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Sees one big "cat" on every frame and counts calls.
    struct AlwaysCat {
        calls: Arc<Mutex<usize>>,
    }

    impl InferenceExecutor for AlwaysCat {
        fn name(&self) -> &'static str { "always-cat" }
        fn infer(&mut self, _input: &Tensor) -> PipelineResult<RawOutput> {
            *self.calls.lock().unwrap() += 1;
            Ok(RawOutput { data: vec![320.0, 320.0, 200.0, 200.0, 0.9, 0.0], shape: vec![1, 1, 6] })
        }
    }

    fn image_dir() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(32, 24, Rgb([10, 20, 30]))
            .save(dir.path().join("frame.png"))
            .unwrap();
        dir
    }

    fn worker(
        dir: &TempDir,
        threshold: u32,
        max_frames: Option<u64>,
    ) -> (FrameWorker, mpsc::Receiver<SessionEvent>, Arc<Mutex<usize>>) {
        let calls = Arc::new(Mutex::new(0));
        let pipeline = Pipeline::new(
            Preprocessor { input_width: 16, input_height: 16, mirror: false },
            Box::new(AlwaysCat { calls: calls.clone() }),
            ClassCatalog::new(vec!["cat".into(), "dog".into()], []),
            PostprocessConfig::default(),
            OverlayConfig::default(),
            VotingEngine::new(threshold),
            &PipelineConfig::default(),
        );
        let camera = CameraConfig {
            mode: "image-dir".into(),
            device: String::new(),
            dir: dir.path().display().to_string(),
            width: 32,
            height: 24,
        };
        let (tx, rx) = mpsc::channel(16);
        let w = FrameWorker::new(pipeline, camera, Duration::from_millis(1), max_frames, None, tx);
        (w, rx, calls)
    }

    #[tokio::test]
    async fn spawned_worker_waits_for_detection_then_stops_at_max_frames() {
        let dir = image_dir();
        let (w, mut events, calls) = worker(&dir, 100, Some(3));
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let handle = tokio::spawn(w.run(cmd_rx));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(*calls.lock().unwrap(), 0);

        cmd_tx.send(FrameCmd::SetDetecting(true)).await.unwrap();
        let ev = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap();
        assert!(matches!(ev, Some(SessionEvent::FramesDone)));
        assert_eq!(*calls.lock().unwrap(), 3);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn suspend_skips_inference_and_resume_clears_votes() {
        let dir = image_dir();
        let (mut w, _events, calls) = worker(&dir, 100, None);
        w.open_camera().await;
        w.on_cmd(FrameCmd::SetDetecting(true)).await;
        assert!(w.active());

        w.step().await;
        w.step().await;
        assert_eq!(w.pipeline.voting().count("cat"), 2);

        w.on_cmd(FrameCmd::Suspend).await;
        assert!(!w.active());
        w.step().await;
        assert_eq!(*calls.lock().unwrap(), 2);

        w.on_cmd(FrameCmd::Resume).await;
        assert!(w.active());
        assert_eq!(w.pipeline.voting().count("cat"), 0);
        w.step().await;
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn detection_off_makes_worker_idle() {
        let dir = image_dir();
        let (mut w, _events, _) = worker(&dir, 100, None);
        w.open_camera().await;
        w.on_cmd(FrameCmd::SetDetecting(true)).await;
        w.on_cmd(FrameCmd::SetDetecting(false)).await;
        assert!(!w.active());
    }

    #[tokio::test]
    async fn fired_vote_is_posted_as_recognition() {
        let dir = image_dir();
        let (mut w, mut events, _) = worker(&dir, 1, None);
        w.open_camera().await;
        w.on_cmd(FrameCmd::SetDetecting(true)).await;
        w.step().await;
        assert!(events.try_recv().is_err());
        w.step().await;
        match events.try_recv() {
            Ok(SessionEvent::Game(GameEvent::Recognized(name))) => assert_eq!(name, "cat"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_camera_is_reported() {
        let dir = image_dir();
        let (mut w, mut events, _) = worker(&dir, 1, None);
        w.camera.mode = "betamax".into();
        w.open_camera().await;
        assert!(w.source.is_none());
        match events.try_recv() {
            Ok(SessionEvent::Notify(n)) => assert_eq!(n.kind, NotificationKind::CameraError),
            other => panic!("unexpected {:?}", other),
        }
    }
}
