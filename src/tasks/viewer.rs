mod state;

pub use state::{StatusChange, ViewerStatus};

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use image::RgbaImage;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureEntry, CaptureSink, CaptureWriter};
use crate::config::{Configuration, FrameDriver, ViewMode};
use crate::error::{FailureClass, ViewerError, ViewerResult};
use crate::events::{CameraFrame, Captured, OrientationSample, ViewerCommand};
use crate::motion::MotionTracker;
use crate::motion::sensor::{
    OrientationSensor, PermissionState, SensorSubscription, SensorSupport, sensor_from_config,
};
use crate::placement::Controls;
use crate::processing::decompose::{Decomposition, decompose, load_character};
use crate::render::RenderedFrame;
use crate::render::fallback::{FallbackCompositor, TapOutcome};
use crate::render::immersive::backend::SoftwareBackend;
use crate::render::immersive::session::{ImmersiveSession, SimulatedSession};
use crate::render::immersive::{ImmersiveRenderer, ImmersiveTick};
use crate::tasks::camera::{CameraSource, CameraStream, camera_from_config};
use state::StatusMachine;

const ORIENTATION_QUEUE: usize = 64;
const CAMERA_QUEUE: usize = 4;
/// Frame intervals without a camera frame before the interval takes over.
const CAMERA_STALL_INTERVALS: u32 = 2;

/// Opens a new immersive session each time the user starts AR.
pub type SessionFactory = Box<dyn FnMut() -> Box<dyn ImmersiveSession> + Send>;

/// Device capabilities the viewer runs against.
pub struct Platform {
    pub sensor: Box<dyn OrientationSensor>,
    pub camera: Box<dyn CameraSource>,
    pub sessions: SessionFactory,
}

impl Platform {
    pub fn from_config(cfg: &Configuration) -> Self {
        let hit_test = cfg.hit_test_supported;
        let floor = cfg.immersive.floor_height_m;
        Self {
            sensor: sensor_from_config(&cfg.sensor),
            camera: camera_from_config(&cfg.camera),
            sessions: Box::new(move || {
                Box::new(SimulatedSession::new(hit_test, floor)) as Box<dyn ImmersiveSession>
            }),
        }
    }
}

/// Receiving ends of the producer channels the viewer subscribes to.
pub struct ViewerInputs {
    pub orientation: mpsc::Receiver<OrientationSample>,
    pub camera: mpsc::Receiver<CameraFrame>,
}

enum ActiveRenderer {
    Fallback(FallbackCompositor),
    Immersive(Box<ImmersiveRenderer<SoftwareBackend>>),
}

fn build_renderer(
    mode: ViewMode,
    cfg: &Configuration,
    decomposition: &Arc<Decomposition>,
) -> ViewerResult<ActiveRenderer> {
    match mode {
        ViewMode::Immersive => {
            let [w, h] = cfg.immersive.viewport;
            let renderer = ImmersiveRenderer::new(
                SoftwareBackend::new(w, h),
                decomposition,
                cfg.immersive.clone(),
                cfg.placement.clone(),
            )?;
            Ok(ActiveRenderer::Immersive(Box::new(renderer)))
        }
        ViewMode::Camera | ViewMode::Auto => Ok(ActiveRenderer::Fallback(FallbackCompositor::new(
            cfg.fallback.clone(),
            &cfg.placement,
            decomposition.clone(),
        ))),
    }
}

/// Sole owner of the mutable viewer state. Producers feed it through
/// channels; a single loop drains them and renders.
pub struct Viewer {
    cfg: Configuration,
    decomposition: Arc<Decomposition>,
    mode: ViewMode,
    renderer: ActiveRenderer,
    tracker: MotionTracker,
    controls: Controls,
    sensor: Box<dyn OrientationSensor>,
    subscription: Option<SensorSubscription>,
    orientation_tx: mpsc::Sender<OrientationSample>,
    camera: Box<dyn CameraSource>,
    stream: Option<CameraStream>,
    camera_tx: mpsc::Sender<CameraFrame>,
    camera_started: Option<Instant>,
    last_camera_frame: Option<Instant>,
    latest_frame: Option<CameraFrame>,
    sessions: SessionFactory,
    writer: CaptureWriter,
    status: StatusMachine,
    captures: Vec<Captured>,
    frames: u64,
    torn_down: bool,
}

impl Viewer {
    /// Load and decompose the character image, then connect the sensor and
    /// camera. Must be called inside a tokio runtime.
    pub fn start(
        cfg: Configuration,
        platform: Platform,
        sink: CaptureSink,
    ) -> ViewerResult<(Self, ViewerInputs)> {
        let source = load_character(&cfg.character_image)?;
        let decomposition = Arc::new(decompose(source, &cfg.decompose));
        Self::with_decomposition(cfg, decomposition, platform, sink)
    }

    pub fn with_decomposition(
        cfg: Configuration,
        decomposition: Arc<Decomposition>,
        platform: Platform,
        sink: CaptureSink,
    ) -> ViewerResult<(Self, ViewerInputs)> {
        let (orientation_tx, orientation_rx) = mpsc::channel(ORIENTATION_QUEUE);
        let (camera_tx, camera_rx) = mpsc::channel(CAMERA_QUEUE);
        let mode = cfg.resolve_mode();
        let renderer = build_renderer(mode, &cfg, &decomposition)?;
        let Platform {
            sensor,
            camera,
            sessions,
        } = platform;
        info!(
            mode = %mode,
            width = decomposition.width(),
            height = decomposition.height(),
            layers = decomposition.layers.len(),
            center_x = decomposition.center.x,
            center_y = decomposition.center.y,
            "viewer starting"
        );
        let mut viewer = Self {
            tracker: MotionTracker::new(cfg.sensor.smoothing),
            cfg,
            decomposition,
            mode,
            renderer,
            controls: Controls::IDENTITY,
            sensor,
            subscription: None,
            orientation_tx,
            camera,
            stream: None,
            camera_tx,
            camera_started: None,
            last_camera_frame: None,
            latest_frame: None,
            sessions,
            writer: CaptureWriter::new(sink),
            status: StatusMachine::new(Instant::now()),
            captures: Vec::new(),
            frames: 0,
            torn_down: false,
        };
        viewer.connect_sensor();
        viewer.start_camera();
        Ok((
            viewer,
            ViewerInputs {
                orientation: orientation_rx,
                camera: camera_rx,
            },
        ))
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn status(&self) -> ViewerStatus {
        self.status.status()
    }

    /// Nothing more will be drawn.
    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn tracker(&self) -> &MotionTracker {
        &self.tracker
    }

    pub fn controls(&self) -> Controls {
        self.controls
    }

    pub fn decomposition(&self) -> &Arc<Decomposition> {
        &self.decomposition
    }

    pub fn captures(&self) -> &[Captured] {
        &self.captures
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames
    }

    pub fn frame_interval(&self) -> Duration {
        self.cfg.frame_interval
    }

    /// Stores handed to the blocking pool and not yet collected.
    pub fn captures_in_flight(&self) -> usize {
        self.writer.in_flight()
    }

    pub fn gallery_entries(&self) -> ViewerResult<Vec<CaptureEntry>> {
        self.writer.gallery_entries()
    }

    pub fn sensor_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// A camera feed is still producing frames.
    pub fn camera_running(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| !s.is_finished())
    }

    /// Scene resources still held by the immersive backend.
    pub fn live_resources(&self) -> usize {
        match &self.renderer {
            ActiveRenderer::Immersive(r) => r.live_resources(),
            ActiveRenderer::Fallback(_) => 0,
        }
    }

    pub fn immersive(&self) -> Option<&ImmersiveRenderer<SoftwareBackend>> {
        match &self.renderer {
            ActiveRenderer::Immersive(r) => Some(r),
            ActiveRenderer::Fallback(_) => None,
        }
    }

    pub fn fallback(&self) -> Option<&FallbackCompositor> {
        match &self.renderer {
            ActiveRenderer::Fallback(c) => Some(c),
            ActiveRenderer::Immersive(_) => None,
        }
    }

    /// What paces rendering right now. Camera frames drive it only when the
    /// compositor is active and a running camera announces each frame.
    pub fn frame_driver(&self) -> FrameDriver {
        let follows_camera = matches!(self.renderer, ActiveRenderer::Fallback(_))
            && self.camera_running()
            && self.camera.delivers_frame_callbacks();
        match self.cfg.frame_driver {
            FrameDriver::Auto | FrameDriver::VideoFrame if follows_camera => {
                FrameDriver::VideoFrame
            }
            _ => FrameDriver::Animation,
        }
    }

    /// Whether a fixed-interval tick at `now` should draw. Under the
    /// video-frame driver it draws only once the camera has been silent for
    /// a few intervals, so the last frame keeps being composited.
    pub fn interval_tick_due(&self, now: Instant) -> bool {
        if self.frame_driver() != FrameDriver::VideoFrame {
            return true;
        }
        let Some(since) = self.last_camera_frame.or(self.camera_started) else {
            return true;
        };
        now.saturating_duration_since(since) >= self.cfg.frame_interval * CAMERA_STALL_INTERVALS
    }

    fn connect_sensor(&mut self) {
        match self.sensor.query_support() {
            SensorSupport::Unsupported => {
                debug!("orientation sensor unsupported; motion effects stay off");
            }
            SensorSupport::PermissionRequired => {
                self.tracker = MotionTracker::gated(self.cfg.sensor.smoothing);
                info!("orientation sensor waiting for permission");
            }
            SensorSupport::Available => self.subscribe_sensor(),
        }
    }

    fn subscribe_sensor(&mut self) {
        if self.subscription.is_some() {
            return;
        }
        match self.sensor.subscribe(self.orientation_tx.clone()) {
            Ok(sub) => {
                debug!("orientation subscription started");
                self.subscription = Some(sub);
            }
            Err(err) => warn!(error = %err, "orientation subscription failed"),
        }
    }

    fn request_sensor_permission(&mut self) {
        if !self.tracker.is_gated() {
            debug!("orientation permission already settled");
            return;
        }
        match self.sensor.request_permission() {
            PermissionState::Granted => {
                self.tracker.grant_permission();
                self.subscribe_sensor();
            }
            PermissionState::Denied => {
                warn!("orientation permission denied; tap to retry");
            }
            PermissionState::Prompt => debug!("orientation permission prompt dismissed"),
        }
    }

    fn start_camera(&mut self) {
        if self.stream.is_some() {
            return;
        }
        match self.camera.start(self.camera_tx.clone()) {
            Ok(stream) => {
                self.stream = Some(stream);
                self.camera_started = Some(Instant::now());
            }
            Err(err) => self.on_camera_error(err),
        }
    }

    fn on_camera_error(&mut self, err: ViewerError) {
        let camera_mode = matches!(self.renderer, ActiveRenderer::Fallback(_));
        match err.class() {
            FailureClass::PermissionDenied | FailureClass::CapabilityAbsent if camera_mode => {
                warn!(error = %err, "camera unavailable; showing waiting frame");
                if let Some(change) = self.status.on_waiting(Instant::now()) {
                    log_change(change);
                }
            }
            _ if camera_mode => self.fail(err),
            _ => debug!(error = %err, "immersive session continues without camera passthrough"),
        }
    }

    pub fn on_orientation(&mut self, sample: OrientationSample) {
        self.tracker.on_sample(sample);
    }

    pub fn on_camera_frame(&mut self, frame: CameraFrame) {
        self.last_camera_frame = Some(Instant::now());
        self.latest_frame = Some(frame.clone());
        match &mut self.renderer {
            ActiveRenderer::Fallback(c) => c.on_camera_frame(frame),
            ActiveRenderer::Immersive(r) => r.on_camera_frame(frame),
        }
    }

    pub fn on_command(&mut self, cmd: ViewerCommand) {
        if self.is_finished() {
            debug!(?cmd, "viewer finished; command ignored");
            return;
        }
        debug!(?cmd, "viewer command");
        match cmd {
            ViewerCommand::Tap { x, y } => match &mut self.renderer {
                ActiveRenderer::Fallback(c) => match c.tap(x, y, &mut self.tracker) {
                    TapOutcome::Recentered => debug!("heading re-centered"),
                    TapOutcome::Moved(p) => debug!(x = p.x, y = p.y, "anchor moved"),
                },
                ActiveRenderer::Immersive(r) => r.place(),
            },
            ViewerCommand::Place => match &mut self.renderer {
                ActiveRenderer::Fallback(c) => {
                    c.place();
                }
                ActiveRenderer::Immersive(r) => r.place(),
            },
            ViewerCommand::Recenter => {
                let stabilized = self.fallback().is_some_and(FallbackCompositor::stabilize);
                self.tracker.recenter(stabilized);
            }
            ViewerCommand::SetStabilize(on) => match &mut self.renderer {
                ActiveRenderer::Fallback(c) => c.set_stabilize(on, &mut self.tracker),
                ActiveRenderer::Immersive(_) => debug!("stabilize applies to camera mode only"),
            },
            ViewerCommand::SetTransparentBackground(on) => match &mut self.renderer {
                ActiveRenderer::Fallback(c) => c.set_transparent_background(on),
                ActiveRenderer::Immersive(_) => {
                    debug!("transparent capture applies to camera mode only")
                }
            },
            ViewerCommand::SetControls(controls) => self.controls = controls.clamped(),
            ViewerCommand::ResetControls => self.controls = Controls::IDENTITY,
            ViewerCommand::Capture => match &mut self.renderer {
                ActiveRenderer::Fallback(c) => c.request_capture(),
                ActiveRenderer::Immersive(r) => r.request_capture(),
            },
            ViewerCommand::RequestSensorPermission => self.request_sensor_permission(),
            ViewerCommand::SwitchMode(mode) => {
                if let Err(err) = self.switch_mode(mode) {
                    self.fail(err);
                }
            }
            ViewerCommand::StartSession => self.start_session(),
            ViewerCommand::EndSession => match &mut self.renderer {
                ActiveRenderer::Immersive(r) => r.end_session(),
                ActiveRenderer::Fallback(_) => debug!("no immersive session to end"),
            },
        }
    }

    fn start_session(&mut self) {
        let ActiveRenderer::Immersive(renderer) = &mut self.renderer else {
            debug!("immersive session requested outside immersive mode");
            return;
        };
        let session = (self.sessions)();
        if let Err(err) = renderer.start_session(session) {
            self.fail(err);
        }
    }

    fn switch_mode(&mut self, requested: ViewMode) -> ViewerResult<()> {
        let target = match requested {
            ViewMode::Camera => ViewMode::Camera,
            ViewMode::Immersive | ViewMode::Auto if self.cfg.immersive_supported => {
                ViewMode::Immersive
            }
            ViewMode::Immersive => {
                info!("immersive AR unavailable; staying in camera mode");
                ViewMode::Camera
            }
            ViewMode::Auto => ViewMode::Camera,
        };
        if target == self.mode {
            return Ok(());
        }
        if let ActiveRenderer::Immersive(r) = &mut self.renderer {
            r.teardown();
        }
        let mut renderer = build_renderer(target, &self.cfg, &self.decomposition)?;
        if let Some(frame) = self.latest_frame.clone() {
            match &mut renderer {
                ActiveRenderer::Fallback(c) => c.on_camera_frame(frame),
                ActiveRenderer::Immersive(r) => r.on_camera_frame(frame),
            }
        }
        self.renderer = renderer;
        info!(from = %self.mode, to = %target, "view mode switched");
        self.mode = target;
        Ok(())
    }

    /// Draw one frame with the active renderer. `None` when nothing was drawn.
    pub fn tick(&mut self) -> Option<RenderedFrame> {
        self.collect_captures();
        if self.is_finished() {
            return None;
        }
        let mut session_ended = false;
        let result = match &mut self.renderer {
            ActiveRenderer::Fallback(c) => c.render(&self.controls, &self.tracker).map(Some),
            ActiveRenderer::Immersive(r) => match r.tick(&self.controls, &self.tracker) {
                Ok(ImmersiveTick::Drawn(frame)) => Ok(Some(frame)),
                Ok(ImmersiveTick::Idle | ImmersiveTick::Skipped) => Ok(None),
                Ok(ImmersiveTick::SessionEnded) => {
                    session_ended = true;
                    Ok(None)
                }
                Err(err) => Err(err),
            },
        };
        if session_ended {
            self.teardown();
            return None;
        }
        let frame = match result {
            Ok(frame) => frame?,
            Err(err) if err.class() == FailureClass::Transient => {
                warn!(error = %err, "frame skipped");
                return None;
            }
            Err(err) => {
                self.fail(err);
                return None;
            }
        };
        self.frames += 1;
        if let Some(change) = self.status.on_frame(frame.waiting, Instant::now()) {
            log_change(change);
        }
        if let Some(still) = frame.captured.clone() {
            self.writer.submit(still);
        }
        Some(frame)
    }

    /// Record stores that finished since the last call.
    pub fn collect_captures(&mut self) {
        for result in self.writer.try_collect() {
            self.record_capture(result);
        }
    }

    /// Wait for every pending store.
    pub async fn flush_captures(&mut self) {
        for result in self.writer.drain().await {
            self.record_capture(result);
        }
    }

    fn record_capture(&mut self, result: ViewerResult<Captured>) {
        match result {
            Ok(captured) => self.captures.push(captured),
            Err(err) => error!(error = %err, "failed to store capture"),
        }
    }

    fn fail(&mut self, err: ViewerError) {
        error!(error = %err, "viewer stopped");
        if let Some(change) = self.status.on_failed(Instant::now()) {
            log_change(change);
        }
        self.teardown();
    }

    /// Stop scheduling, release the sensor and camera, end the immersive
    /// session and dispose its resources. Idempotent.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        if let Some(change) = self.status.on_closed(Instant::now()) {
            log_change(change);
        }
        if let Some(mut sub) = self.subscription.take() {
            sub.cancel();
        }
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
        if let ActiveRenderer::Immersive(r) = &mut self.renderer {
            r.teardown();
        }
        self.latest_frame = None;
        self.last_camera_frame = None;
        info!(
            frames = self.frames,
            captures = self.captures.len(),
            live_resources = self.live_resources(),
            "viewer torn down"
        );
    }
}

impl Drop for Viewer {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn log_change(change: StatusChange) {
    info!(
        from = ?change.from,
        to = ?change.to,
        after_ms = change.after.as_millis() as u64,
        "viewer status changed"
    );
}

/// Outcome of a headless run.
#[derive(Debug)]
pub struct RunSummary {
    pub frames: u64,
    pub status: ViewerStatus,
    pub captures: Vec<Captured>,
    /// Scene resources left after teardown.
    pub live_resources: usize,
    pub last_frame: Option<RgbaImage>,
}

/// Drive `viewer` without a window until cancelled, the viewer finishes or
/// `frame_limit` frames were drawn.
pub async fn run(
    mut viewer: Viewer,
    inputs: ViewerInputs,
    mut commands: mpsc::Receiver<ViewerCommand>,
    cancel: CancellationToken,
    frame_limit: Option<u64>,
) -> Result<RunSummary> {
    let ViewerInputs {
        mut orientation,
        mut camera,
    } = inputs;
    let mut ticker = tokio::time::interval(viewer.frame_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut commands_open = true;
    let mut last_frame = None;

    loop {
        viewer.collect_captures();
        if viewer.is_finished() {
            break;
        }
        if frame_limit.is_some_and(|limit| viewer.frames_rendered() >= limit) {
            debug!(frames = viewer.frames_rendered(), "frame limit reached");
            break;
        }
        let follow_camera = viewer.frame_driver() == FrameDriver::VideoFrame;
        let drawn = select! {
            _ = cancel.cancelled() => {
                debug!("viewer cancelled");
                break;
            }
            Some(sample) = orientation.recv() => {
                viewer.on_orientation(sample);
                None
            }
            Some(frame) = camera.recv() => {
                viewer.on_camera_frame(frame);
                if follow_camera { viewer.tick() } else { None }
            }
            cmd = commands.recv(), if commands_open => {
                match cmd {
                    Some(cmd) => viewer.on_command(cmd),
                    None => commands_open = false,
                }
                None
            }
            _ = ticker.tick() => {
                if viewer.interval_tick_due(Instant::now()) { viewer.tick() } else { None }
            }
        };
        if let Some(frame) = drawn {
            last_frame = Some(frame.image);
        }
    }

    viewer.flush_captures().await;
    viewer.teardown();
    Ok(RunSummary {
        frames: viewer.frames_rendered(),
        status: viewer.status(),
        captures: viewer.captures().to_vec(),
        live_resources: viewer.live_resources(),
        last_frame,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Gallery;
    use crate::config::DecomposeConfig;
    use crate::motion::sensor::NullSensor;
    use crate::tasks::camera::{DeniedCamera, FileCamera, NoCamera};
    use image::Rgba;

    fn character() -> Arc<Decomposition> {
        let img = RgbaImage::from_pixel(8, 16, Rgba([200, 120, 40, 255]));
        Arc::new(decompose(Arc::new(img), &DecomposeConfig::default()))
    }

    fn config(mode: ViewMode, immersive_supported: bool) -> Configuration {
        let mut cfg = Configuration {
            view_mode: mode,
            immersive_supported,
            frame_interval: Duration::from_millis(5),
            ..Configuration::default()
        };
        cfg.fallback.canvas = [24, 32];
        cfg.immersive.viewport = [24, 32];
        cfg
    }

    fn platform(camera: Box<dyn CameraSource>, session_frames: Option<u64>) -> Platform {
        Platform {
            sensor: Box::new(NullSensor),
            camera,
            sessions: Box::new(move || {
                let session = SimulatedSession::new(false, -1.4);
                let session = match session_frames {
                    Some(n) => session.with_frame_limit(n),
                    None => session,
                };
                Box::new(session) as Box<dyn ImmersiveSession>
            }),
        }
    }

    fn sink(dir: &tempfile::TempDir) -> CaptureSink {
        CaptureSink::gallery_only(Gallery::open(dir.path()).unwrap(), "tok")
    }

    fn camera_frame(seq: u64) -> CameraFrame {
        CameraFrame {
            sequence: seq,
            captured_at: Instant::now(),
            image: Arc::new(RgbaImage::from_pixel(12, 16, Rgba([10, 200, 10, 255]))),
        }
    }

    #[tokio::test]
    async fn denied_camera_waits_with_black_frames() {
        let dir = tempfile::tempdir().unwrap();
        let (mut viewer, _inputs) = Viewer::with_decomposition(
            config(ViewMode::Camera, false),
            character(),
            platform(Box::new(DeniedCamera), None),
            sink(&dir),
        )
        .unwrap();
        assert_eq!(viewer.status(), ViewerStatus::Waiting);
        let frame = viewer.tick().unwrap();
        assert!(frame.waiting);
        assert_eq!(frame.image.get_pixel(5, 5).0, [0, 0, 0, 255]);
        assert!(!viewer.is_finished());
    }

    #[tokio::test]
    async fn capture_lands_in_gallery_once_a_frame_arrives() {
        let dir = tempfile::tempdir().unwrap();
        let (mut viewer, _inputs) = Viewer::with_decomposition(
            config(ViewMode::Camera, false),
            character(),
            platform(Box::new(NoCamera), None),
            sink(&dir),
        )
        .unwrap();
        viewer.on_command(ViewerCommand::Capture);
        assert!(viewer.tick().unwrap().captured.is_none());
        viewer.on_camera_frame(camera_frame(1));
        let frame = viewer.tick().unwrap();
        assert!(frame.captured.is_some());
        assert_eq!(viewer.status(), ViewerStatus::Running);
        assert_eq!(viewer.captures_in_flight(), 1);
        viewer.flush_captures().await;
        assert_eq!(viewer.captures_in_flight(), 0);
        assert_eq!(viewer.captures().len(), 1);
        assert_eq!(viewer.gallery_entries().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn controls_are_clamped_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let (mut viewer, _inputs) = Viewer::with_decomposition(
            config(ViewMode::Camera, false),
            character(),
            platform(Box::new(NoCamera), None),
            sink(&dir),
        )
        .unwrap();
        viewer.on_command(ViewerCommand::SetControls(Controls {
            scale: 9.0,
            rotation: 0.0,
            offset_x: -3.0,
            offset_y: 0.1,
        }));
        assert_eq!(viewer.controls().scale, 1.6);
        assert_eq!(viewer.controls().offset_x, -0.4);
        viewer.on_command(ViewerCommand::ResetControls);
        assert_eq!(viewer.controls(), Controls::IDENTITY);
    }

    #[tokio::test]
    async fn session_end_tears_everything_down() {
        let dir = tempfile::tempdir().unwrap();
        let (mut viewer, _inputs) = Viewer::with_decomposition(
            config(ViewMode::Auto, true),
            character(),
            platform(Box::new(NoCamera), Some(2)),
            sink(&dir),
        )
        .unwrap();
        assert_eq!(viewer.mode(), ViewMode::Immersive);
        assert!(viewer.tick().is_none());
        viewer.on_command(ViewerCommand::StartSession);
        assert!(viewer.live_resources() > 0);
        let mut drawn = 0;
        for _ in 0..5 {
            if viewer.tick().is_some() {
                drawn += 1;
            }
        }
        assert_eq!(drawn, 2);
        assert_eq!(viewer.status(), ViewerStatus::Closed);
        assert_eq!(viewer.live_resources(), 0);
    }

    #[tokio::test]
    async fn switching_to_camera_disposes_immersive_scene() {
        let dir = tempfile::tempdir().unwrap();
        let (mut viewer, _inputs) = Viewer::with_decomposition(
            config(ViewMode::Immersive, true),
            character(),
            platform(Box::new(NoCamera), None),
            sink(&dir),
        )
        .unwrap();
        viewer.on_command(ViewerCommand::StartSession);
        viewer.on_camera_frame(camera_frame(1));
        assert!(viewer.tick().is_some());
        viewer.on_command(ViewerCommand::SwitchMode(ViewMode::Camera));
        assert_eq!(viewer.mode(), ViewMode::Camera);
        assert!(viewer.fallback().unwrap().has_camera_frame());
        let frame = viewer.tick().unwrap();
        assert!(!frame.waiting);
    }

    #[tokio::test]
    async fn immersive_request_without_support_stays_in_camera_mode() {
        let dir = tempfile::tempdir().unwrap();
        let (mut viewer, _inputs) = Viewer::with_decomposition(
            config(ViewMode::Camera, false),
            character(),
            platform(Box::new(NoCamera), None),
            sink(&dir),
        )
        .unwrap();
        viewer.on_command(ViewerCommand::SwitchMode(ViewMode::Immersive));
        assert_eq!(viewer.mode(), ViewMode::Camera);
    }

    #[tokio::test]
    async fn run_stops_at_frame_limit_and_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let (viewer, inputs) = Viewer::with_decomposition(
            config(ViewMode::Camera, false),
            character(),
            platform(Box::new(DeniedCamera), None),
            sink(&dir),
        )
        .unwrap();
        let (_tx, rx) = mpsc::channel(4);
        let summary = run(viewer, inputs, rx, CancellationToken::new(), Some(3))
            .await
            .unwrap();
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.status, ViewerStatus::Closed);
        assert!(summary.last_frame.is_some());
    }

    #[tokio::test]
    async fn silent_camera_hands_pacing_back_to_the_interval() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..2u8 {
            RgbaImage::from_pixel(4, 4, Rgba([i, 0, 0, 255]))
                .save(dir.path().join(format!("{i}.png")))
                .unwrap();
        }
        let camera = FileCamera::new(dir.path().to_path_buf(), 1.0, false);
        let (mut viewer, _inputs) = Viewer::with_decomposition(
            config(ViewMode::Camera, false),
            character(),
            platform(Box::new(camera), None),
            sink(&dir),
        )
        .unwrap();
        assert!(viewer.camera_running());
        assert_eq!(viewer.frame_driver(), FrameDriver::VideoFrame);

        viewer.on_camera_frame(camera_frame(1));
        let now = Instant::now();
        assert!(!viewer.interval_tick_due(now));
        assert!(viewer.interval_tick_due(now + Duration::from_millis(50)));

        viewer.teardown();
        assert!(!viewer.camera_running());
        assert_eq!(viewer.frame_driver(), FrameDriver::Animation);
    }

    #[tokio::test]
    async fn run_returns_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let (viewer, inputs) = Viewer::with_decomposition(
            config(ViewMode::Immersive, true),
            character(),
            platform(Box::new(NoCamera), None),
            sink(&dir),
        )
        .unwrap();
        let (_tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = run(viewer, inputs, rx, cancel, None).await.unwrap();
        assert_eq!(summary.frames, 0);
        assert_eq!(summary.status, ViewerStatus::Closed);
    }
}
