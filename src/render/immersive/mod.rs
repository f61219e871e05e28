//! Layered 3D rendering inside an immersive AR session.

pub mod backend;
pub mod scene;
pub mod session;

use image::RgbaImage;
use tracing::{debug, info, warn};

use crate::config::{ImmersiveConfig, PlacementConfig};
use crate::error::{ViewerError, ViewerResult};
use crate::events::CameraFrame;
use crate::motion::MotionTracker;
use crate::placement::{Controls, Pose, SpatialAnchor};
use crate::processing::decompose::Decomposition;
use crate::render::RenderedFrame;

use backend::{FrameParams, SceneBackend};
use scene::{CharacterObject, Reticle};
use session::{HitTestSource, ImmersiveSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Running,
    Ended,
}

#[derive(Debug)]
pub enum ImmersiveTick {
    /// No session yet; nothing drawn.
    Idle,
    Drawn(RenderedFrame),
    /// The platform had no pose for this frame.
    Skipped,
    /// The session ended; the loop must stop.
    SessionEnded,
}

pub struct ImmersiveRenderer<B: SceneBackend> {
    backend: B,
    cfg: ImmersiveConfig,
    placement_cfg: PlacementConfig,
    object: CharacterObject,
    reticle: Option<Reticle>,
    anchor: SpatialAnchor,
    session: Option<Box<dyn ImmersiveSession>>,
    hit_source: Option<HitTestSource>,
    state: SessionState,
    viewer_pose: Pose,
    last_hit: Option<Pose>,
    place_on_next_frame: bool,
    exposure: f32,
    passthrough: Option<CameraFrame>,
    capture_pending: bool,
    disposed: bool,
}

impl<B: SceneBackend> ImmersiveRenderer<B> {
    pub fn new(
        mut backend: B,
        decomposition: &Decomposition,
        cfg: ImmersiveConfig,
        placement_cfg: PlacementConfig,
    ) -> ViewerResult<Self> {
        let object = CharacterObject::build(&mut backend, decomposition, &cfg)?;
        let exposure = decomposition.shading.exposure();
        info!(
            exposure,
            drawables = object.drawables().len(),
            "immersive scene ready"
        );
        Ok(Self {
            backend,
            cfg,
            placement_cfg,
            object,
            reticle: None,
            anchor: SpatialAnchor::new(),
            session: None,
            hit_source: None,
            state: SessionState::NotStarted,
            viewer_pose: Pose::IDENTITY,
            last_hit: None,
            place_on_next_frame: false,
            exposure,
            passthrough: None,
            capture_pending: false,
            disposed: false,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn anchor(&self) -> &SpatialAnchor {
        &self.anchor
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn live_resources(&self) -> usize {
        self.backend.live_resources()
    }

    pub fn exposure(&self) -> f32 {
        self.exposure
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn reticle_visible(&self) -> bool {
        self.reticle.as_ref().is_some_and(Reticle::is_visible)
    }

    /// Begin rendering into `session`. The object is placed on the first frame.
    pub fn start_session(&mut self, mut session: Box<dyn ImmersiveSession>) -> ViewerResult<()> {
        if self.disposed {
            return Err(ViewerError::Setup("immersive scene already disposed".into()));
        }
        if self.state == SessionState::Running {
            return Ok(());
        }
        if session.supports_hit_test() {
            match session.request_hit_test_source() {
                Ok(source) => {
                    if self.reticle.is_none() {
                        self.reticle = Some(Reticle::build(&mut self.backend)?);
                    }
                    self.hit_source = Some(source);
                }
                Err(err) => debug!(error = %err, "continuing without hit-test"),
            }
        }
        self.session = Some(session);
        self.state = SessionState::Running;
        self.place_on_next_frame = true;
        info!(hit_test = self.hit_source.is_some(), "immersive session started");
        Ok(())
    }

    /// Re-anchor the object using the latest viewer pose and surface hit.
    pub fn place(&mut self) {
        if self.state != SessionState::Running {
            self.place_on_next_frame = true;
            return;
        }
        self.anchor.place(
            &self.viewer_pose,
            self.last_hit.as_ref(),
            self.placement_cfg.prefer_surface_hit,
            self.placement_cfg.forward_distance_m,
        );
    }

    pub fn on_camera_frame(&mut self, frame: CameraFrame) {
        self.passthrough = Some(frame);
    }

    pub fn request_capture(&mut self) {
        self.capture_pending = true;
    }

    pub fn capture_pending(&self) -> bool {
        self.capture_pending
    }

    /// Render one frame of the session.
    pub fn tick(&mut self, controls: &Controls, tracker: &MotionTracker) -> ViewerResult<ImmersiveTick> {
        if self.disposed {
            return Ok(ImmersiveTick::SessionEnded);
        }
        match self.state {
            SessionState::NotStarted => return Ok(ImmersiveTick::Idle),
            SessionState::Ended => return Ok(ImmersiveTick::SessionEnded),
            SessionState::Running => {}
        }
        let Some(session) = self.session.as_mut() else {
            self.on_session_end();
            return Ok(ImmersiveTick::SessionEnded);
        };
        if session.is_ended() {
            self.on_session_end();
            return Ok(ImmersiveTick::SessionEnded);
        }

        let device = tracker.is_active().then(|| tracker.state());
        let Some(viewer) = session.viewer_pose(device) else {
            if session.is_ended() {
                self.on_session_end();
                return Ok(ImmersiveTick::SessionEnded);
            }
            return Ok(ImmersiveTick::Skipped);
        };
        let hit = self
            .hit_source
            .and_then(|source| session.hit_test(source, &viewer));
        self.viewer_pose = viewer;
        self.last_hit = hit;
        if let Some(reticle) = self.reticle.as_mut() {
            reticle.update(hit);
        }

        if self.place_on_next_frame {
            self.place_on_next_frame = false;
            self.place();
        }
        if let Some(transform) = self.anchor.apply_frame(controls) {
            self.object.set_transform(transform);
        }
        let per_depth = tracker.normalized_tilt(self.cfg.tilt_range_deg) * self.cfg.parallax;
        self.object.apply_parallax(per_depth);

        let mut calls = self.object.draw_calls();
        if let Some(call) = self.reticle.as_ref().and_then(Reticle::draw_call) {
            calls.push(call);
        }
        let params = FrameParams {
            camera: viewer,
            vertical_fov_deg: self.cfg.field_of_view_deg,
            exposure: self.exposure,
            background: self
                .passthrough
                .as_ref()
                .map(|f| (f.sequence, f.image.as_ref())),
        };
        self.backend.draw(&params, &calls)?;
        let image = self.backend.read_framebuffer()?;
        let captured = self.take_capture(&image);
        Ok(ImmersiveTick::Drawn(RenderedFrame {
            image,
            captured,
            waiting: false,
        }))
    }

    fn take_capture(&mut self, image: &RgbaImage) -> Option<RgbaImage> {
        if !self.capture_pending {
            return None;
        }
        self.capture_pending = false;
        Some(image.clone())
    }

    fn on_session_end(&mut self) {
        if self.state != SessionState::Ended {
            info!("immersive session ended");
        }
        self.state = SessionState::Ended;
        self.hit_source = None;
        self.last_hit = None;
        if let Some(reticle) = self.reticle.as_mut() {
            reticle.update(None);
        }
    }

    /// End the platform session and stop ticking.
    pub fn end_session(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.end();
        }
        self.session = None;
        if self.state != SessionState::NotStarted {
            self.on_session_end();
        }
    }

    /// Release every backend resource. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.object.release(&mut self.backend);
        if let Some(mut reticle) = self.reticle.take() {
            reticle.release(&mut self.backend);
        }
        self.passthrough = None;
        self.disposed = true;
        let leaked = self.backend.live_resources();
        if leaked > 0 {
            warn!(leaked, "scene resources still alive after dispose");
        } else {
            debug!("immersive scene disposed");
        }
    }

    /// End the session, then dispose resources.
    pub fn teardown(&mut self) {
        self.end_session();
        self.dispose();
    }
}
