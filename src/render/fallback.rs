//! Camera-plus-overlay compositing for platforms without an immersive session.

use std::sync::Arc;

use glam::{Affine2, Mat2, Vec2};
use image::RgbaImage;
use tracing::{debug, warn};

use crate::config::{FallbackConfig, PlacementConfig};
use crate::error::{ViewerError, ViewerResult};
use crate::events::CameraFrame;
use crate::motion::MotionTracker;
use crate::placement::{Controls, ScreenAnchor, ScreenPlacement, screen_placement};
use crate::processing::blend::LinearGradient;
use crate::processing::decompose::Decomposition;
use crate::processing::layout::resize_to_cover;
use crate::processing::raster::Surface;
use crate::render::RenderedFrame;

const WAITING_FILL: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Tilt-derived adjustments for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TiltEffects {
    /// Normalized tilt, `x` = left/right and `y` = forward/back.
    pub tilt: Vec2,
    pub rotation: f32,
    /// Horizontal then vertical skew factor.
    pub skew: Vec2,
    /// Parallax in pixels for a depth factor of one.
    pub parallax: Vec2,
    /// Horizontal shift in canvas-width fractions keeping the object world-locked.
    pub heading_shift: f32,
}

impl TiltEffects {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Effects for the current tracker state. Inactive trackers and stabilize
/// mode yield exactly zero.
pub fn tilt_effects(cfg: &FallbackConfig, tracker: &MotionTracker, stabilize: bool) -> TiltEffects {
    if stabilize || !tracker.is_active() {
        return TiltEffects::default();
    }
    let tilt = tracker.normalized_tilt(cfg.tilt_range_deg);
    TiltEffects {
        tilt,
        rotation: tilt.x * cfg.tilt_rotation,
        skew: Vec2::new(tilt.x * cfg.skew[0], tilt.y * cfg.skew[1]),
        parallax: Vec2::new(tilt.x * cfg.parallax_px[0], tilt.y * cfg.parallax_px[1]),
        heading_shift: -tracker.effective_heading() / cfg.field_of_view_deg,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TapOutcome {
    Recentered,
    Moved(Vec2),
}

/// Latest camera frame plus its cover-fitted copy for the current canvas.
#[derive(Debug, Default)]
struct CameraBackground {
    latest: Option<CameraFrame>,
    covered: Option<CoveredFrame>,
}

#[derive(Debug)]
struct CoveredFrame {
    sequence: u64,
    size: (u32, u32),
    image: RgbaImage,
}

impl CameraBackground {
    fn push(&mut self, frame: CameraFrame) {
        self.latest = Some(frame);
    }

    /// Cover-fitted frame for `size`, resampled only when the frame or size changed.
    fn covered(&mut self, size: (u32, u32)) -> ViewerResult<Option<&RgbaImage>> {
        let Some(latest) = self.latest.as_ref() else {
            return Ok(None);
        };
        let fresh = self
            .covered
            .as_ref()
            .is_some_and(|c| c.sequence == latest.sequence && c.size == size);
        if !fresh {
            let image = resize_to_cover(&latest.image, size.0, size.1)
                .map_err(|e| ViewerError::TransientFrame(format!("camera cover-fit: {e:#}")))?;
            self.covered = Some(CoveredFrame {
                sequence: latest.sequence,
                size,
                image,
            });
        }
        Ok(self.covered.as_ref().map(|c| &c.image))
    }
}

pub struct FallbackCompositor {
    cfg: FallbackConfig,
    decomposition: Arc<Decomposition>,
    anchor: ScreenAnchor,
    background: CameraBackground,
    stabilize: bool,
    transparent_background: bool,
    capture_pending: bool,
    canvas: Surface,
    object: Surface,
}

impl FallbackCompositor {
    pub fn new(cfg: FallbackConfig, placement: &PlacementConfig, decomposition: Arc<Decomposition>) -> Self {
        let [w, h] = cfg.canvas;
        Self {
            anchor: ScreenAnchor::new(placement),
            cfg,
            decomposition,
            background: CameraBackground::default(),
            stabilize: false,
            transparent_background: false,
            capture_pending: false,
            canvas: Surface::new(w, h),
            object: Surface::new(w, h),
        }
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        self.canvas.dimensions()
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.canvas.resize(width, height);
        self.object.resize(width, height);
    }

    pub fn anchor(&self) -> &ScreenAnchor {
        &self.anchor
    }

    pub fn stabilize(&self) -> bool {
        self.stabilize
    }

    pub fn capture_pending(&self) -> bool {
        self.capture_pending
    }

    pub fn has_camera_frame(&self) -> bool {
        self.background.latest.is_some()
    }

    pub fn on_camera_frame(&mut self, frame: CameraFrame) {
        self.background.push(frame);
    }

    /// With an active tracker a tap re-centres the heading; otherwise it moves
    /// the anchor.
    pub fn tap(&mut self, x: f32, y: f32, tracker: &mut MotionTracker) -> TapOutcome {
        if tracker.is_active() && !self.stabilize {
            tracker.recenter(false);
            TapOutcome::Recentered
        } else {
            TapOutcome::Moved(self.anchor.tap(x, y))
        }
    }

    pub fn place(&mut self) -> Vec2 {
        self.anchor.place()
    }

    /// Stabilize freezes the current pose as the reference and zeroes tilt effects.
    pub fn set_stabilize(&mut self, on: bool, tracker: &mut MotionTracker) {
        if on == self.stabilize {
            return;
        }
        self.stabilize = on;
        if on {
            tracker.recenter(true);
        } else {
            tracker.clear_tilt_reference();
        }
        debug!(stabilize = on, "stabilize toggled");
    }

    pub fn set_transparent_background(&mut self, on: bool) {
        self.transparent_background = on;
    }

    pub fn request_capture(&mut self) {
        self.capture_pending = true;
    }

    /// Draw one frame. Without a camera frame the canvas is black, the object
    /// is not drawn and a pending capture keeps waiting.
    pub fn render(&mut self, controls: &Controls, tracker: &MotionTracker) -> ViewerResult<RenderedFrame> {
        let size = self.canvas.dimensions();
        if !self.has_camera_frame() {
            self.canvas.fill(WAITING_FILL);
            return Ok(RenderedFrame {
                image: self.canvas.to_rgba_image(),
                captured: None,
                waiting: true,
            });
        }

        if self.capture_pending && self.transparent_background {
            self.canvas.clear();
        } else if let Some(image) = self.background.covered(size)? {
            self.canvas.copy_from_image(image);
        }

        let effects = tilt_effects(&self.cfg, tracker, self.stabilize);
        self.draw_object(controls, &effects);
        self.canvas.composite(&self.object);

        let image = self.canvas.to_rgba_image();
        let captured = if self.capture_pending {
            self.capture_pending = false;
            Some(image.clone())
        } else {
            None
        };
        Ok(RenderedFrame {
            image,
            captured,
            waiting: false,
        })
    }

    fn draw_object(&mut self, controls: &Controls, effects: &TiltEffects) {
        self.object.clear();
        let decomposition = self.decomposition.clone();
        let image_size = decomposition.dimensions();
        if decomposition.layers.is_empty() || image_size.0 == 0 || image_size.1 == 0 {
            return;
        }
        let placement = screen_placement(
            self.anchor.point(),
            controls,
            self.canvas.dimensions(),
            image_size,
            self.cfg.fit_fraction,
            effects.heading_shift,
        );
        if placement.size.x <= 0.0 || placement.size.y <= 0.0 {
            warn!(?placement, "object collapsed to zero size");
            return;
        }
        let frame = ObjectFrame::new(&placement, &decomposition, effects);

        for layer in &decomposition.layers {
            let depth = (layer.depth_index + 1) as f32 * self.cfg.layer_depth_step;
            let shift = effects.parallax * depth;
            let image_to_canvas = Affine2::from_translation(shift) * frame.local_to_canvas
                * Affine2::from_translation(frame.draw_origin)
                * Affine2::from_scale(frame.texel_scale);
            self.object.draw_image(&layer.image, image_to_canvas, 1.0);
        }

        let a = self.cfg.highlight_alpha;
        let gradient = LinearGradient {
            start: frame.draw_origin,
            end: frame.draw_origin + placement.size,
            from: [1.0, 1.0, 1.0, a],
            to: [0.0, 0.0, 0.0, a],
        };
        self.object
            .soft_light_gradient(&gradient, frame.local_to_canvas, frame.draw_origin, placement.size);
    }
}

/// Pivot-centred frame the layers are drawn in.
struct ObjectFrame {
    /// Translate to the pivot, rotate, then skew.
    local_to_canvas: Affine2,
    /// Top-left of the drawn image relative to the pivot.
    draw_origin: Vec2,
    /// Canvas pixels per source texel.
    texel_scale: Vec2,
}

impl ObjectFrame {
    fn new(placement: &ScreenPlacement, decomposition: &Decomposition, effects: &TiltEffects) -> Self {
        let size = placement.size;
        let (px, py) = decomposition.center.pivot_offset(size.x, size.y);
        let pivot = Vec2::new(px, py);
        let skew = Mat2::from_cols(Vec2::new(1.0, effects.skew.y), Vec2::new(effects.skew.x, 1.0));
        let local_to_canvas = Affine2::from_translation(placement.center() + pivot)
            * Affine2::from_angle(placement.rotation + effects.rotation)
            * Affine2::from_mat2(skew);
        let (iw, ih) = decomposition.dimensions();
        Self {
            local_to_canvas,
            draw_origin: -size * 0.5 - pivot,
            texel_scale: Vec2::new(size.x / iw as f32, size.y / ih as f32),
        }
    }
}
