//! Anchoring the character in the world (immersive path) or on the canvas
//! (camera compositing path), and turning user controls into a per-frame
//! transform.

use glam::{Quat, Vec2, Vec3};

use crate::config::PlacementConfig;
use crate::processing::layout::contain_scale;

pub const SCALE_RANGE: (f32, f32) = (0.6, 1.6);
pub const ROTATION_RANGE: (f32, f32) = (-std::f32::consts::PI, std::f32::consts::PI);
pub const OFFSET_RANGE: (f32, f32) = (-0.4, 0.4);

/// User-adjustable transform applied on top of the anchor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Controls {
    pub scale: f32,
    /// Radians around the vertical axis (immersive) or the screen normal (camera).
    pub rotation: f32,
    /// Lateral offset; metres when immersive, canvas-width fraction otherwise.
    pub offset_x: f32,
    /// Vertical offset; metres when immersive, canvas-height fraction otherwise.
    pub offset_y: f32,
}

impl Controls {
    pub const IDENTITY: Controls = Controls {
        scale: 1.0,
        rotation: 0.0,
        offset_x: 0.0,
        offset_y: 0.0,
    };

    /// Clamp every control into its advertised range. NaN falls back to identity.
    pub fn clamped(self) -> Self {
        fn clamp(v: f32, (lo, hi): (f32, f32), fallback: f32) -> f32 {
            if v.is_nan() { fallback } else { v.clamp(lo, hi) }
        }
        Self {
            scale: clamp(self.scale, SCALE_RANGE, 1.0),
            rotation: clamp(self.rotation, ROTATION_RANGE, 0.0),
            offset_x: clamp(self.offset_x, OFFSET_RANGE, 0.0),
            offset_y: clamp(self.offset_y, OFFSET_RANGE, 0.0),
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for Controls {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Position and orientation in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }

    pub fn forward(&self) -> Vec3 {
        self.orientation * Vec3::NEG_Z
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// World transform of the character group for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTransform {
    pub position: Vec3,
    pub orientation: Quat,
    pub scale: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SpatialPlacement {
    #[default]
    Unplaced,
    Placed {
        anchor_position: Vec3,
        /// Snapshot taken at placement; controls rotate relative to this.
        initial_orientation: Quat,
    },
}

/// World anchor for the immersive path.
#[derive(Debug, Default, Clone)]
pub struct SpatialAnchor {
    state: SpatialPlacement,
}

impl SpatialAnchor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SpatialPlacement {
        self.state
    }

    pub fn is_placed(&self) -> bool {
        matches!(self.state, SpatialPlacement::Placed { .. })
    }

    /// Anchor at the surface hit when one is available and preferred, otherwise
    /// `forward_distance` metres along the camera's horizontal forward. The
    /// object is turned about the vertical axis to face the camera.
    pub fn place(
        &mut self,
        camera: &Pose,
        hit: Option<&Pose>,
        prefer_surface_hit: bool,
        forward_distance: f32,
    ) -> Pose {
        let position = match hit {
            Some(hit) if prefer_surface_hit => hit.position,
            _ => camera.position + flat_forward(camera) * forward_distance,
        };
        let orientation = face_towards(position, camera);
        self.state = SpatialPlacement::Placed {
            anchor_position: position,
            initial_orientation: orientation,
        };
        tracing::debug!(x = position.x, y = position.y, z = position.z, "object anchored");
        Pose::new(position, orientation)
    }

    /// Per-frame transform, or `None` until the object has been placed.
    pub fn apply_frame(&self, controls: &Controls) -> Option<RenderTransform> {
        let SpatialPlacement::Placed {
            anchor_position,
            initial_orientation,
        } = self.state
        else {
            return None;
        };
        let orientation = initial_orientation * Quat::from_rotation_y(controls.rotation);
        let right = orientation * Vec3::X;
        let up = orientation * Vec3::Y;
        Some(RenderTransform {
            position: anchor_position + right * controls.offset_x + up * controls.offset_y,
            orientation,
            scale: controls.scale,
        })
    }
}

/// Camera forward projected onto the horizontal plane. Looking straight down
/// falls back to the device's top edge.
fn flat_forward(camera: &Pose) -> Vec3 {
    let forward = camera.forward();
    let flat = Vec3::new(forward.x, 0.0, forward.z);
    if flat.length_squared() > 1e-6 {
        return flat.normalize();
    }
    let top = camera.orientation * Vec3::Y;
    let flat = Vec3::new(top.x, 0.0, top.z);
    if flat.length_squared() > 1e-6 {
        flat.normalize()
    } else {
        Vec3::NEG_Z
    }
}

/// Yaw-only rotation whose +Z axis points at the camera.
fn face_towards(position: Vec3, camera: &Pose) -> Quat {
    let to_camera = camera.position - position;
    let flat = Vec3::new(to_camera.x, 0.0, to_camera.z);
    let dir = if flat.length_squared() > 1e-6 {
        flat
    } else {
        -flat_forward(camera)
    };
    Quat::from_rotation_y(dir.x.atan2(dir.z))
}

/// Canvas anchor for the camera compositing path, in normalized coordinates.
#[derive(Debug, Clone)]
pub struct ScreenAnchor {
    point: Vec2,
    last_tap: Option<Vec2>,
    default_point: Vec2,
    min: Vec2,
    max: Vec2,
}

impl ScreenAnchor {
    pub fn new(cfg: &PlacementConfig) -> Self {
        let min = Vec2::from(cfg.anchor_min);
        let max = Vec2::from(cfg.anchor_max);
        let default_point = Vec2::from(cfg.default_anchor).clamp(min, max);
        Self {
            point: default_point,
            last_tap: None,
            default_point,
            min,
            max,
        }
    }

    pub fn point(&self) -> Vec2 {
        self.point
    }

    /// Move the anchor to a tapped canvas-relative point, clamped to the
    /// allowed region.
    pub fn tap(&mut self, x: f32, y: f32) -> Vec2 {
        let tapped = Vec2::new(x, y);
        if !tapped.is_finite() {
            return self.point;
        }
        self.last_tap = Some(tapped);
        self.place()
    }

    /// Re-anchor at the last tap, or at the default point when nothing was tapped.
    pub fn place(&mut self) -> Vec2 {
        let target = self.last_tap.unwrap_or(self.default_point);
        self.point = target.clamp(self.min, self.max);
        self.point
    }
}

/// Base on-canvas size: a contain-fit of the image scaled down by `fit_fraction`.
pub fn base_fit_scale(canvas: (u32, u32), image: (u32, u32), fit_fraction: f32) -> f32 {
    if image.0 == 0 || image.1 == 0 {
        return 0.0;
    }
    contain_scale(canvas.0, canvas.1, image.0, image.1) * fit_fraction
}

/// Objects lower on the canvas read as closer and are drawn larger.
pub fn depth_scale(anchor_y: f32) -> f32 {
    (0.8 + anchor_y * 0.6).clamp(0.8, 1.35)
}

/// Placement of the character on the canvas for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenPlacement {
    /// Top-left corner of the drawn image, in pixels.
    pub origin: Vec2,
    /// Drawn width and height, in pixels.
    pub size: Vec2,
    pub rotation: f32,
}

impl ScreenPlacement {
    pub fn center(&self) -> Vec2 {
        self.origin + self.size * 0.5
    }
}

/// Resolve the screen anchor and controls into a drawn rectangle. The
/// character's feet sit on the anchor point; `heading_shift` is a horizontal
/// shift in canvas-width fractions.
pub fn screen_placement(
    anchor: Vec2,
    controls: &Controls,
    canvas: (u32, u32),
    image: (u32, u32),
    fit_fraction: f32,
    heading_shift: f32,
) -> ScreenPlacement {
    let (cw, ch) = (canvas.0 as f32, canvas.1 as f32);
    let anchor_x = (anchor.x + controls.offset_x + heading_shift) * cw;
    let anchor_y = (anchor.y + controls.offset_y) * ch;
    let scale = base_fit_scale(canvas, image, fit_fraction)
        * depth_scale(anchor_y / ch.max(1.0))
        * controls.scale;
    let size = Vec2::new(image.0 as f32 * scale, image.1 as f32 * scale);
    ScreenPlacement {
        origin: Vec2::new(anchor_x - size.x / 2.0, anchor_y - size.y),
        size,
        rotation: controls.rotation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn surface_hit_wins_when_preferred() {
        let mut anchor = SpatialAnchor::new();
        let camera = Pose::IDENTITY;
        let hit = Pose::new(Vec3::new(0.2, -1.4, -2.0), Quat::IDENTITY);
        let pose = anchor.place(&camera, Some(&hit), true, 1.2);
        assert_eq!(pose.position, hit.position);
    }

    #[test]
    fn forward_fallback_ignores_pitch() {
        let mut anchor = SpatialAnchor::new();
        let camera = Pose::new(Vec3::ZERO, Quat::from_rotation_x(-0.6));
        let pose = anchor.place(&camera, None, true, 1.2);
        assert!((pose.position - Vec3::new(0.0, 0.0, -1.2)).length() < 1e-5);
    }

    #[test]
    fn placed_object_faces_camera() {
        let mut anchor = SpatialAnchor::new();
        let camera = Pose::new(Vec3::ZERO, Quat::from_rotation_y(FRAC_PI_2));
        let pose = anchor.place(&camera, None, false, 1.0);
        // Camera looks down -X, so the object sits at -X with +Z pointing back at +X.
        assert!((pose.position - Vec3::new(-1.0, 0.0, 0.0)).length() < 1e-5);
        let facing = pose.orientation * Vec3::Z;
        assert!((facing - Vec3::X).length() < 1e-5);
    }

    #[test]
    fn unplaced_yields_no_transform() {
        assert!(SpatialAnchor::new().apply_frame(&Controls::IDENTITY).is_none());
    }

    #[test]
    fn offsets_follow_rotated_axes() {
        let mut anchor = SpatialAnchor::new();
        let camera = Pose::new(Vec3::ZERO, Quat::from_rotation_y(FRAC_PI_2));
        let placed = anchor.place(&camera, None, false, 1.0);
        let controls = Controls {
            offset_x: 0.4,
            offset_y: 0.2,
            rotation: FRAC_PI_2,
            ..Controls::IDENTITY
        };
        let t = anchor.apply_frame(&controls).expect("placed");
        let rotated = placed.orientation * Quat::from_rotation_y(FRAC_PI_2);
        let expected = placed.position + rotated * Vec3::X * 0.4 + rotated * Vec3::Y * 0.2;
        assert!((t.position - expected).length() < 1e-5, "{:?}", t.position);
        assert!(t.orientation.angle_between(rotated) < 1e-5);
    }

    #[test]
    fn quarter_turn_moves_offset_away_from_camera() {
        let mut anchor = SpatialAnchor::new();
        anchor.place(&Pose::IDENTITY, None, false, 1.2);
        let controls = Controls {
            offset_x: 0.4,
            rotation: FRAC_PI_2,
            ..Controls::IDENTITY
        };
        let t = anchor.apply_frame(&controls).expect("placed");
        assert!((t.position - Vec3::new(0.0, 0.0, -1.6)).length() < 1e-5, "{:?}", t.position);
    }

    #[test]
    fn controls_clamp_into_range() {
        let c = Controls {
            scale: 10.0,
            rotation: f32::NAN,
            offset_x: -4.0,
            offset_y: 0.25,
        }
        .clamped();
        assert_eq!(c.scale, SCALE_RANGE.1);
        assert_eq!(c.rotation, 0.0);
        assert_eq!(c.offset_x, -0.4);
        assert_eq!(c.offset_y, 0.25);
    }

    #[test]
    fn tap_is_clamped_and_remembered() {
        let mut anchor = ScreenAnchor::new(&PlacementConfig::default());
        assert_eq!(anchor.tap(0.0, 1.0), Vec2::new(0.1, 0.95));
        anchor.place();
        assert_eq!(anchor.point(), Vec2::new(0.1, 0.95));
    }

    #[test]
    fn feet_sit_on_the_anchor() {
        let placement = screen_placement(
            Vec2::new(0.5, 0.5),
            &Controls::IDENTITY,
            (800, 600),
            (400, 300),
            0.7,
            0.0,
        );
        let bottom_center = placement.origin + Vec2::new(placement.size.x / 2.0, placement.size.y);
        assert!((bottom_center - Vec2::new(400.0, 300.0)).length() < 1e-3);
        // contain fit 2.0 * 0.7 * depth(0.5)=1.1
        assert!((placement.size.x - 400.0 * 2.0 * 0.7 * 1.1).abs() < 1e-2);
    }

    #[test]
    fn depth_scale_is_bounded() {
        assert_eq!(depth_scale(0.0), 0.8);
        assert_eq!(depth_scale(1.0), 1.35);
    }
}
