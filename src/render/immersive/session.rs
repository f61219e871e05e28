use glam::{EulerRot, Quat, Vec3};
use tracing::{debug, info};

use crate::error::{ViewerError, ViewerResult};
use crate::motion::OrientationState;
use crate::placement::Pose;

/// Handle for a live hit-test subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitTestSource(u32);

/// An immersive AR session as exposed by the platform.
pub trait ImmersiveSession: Send {
    fn supports_hit_test(&self) -> bool;

    fn request_hit_test_source(&mut self) -> ViewerResult<HitTestSource>;

    /// Pose of the viewer for the next frame. `None` when the platform has no
    /// pose for this frame or the session is over.
    fn viewer_pose(&mut self, device: Option<&OrientationState>) -> Option<Pose>;

    /// First surface hit along the viewer's forward ray.
    fn hit_test(&mut self, source: HitTestSource, viewer: &Pose) -> Option<Pose>;

    fn is_ended(&self) -> bool;

    /// End the session; further poses and hits are `None`. Idempotent.
    fn end(&mut self);
}

const MAX_HIT_DISTANCE_M: f32 = 10.0;

/// Session driven by the device orientation, with a flat floor for hit tests.
#[derive(Debug)]
pub struct SimulatedSession {
    hit_test_supported: bool,
    floor_height: f32,
    ended: bool,
    frames_left: Option<u64>,
    next_source: u32,
    active_source: Option<HitTestSource>,
}

impl SimulatedSession {
    pub fn new(hit_test_supported: bool, floor_height: f32) -> Self {
        Self {
            hit_test_supported,
            floor_height,
            ended: false,
            frames_left: None,
            next_source: 1,
            active_source: None,
        }
    }

    /// End on its own after `frames` poses, as if the user left the session.
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frames_left = Some(frames);
        self
    }
}

/// Camera orientation for a phone described by `device`. Heading turns about
/// the vertical axis, forward/back tilt of 90 degrees means held upright.
pub fn device_orientation(device: &OrientationState) -> Quat {
    let yaw = -device.effective_heading().to_radians();
    let pitch = (device.tilt_forward_back - 90.0).clamp(-90.0, 90.0).to_radians();
    let roll = -device.tilt_left_right.to_radians();
    Quat::from_euler(EulerRot::YXZ, yaw, pitch, roll)
}

impl ImmersiveSession for SimulatedSession {
    fn supports_hit_test(&self) -> bool {
        self.hit_test_supported
    }

    fn request_hit_test_source(&mut self) -> ViewerResult<HitTestSource> {
        if !self.hit_test_supported {
            return Err(ViewerError::CapabilityUnavailable("hit-test"));
        }
        if self.ended {
            return Err(ViewerError::Setup("session already ended".into()));
        }
        let source = HitTestSource(self.next_source);
        self.next_source += 1;
        self.active_source = Some(source);
        debug!(?source, "hit-test source created");
        Ok(source)
    }

    fn viewer_pose(&mut self, device: Option<&OrientationState>) -> Option<Pose> {
        if self.ended {
            return None;
        }
        if let Some(left) = self.frames_left.as_mut() {
            if *left == 0 {
                info!("simulated session ended by user");
                self.end();
                return None;
            }
            *left -= 1;
        }
        let orientation = device.map_or(Quat::IDENTITY, device_orientation);
        Some(Pose::new(Vec3::ZERO, orientation))
    }

    fn hit_test(&mut self, source: HitTestSource, viewer: &Pose) -> Option<Pose> {
        if self.ended || self.active_source != Some(source) {
            return None;
        }
        let dir = viewer.forward();
        if dir.y > -0.05 {
            return None;
        }
        let t = (self.floor_height - viewer.position.y) / dir.y;
        if !(0.0..=MAX_HIT_DISTANCE_M).contains(&t) {
            return None;
        }
        Some(Pose::new(viewer.position + dir * t, Quat::IDENTITY))
    }

    fn is_ended(&self) -> bool {
        self.ended
    }

    fn end(&mut self) {
        if !self.ended {
            debug!("immersive session ending");
        }
        self.ended = true;
        self.active_source = None;
    }
}
