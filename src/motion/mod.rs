//! Smoothed device orientation with a re-centerable heading reference.

pub mod sensor;

use glam::Vec2;
use tracing::{debug, info};

use crate::events::OrientationSample;

/// Wrap any angle into `[0, 360)`.
pub fn wrap_degrees(deg: f32) -> f32 {
    let w = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs.
    if w >= 360.0 { 0.0 } else { w }
}

/// Wrap an angle difference into `[-180, 180]`.
pub fn wrap_delta(deg: f32) -> f32 {
    let w = wrap_degrees(deg);
    if w > 180.0 { w - 360.0 } else { w }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackerPhase {
    Uninitialized,
    Active,
}

/// Smoothed orientation plus the reference it is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OrientationState {
    pub heading: f32,
    pub tilt_forward_back: f32,
    pub tilt_left_right: f32,
    pub reference_heading: f32,
    pub reference_tilt_forward_back: f32,
    pub reference_tilt_left_right: f32,
}

impl OrientationState {
    /// Heading relative to the reference, in `[-180, 180]`.
    pub fn effective_heading(&self) -> f32 {
        wrap_delta(self.heading - self.reference_heading)
    }

    /// Tilt relative to the reference, `x` = left/right and `y` = forward/back.
    pub fn effective_tilt(&self) -> Vec2 {
        Vec2::new(
            self.tilt_left_right - self.reference_tilt_left_right,
            self.tilt_forward_back - self.reference_tilt_forward_back,
        )
    }
}

/// Low-pass filter over orientation samples. Owned by the viewer and handed
/// to whichever renderer is active.
#[derive(Debug, Clone)]
pub struct MotionTracker {
    phase: TrackerPhase,
    smoothing: f32,
    state: OrientationState,
    /// Samples are dropped until permission is granted.
    gated: bool,
    /// Activate on the next sample even if it reads all zeros.
    armed: bool,
}

impl MotionTracker {
    pub fn new(smoothing: f32) -> Self {
        Self {
            phase: TrackerPhase::Uninitialized,
            smoothing: smoothing.clamp(f32::EPSILON, 1.0),
            state: OrientationState::default(),
            gated: false,
            armed: false,
        }
    }

    /// A tracker that ignores samples until [`MotionTracker::grant_permission`].
    pub fn gated(smoothing: f32) -> Self {
        Self {
            gated: true,
            ..Self::new(smoothing)
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase == TrackerPhase::Active
    }

    pub fn is_gated(&self) -> bool {
        self.gated
    }

    pub fn state(&self) -> &OrientationState {
        &self.state
    }

    pub fn grant_permission(&mut self) {
        self.gated = false;
        self.armed = true;
        debug!("orientation permission granted");
    }

    /// Feed one raw sample. Returns `true` when the state changed.
    pub fn on_sample(&mut self, sample: OrientationSample) -> bool {
        if self.gated {
            return false;
        }
        match self.phase {
            TrackerPhase::Uninitialized => {
                if sample.is_zero() && !self.armed {
                    return false;
                }
                let heading = wrap_degrees(sample.heading);
                self.state = OrientationState {
                    heading,
                    tilt_forward_back: sample.tilt_forward_back,
                    tilt_left_right: sample.tilt_left_right,
                    reference_heading: heading,
                    ..OrientationState::default()
                };
                self.phase = TrackerPhase::Active;
                info!(heading, "orientation tracking active");
                true
            }
            TrackerPhase::Active => {
                let k = self.smoothing;
                let s = &mut self.state;
                let delta = wrap_delta(sample.heading - s.heading);
                s.heading = wrap_degrees(s.heading + delta * k);
                s.tilt_forward_back += (sample.tilt_forward_back - s.tilt_forward_back) * k;
                s.tilt_left_right += (sample.tilt_left_right - s.tilt_left_right) * k;
                true
            }
        }
    }

    /// Make the current heading the new zero. With `capture_tilt` the current
    /// tilt becomes the tilt reference as well.
    pub fn recenter(&mut self, capture_tilt: bool) {
        if !self.is_active() {
            return;
        }
        let s = &mut self.state;
        s.reference_heading = s.heading;
        if capture_tilt {
            s.reference_tilt_forward_back = s.tilt_forward_back;
            s.reference_tilt_left_right = s.tilt_left_right;
        }
        debug!(
            heading = s.heading,
            capture_tilt, "orientation reference re-centered"
        );
    }

    /// Drop any captured tilt reference.
    pub fn clear_tilt_reference(&mut self) {
        self.state.reference_tilt_forward_back = 0.0;
        self.state.reference_tilt_left_right = 0.0;
    }

    /// Effective heading, or exactly zero while inactive.
    pub fn effective_heading(&self) -> f32 {
        if self.is_active() {
            self.state.effective_heading()
        } else {
            0.0
        }
    }

    /// Effective tilt normalized by `range_deg` and clamped to `[-1, 1]`.
    /// Exactly zero while inactive.
    pub fn normalized_tilt(&self, range_deg: f32) -> Vec2 {
        if !self.is_active() || range_deg <= 0.0 {
            return Vec2::ZERO;
        }
        (self.state.effective_tilt() / range_deg).clamp(Vec2::NEG_ONE, Vec2::ONE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn circular_distance(a: f32, b: f32) -> f32 {
        wrap_delta(a - b).abs()
    }

    #[test]
    fn wraps_into_range() {
        assert_eq!(wrap_degrees(370.0), 10.0);
        assert_eq!(wrap_degrees(-10.0), 350.0);
        assert_eq!(wrap_delta(350.0), -10.0);
        assert_eq!(wrap_delta(-190.0), 170.0);
    }

    #[test]
    fn zero_samples_do_not_activate() {
        let mut t = MotionTracker::new(0.15);
        assert!(!t.on_sample(OrientationSample::default()));
        assert!(!t.is_active());
        assert_eq!(t.normalized_tilt(45.0), Vec2::ZERO);
    }

    #[test]
    fn granted_permission_activates_on_next_sample() {
        let mut t = MotionTracker::gated(0.15);
        assert!(!t.on_sample(OrientationSample::new(10.0, 5.0, 5.0)));
        t.grant_permission();
        assert!(t.on_sample(OrientationSample::default()));
        assert!(t.is_active());
    }

    #[test]
    fn heading_moves_forward_through_wrap() {
        let mut t = MotionTracker::new(0.15);
        let mut previous = None;
        for h in [350.0, 355.0, 5.0] {
            t.on_sample(OrientationSample::new(h, 0.0, 0.0));
            let now = t.state().heading;
            if let Some(prev) = previous {
                assert!(wrap_delta(now - prev) > 0.0, "{prev} -> {now}");
            }
            previous = Some(now);
        }
        assert!(t.state().heading > 350.0);
    }

    #[test]
    fn smoothing_step_is_bounded() {
        let mut t = MotionTracker::new(0.15);
        t.on_sample(OrientationSample::new(1.0, 0.0, 0.0));
        let limit = 360.0 * 0.15;
        for raw in [181.0, 359.0, 0.5, 179.9, 90.0, 270.0, 1.0] {
            let before = t.state().heading;
            t.on_sample(OrientationSample::new(raw, 0.0, 0.0));
            assert!(circular_distance(t.state().heading, before) <= limit + 1e-3);
        }
    }

    #[test]
    fn recenter_zeroes_effective_heading() {
        let mut t = MotionTracker::new(1.0);
        t.on_sample(OrientationSample::new(10.0, 0.0, 0.0));
        t.on_sample(OrientationSample::new(40.0, 0.0, 0.0));
        assert!((t.effective_heading() - 30.0).abs() < 1e-4);
        t.recenter(false);
        assert_eq!(t.effective_heading(), 0.0);
    }

    #[test]
    fn tilt_reference_only_when_captured() {
        let mut t = MotionTracker::new(1.0);
        t.on_sample(OrientationSample::new(0.0, 20.0, -9.0));
        t.recenter(false);
        assert!((t.normalized_tilt(45.0).x - (-0.2)).abs() < 1e-6);
        t.recenter(true);
        assert_eq!(t.normalized_tilt(45.0), Vec2::ZERO);
        t.clear_tilt_reference();
        assert!((t.normalized_tilt(45.0).y - 20.0 / 45.0).abs() < 1e-6);
    }
}
