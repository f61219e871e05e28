use std::sync::Arc;
use std::time::Instant;

use image::RgbaImage;
use serde::Deserialize;

use crate::placement::Controls;

/// One reading from the device orientation sensor, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct OrientationSample {
    /// Compass heading, 0..360 with wraparound.
    pub heading: f32,
    /// Forward/back tilt, -180..180.
    pub tilt_forward_back: f32,
    /// Left/right tilt, -90..90.
    pub tilt_left_right: f32,
}

impl OrientationSample {
    pub fn new(heading: f32, tilt_forward_back: f32, tilt_left_right: f32) -> Self {
        Self {
            heading,
            tilt_forward_back,
            tilt_left_right,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.heading == 0.0 && self.tilt_forward_back == 0.0 && self.tilt_left_right == 0.0
    }
}

/// A decoded camera frame.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    /// Monotonic per-stream counter; a new value means new pixels.
    pub sequence: u64,
    pub captured_at: Instant,
    pub image: Arc<RgbaImage>,
}

/// User input forwarded to the viewer.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerCommand {
    /// Pointer down at canvas-relative coordinates.
    Tap { x: f32, y: f32 },
    /// Explicit "place in front of me" request.
    Place,
    Recenter,
    SetStabilize(bool),
    SetTransparentBackground(bool),
    SetControls(Controls),
    ResetControls,
    Capture,
    RequestSensorPermission,
    /// Switch between immersive and camera compositing.
    SwitchMode(crate::config::ViewMode),
    /// Start the immersive session (the "start AR" button).
    StartSession,
    EndSession,
}

/// Emitted after a capture was stored in the gallery.
#[derive(Debug, Clone)]
pub struct Captured {
    pub id: u64,
    pub download: Option<std::path::PathBuf>,
}
