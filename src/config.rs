use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

/// Which render path the viewer should start in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ViewMode {
    /// Immersive when the platform supports it, camera compositing otherwise.
    #[default]
    Auto,
    Immersive,
    Camera,
}

/// What paces the render loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FrameDriver {
    /// Follow camera frames when the source can announce them, else a fixed interval.
    #[default]
    Auto,
    VideoFrame,
    Animation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CameraPermission {
    #[default]
    Granted,
    Denied,
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ViewMode::Auto => "auto",
            ViewMode::Immersive => "immersive",
            ViewMode::Camera => "camera",
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct CameraConfig {
    /// Still image or directory of frames standing in for the device camera.
    pub source: Option<PathBuf>,
    pub frames_per_second: f32,
    /// Simulated outcome of the camera permission prompt.
    pub permission: CameraPermission,
    /// Restart from the first frame after the last one.
    pub loop_frames: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: None,
            frames_per_second: 30.0,
            permission: CameraPermission::Granted,
            loop_frames: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct SensorConfig {
    /// JSON-lines file of recorded orientation samples.
    pub replay: Option<PathBuf>,
    /// Generate a gentle handheld sway when no replay file is configured.
    pub synthetic: bool,
    /// Seed for the synthetic sway jitter.
    pub synthetic_seed: Option<u64>,
    /// Sensor access is gated behind an explicit user request.
    pub requires_permission: bool,
    /// Low-pass factor applied to every incoming sample.
    pub smoothing: f32,
    #[serde(with = "humantime_serde")]
    pub sample_interval: Duration,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            replay: None,
            synthetic: false,
            synthetic_seed: None,
            requires_permission: false,
            smoothing: 0.15,
            sample_interval: Duration::from_millis(16),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct DecomposeConfig {
    /// Pixels with alpha strictly above this count towards the visual centre.
    pub alpha_threshold: u8,
    /// Grid step used when sampling the visual centre.
    pub sample_stride: u32,
    /// Number of horizontal depth bands.
    pub bands: u32,
}

impl Default for DecomposeConfig {
    fn default() -> Self {
        Self {
            alpha_threshold: 20,
            sample_stride: 4,
            bands: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct PlacementConfig {
    pub default_anchor: [f32; 2],
    pub anchor_min: [f32; 2],
    pub anchor_max: [f32; 2],
    /// Distance in front of the camera used when no surface hit is available.
    pub forward_distance_m: f32,
    pub prefer_surface_hit: bool,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            default_anchor: [0.5, 0.68],
            anchor_min: [0.1, 0.3],
            anchor_max: [0.9, 0.95],
            forward_distance_m: 1.2,
            prefer_surface_hit: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct FallbackConfig {
    /// Canvas size in pixels.
    pub canvas: [u32; 2],
    /// Fraction of the contain-fit used as the base object size.
    pub fit_fraction: f32,
    /// Horizontal field of view used to convert heading changes to screen shift.
    pub field_of_view_deg: f32,
    /// Tilt (degrees) that saturates the tilt-derived effects.
    pub tilt_range_deg: f32,
    /// Parallax displacement in pixels at full tilt, x then y.
    pub parallax_px: [f32; 2],
    /// Parallax multiplier step per depth layer.
    pub layer_depth_step: f32,
    /// Extra rotation in radians at full left/right tilt.
    pub tilt_rotation: f32,
    /// Skew factors at full tilt, x then y.
    pub skew: [f32; 2],
    /// Opacity of the soft-light highlight gradient ends.
    pub highlight_alpha: f32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            canvas: [720, 960],
            fit_fraction: 0.7,
            field_of_view_deg: 60.0,
            tilt_range_deg: 45.0,
            parallax_px: [12.0, 10.0],
            layer_depth_step: 0.6,
            tilt_rotation: 0.08,
            skew: [0.1, 0.06],
            highlight_alpha: 0.12,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ImmersiveConfig {
    pub viewport: [u32; 2],
    pub field_of_view_deg: f32,
    /// Z distance between consecutive layer planes, in metres.
    pub layer_spacing: f32,
    /// Parallax displacement per depth index at full tilt, in metres.
    pub parallax: f32,
    pub tilt_range_deg: f32,
    pub outline_scale: f32,
    pub outline_opacity: f32,
    /// Height of the simulated floor plane relative to the device.
    pub floor_height_m: f32,
}

impl Default for ImmersiveConfig {
    fn default() -> Self {
        Self {
            viewport: [720, 960],
            field_of_view_deg: 70.0,
            layer_spacing: 0.02,
            parallax: 0.015,
            tilt_range_deg: 45.0,
            outline_scale: 1.04,
            outline_opacity: 0.15,
            floor_height_m: -1.4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct CaptureConfig {
    pub gallery_dir: PathBuf,
    pub download_dir: PathBuf,
    /// Suggested file name for downloads.
    pub file_name: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            gallery_dir: PathBuf::from("gallery"),
            download_dir: PathBuf::from("downloads"),
            file_name: "myreal-ar.png".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Generated character image with a transparent background.
    pub character_image: PathBuf,
    /// Token of the generation session the captures belong to.
    pub session_token: String,
    pub view_mode: ViewMode,
    /// Result of the platform capability check for immersive AR.
    pub immersive_supported: bool,
    pub hit_test_supported: bool,
    #[serde(with = "humantime_serde")]
    pub frame_interval: Duration,
    pub frame_driver: FrameDriver,
    /// Open a preview window instead of running headless.
    pub preview: bool,
    pub camera: CameraConfig,
    pub sensor: SensorConfig,
    pub decompose: DecomposeConfig,
    pub placement: PlacementConfig,
    pub fallback: FallbackConfig,
    pub immersive: ImmersiveConfig,
    pub capture: CaptureConfig,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            character_image: PathBuf::new(),
            session_token: String::new(),
            view_mode: ViewMode::Auto,
            immersive_supported: false,
            hit_test_supported: false,
            frame_interval: Duration::from_millis(33),
            frame_driver: FrameDriver::Auto,
            preview: false,
            camera: CameraConfig::default(),
            sensor: SensorConfig::default(),
            decompose: DecomposeConfig::default(),
            placement: PlacementConfig::default(),
            fallback: FallbackConfig::default(),
            immersive: ImmersiveConfig::default(),
            capture: CaptureConfig::default(),
        }
    }
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.character_image.as_os_str().is_empty(),
            "character-image must be set"
        );
        ensure!(
            !self.frame_interval.is_zero(),
            "frame-interval must be greater than zero"
        );
        ensure!(
            self.sensor.smoothing > 0.0 && self.sensor.smoothing <= 1.0,
            "sensor.smoothing must be within (0, 1]"
        );
        ensure!(
            !self.sensor.sample_interval.is_zero(),
            "sensor.sample-interval must be greater than zero"
        );
        ensure!(
            self.camera.frames_per_second > 0.0,
            "camera.frames-per-second must be positive"
        );
        ensure!(self.decompose.bands > 0, "decompose.bands must be at least 1");
        ensure!(
            self.decompose.sample_stride > 0,
            "decompose.sample-stride must be at least 1"
        );
        self.validate_placement()
            .context("invalid placement configuration")?;
        ensure!(
            self.fallback.canvas[0] > 0 && self.fallback.canvas[1] > 0,
            "fallback.canvas dimensions must be positive"
        );
        ensure!(
            self.fallback.field_of_view_deg > 0.0 && self.fallback.tilt_range_deg > 0.0,
            "fallback angles must be positive"
        );
        ensure!(
            self.immersive.viewport[0] > 0 && self.immersive.viewport[1] > 0,
            "immersive.viewport dimensions must be positive"
        );
        ensure!(
            self.immersive.field_of_view_deg > 0.0 && self.immersive.field_of_view_deg < 180.0,
            "immersive.field-of-view-deg must be within (0, 180)"
        );
        ensure!(
            self.immersive.tilt_range_deg > 0.0,
            "immersive.tilt-range-deg must be positive"
        );
        ensure!(
            !self.capture.file_name.trim().is_empty(),
            "capture.file-name must not be empty"
        );
        Ok(self)
    }

    fn validate_placement(&self) -> Result<()> {
        let p = &self.placement;
        for axis in 0..2 {
            ensure!(
                p.anchor_min[axis] <= p.anchor_max[axis],
                "anchor-min must not exceed anchor-max"
            );
            ensure!(
                (0.0..=1.0).contains(&p.anchor_min[axis])
                    && (0.0..=1.0).contains(&p.anchor_max[axis]),
                "anchor bounds must lie within [0, 1]"
            );
        }
        ensure!(
            p.forward_distance_m > 0.0,
            "forward-distance-m must be positive"
        );
        Ok(())
    }

    /// Render path chosen from the requested mode and the capability check.
    pub fn resolve_mode(&self) -> ViewMode {
        match self.view_mode {
            ViewMode::Camera => ViewMode::Camera,
            ViewMode::Immersive | ViewMode::Auto if self.immersive_supported => {
                ViewMode::Immersive
            }
            ViewMode::Immersive | ViewMode::Auto => ViewMode::Camera,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immersive_request_without_support_falls_back() {
        let cfg = Configuration {
            view_mode: ViewMode::Immersive,
            immersive_supported: false,
            ..Configuration::default()
        };
        assert_eq!(cfg.resolve_mode(), ViewMode::Camera);
    }

    #[test]
    fn camera_mode_wins_even_when_immersive_available() {
        let cfg = Configuration {
            view_mode: ViewMode::Camera,
            immersive_supported: true,
            ..Configuration::default()
        };
        assert_eq!(cfg.resolve_mode(), ViewMode::Camera);
    }

    #[test]
    fn auto_prefers_immersive() {
        let cfg = Configuration {
            immersive_supported: true,
            ..Configuration::default()
        };
        assert_eq!(cfg.resolve_mode(), ViewMode::Immersive);
    }
}
