pub mod fallback;
pub mod immersive;

use image::RgbaImage;

/// Output of one render tick.
#[derive(Debug, Clone)]
pub struct RenderedFrame {
    /// What the preview shows.
    pub image: RgbaImage,
    /// Set on the frame that fulfilled a pending capture.
    pub captured: Option<RgbaImage>,
    /// No camera frame is available yet; `image` is a placeholder.
    pub waiting: bool,
}
