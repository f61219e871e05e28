use std::path::Path;
use std::sync::Arc;

use image::RgbaImage;

use crate::config::DecomposeConfig;
use crate::error::{ViewerError, ViewerResult};
use crate::processing::depth_layers::{DepthLayer, slice_depth_bands};
use crate::processing::shading::{ShadingMap, shading_map};
use crate::processing::visual_center::{VisualCenter, visual_center};

/// Everything derived once from the character image and shared by both
/// render paths.
#[derive(Debug, Clone)]
pub struct Decomposition {
    pub source: Arc<RgbaImage>,
    pub center: VisualCenter,
    pub layers: Vec<DepthLayer>,
    pub shading: ShadingMap,
}

impl Decomposition {
    pub fn width(&self) -> u32 {
        self.source.width()
    }

    pub fn height(&self) -> u32 {
        self.source.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.source.dimensions()
    }

    /// Height over width, used for the immersive plane geometry.
    pub fn aspect(&self) -> f32 {
        if self.width() == 0 {
            1.0
        } else {
            self.height() as f32 / self.width() as f32
        }
    }
}

/// Derive the visual centre, depth bands and shading map. Empty images
/// produce the defaults and no layers.
pub fn decompose(source: Arc<RgbaImage>, cfg: &DecomposeConfig) -> Decomposition {
    let center = visual_center(&source, cfg.alpha_threshold, cfg.sample_stride);
    let layers = slice_depth_bands(&source, cfg.bands);
    let shading = shading_map(&source);
    tracing::debug!(
        width = source.width(),
        height = source.height(),
        center_x = center.x,
        center_y = center.y,
        layers = layers.len(),
        mean_luminance = shading.mean_luminance,
        "character decomposed"
    );
    Decomposition {
        source,
        center,
        layers,
        shading,
    }
}

/// Decode the character image from disk.
pub fn load_character(path: &Path) -> ViewerResult<Arc<RgbaImage>> {
    let img = image::open(path)
        .map_err(|e| ViewerError::Setup(format!("failed to load {}: {e}", path.display())))?;
    Ok(Arc::new(img.to_rgba8()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn empty_image_decomposes_to_defaults() {
        let d = decompose(Arc::new(RgbaImage::new(0, 0)), &DecomposeConfig::default());
        assert_eq!(d.center, VisualCenter::default());
        assert!(d.layers.is_empty());
        assert_eq!(d.aspect(), 1.0);
    }

    #[test]
    fn layers_match_configured_bands() {
        let img = Arc::new(RgbaImage::from_pixel(20, 40, Rgba([200, 10, 10, 255])));
        let cfg = DecomposeConfig {
            bands: 4,
            ..DecomposeConfig::default()
        };
        let d = decompose(img, &cfg);
        assert_eq!(d.layers.len(), 4);
        assert_eq!(d.aspect(), 2.0);
    }

    #[test]
    fn missing_file_is_a_setup_failure() {
        let err = load_character(Path::new("/definitely/not/here.png")).unwrap_err();
        assert_eq!(err.class(), crate::error::FailureClass::Unrecoverable);
    }
}
