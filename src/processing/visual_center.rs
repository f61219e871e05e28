use image::RgbaImage;

/// Normalized centroid of the opaque part of an image. `(0.5, 0.5)` is the
/// geometric centre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualCenter {
    pub x: f32,
    pub y: f32,
}

impl Default for VisualCenter {
    fn default() -> Self {
        Self { x: 0.5, y: 0.5 }
    }
}

impl VisualCenter {
    /// Offset from the geometric centre in pixels for an image of the given size.
    pub fn pivot_offset(&self, width: f32, height: f32) -> (f32, f32) {
        ((self.x - 0.5) * width, (self.y - 0.5) * height)
    }
}

/// Mean position of pixels whose alpha exceeds `alpha_threshold`, sampled on a
/// `stride` grid. Fully transparent or empty images report the geometric centre.
pub fn visual_center(image: &RgbaImage, alpha_threshold: u8, stride: u32) -> VisualCenter {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return VisualCenter::default();
    }
    let stride = stride.max(1) as usize;
    let mut sum_x = 0f64;
    let mut sum_y = 0f64;
    let mut count = 0u64;
    for y in (0..h).step_by(stride) {
        for x in (0..w).step_by(stride) {
            if image.get_pixel(x, y)[3] > alpha_threshold {
                sum_x += f64::from(x);
                sum_y += f64::from(y);
                count += 1;
            }
        }
    }
    if count == 0 {
        return VisualCenter::default();
    }
    VisualCenter {
        x: (sum_x / count as f64 / f64::from(w)) as f32,
        y: (sum_y / count as f64 / f64::from(h)) as f32,
    }
}
