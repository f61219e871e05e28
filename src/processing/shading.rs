use glam::Vec3;
use image::{Rgba, RgbaImage};

/// Approximate surface normals plus the mean brightness of the source.
#[derive(Debug, Clone)]
pub struct ShadingMap {
    /// Same size as the source. Red and green carry the packed normal, blue is
    /// always 255 and alpha is copied from the source.
    pub normals: RgbaImage,
    /// Average of `(r + g + b) / 3` over every pixel, in `[0, 1]`.
    pub mean_luminance: f32,
}

impl ShadingMap {
    /// Exposure that brightens dark characters and tones down bright ones.
    pub fn exposure(&self) -> f32 {
        exposure_for(self.mean_luminance)
    }
}

pub fn exposure_for(mean_luminance: f32) -> f32 {
    (1.1 + (0.6 - mean_luminance)).clamp(0.8, 1.4)
}

pub fn unpack_normal(px: &Rgba<u8>) -> Vec3 {
    let nx = f32::from(px[0]) / 255.0 * 2.0 - 1.0;
    let ny = f32::from(px[1]) / 255.0 * 2.0 - 1.0;
    let nz = f32::from(px[2]) / 255.0;
    Vec3::new(nx, ny, nz).normalize_or(Vec3::Z)
}

/// Sobel gradient of the red channel packed into a normal map. The outermost
/// ring of pixels gets the neutral normal `(128, 128)`.
pub fn shading_map(image: &RgbaImage) -> ShadingMap {
    let (w, h) = image.dimensions();
    let mut normals = RgbaImage::new(w, h);
    if w == 0 || h == 0 {
        return ShadingMap {
            normals,
            mean_luminance: 0.5,
        };
    }

    let red = |x: u32, y: u32| f32::from(image.get_pixel(x, y)[0]) / 255.0;
    let mut luminance_sum = 0f64;

    for (x, y, px) in image.enumerate_pixels() {
        luminance_sum += (f64::from(px[0]) + f64::from(px[1]) + f64::from(px[2])) / (3.0 * 255.0);

        let interior = x > 0 && y > 0 && x + 1 < w && y + 1 < h;
        let (nx, ny) = if interior {
            let dx = (red(x - 1, y - 1) + 2.0 * red(x - 1, y) + red(x - 1, y + 1))
                - (red(x + 1, y - 1) + 2.0 * red(x + 1, y) + red(x + 1, y + 1));
            let dy = (red(x - 1, y - 1) + 2.0 * red(x, y - 1) + red(x + 1, y - 1))
                - (red(x - 1, y + 1) + 2.0 * red(x, y + 1) + red(x + 1, y + 1));
            (pack(0.5 - dx * 0.5), pack(0.5 - dy * 0.5))
        } else {
            (128, 128)
        };
        normals.put_pixel(x, y, Rgba([nx, ny, 255, px[3]]));
    }

    ShadingMap {
        normals,
        mean_luminance: (luminance_sum / (f64::from(w) * f64::from(h))) as f32,
    }
}

fn pack(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0) as u8
}
