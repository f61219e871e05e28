use anyhow::{Context, Result};
use fast_image_resize as fir;
use image::RgbaImage;

/// Source rectangle `(x, y, w, h)` that, stretched over the whole canvas,
/// fills it without distortion. The longer source axis is cropped
/// symmetrically.
pub fn cover_source_rect(src_w: u32, src_h: u32, canvas_w: u32, canvas_h: u32) -> (f64, f64, f64, f64) {
    let iw = f64::from(src_w.max(1));
    let ih = f64::from(src_h.max(1));
    let cw = f64::from(canvas_w.max(1));
    let ch = f64::from(canvas_h.max(1));
    let source_ratio = iw / ih;
    let canvas_ratio = cw / ch;
    if source_ratio > canvas_ratio {
        let sw = ih * canvas_ratio;
        ((iw - sw) / 2.0, 0.0, sw, ih)
    } else {
        let sh = iw / canvas_ratio;
        (0.0, (ih - sh) / 2.0, iw, sh)
    }
}

/// Scale that fits `src` entirely inside `canvas`.
pub fn contain_scale(canvas_w: u32, canvas_h: u32, src_w: u32, src_h: u32) -> f32 {
    let iw = src_w.max(1) as f32;
    let ih = src_h.max(1) as f32;
    let scale = (canvas_w as f32 / iw).min(canvas_h as f32 / ih).max(0.0);
    if scale.is_finite() { scale } else { 1.0 }
}

/// Crop-and-resize `source` so it covers a `canvas_w` x `canvas_h` canvas.
pub fn resize_to_cover(source: &RgbaImage, canvas_w: u32, canvas_h: u32) -> Result<RgbaImage> {
    if canvas_w == 0 || canvas_h == 0 {
        anyhow::bail!("cover dimensions must be positive");
    }
    if source.width() == 0 || source.height() == 0 {
        anyhow::bail!("cannot cover-fit an empty frame");
    }
    let (sx, sy, sw, sh) = cover_source_rect(source.width(), source.height(), canvas_w, canvas_h);

    let src_view = fir::images::ImageRef::new(
        source.width(),
        source.height(),
        source.as_raw(),
        fir::PixelType::U8x4,
    )
    .context("failed to create source view for cover resize")?;
    let mut dst_image = fir::images::Image::new(canvas_w, canvas_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .crop(sx, sy, sw, sh)
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Bilinear));
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .context("cover resize failed")?;
    RgbaImage::from_raw(canvas_w, canvas_h, dst_image.into_vec())
        .ok_or_else(|| anyhow::anyhow!("failed to construct covered RGBA image"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn wide_source_crops_sides() {
        let (x, y, w, h) = cover_source_rect(1600, 900, 900, 900);
        assert_eq!((x, y, w, h), (350.0, 0.0, 900.0, 900.0));
    }

    #[test]
    fn tall_source_crops_top_and_bottom() {
        let (x, y, w, h) = cover_source_rect(600, 1200, 600, 600);
        assert_eq!((x, y, w, h), (0.0, 300.0, 600.0, 600.0));
    }

    #[test]
    fn contain_picks_limiting_axis() {
        assert_eq!(contain_scale(800, 600, 400, 100), 2.0);
        assert_eq!(contain_scale(800, 600, 100, 400), 1.5);
    }

    #[test]
    fn cover_produces_canvas_sized_frame() {
        let src = RgbaImage::from_fn(64, 32, |x, _| {
            if x < 16 || x >= 48 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });
        let out = resize_to_cover(&src, 20, 20).unwrap();
        assert_eq!(out.dimensions(), (20, 20));
        // The red side bands are cropped away.
        assert_eq!(out.get_pixel(10, 10).0, [0, 0, 255, 255]);
        assert!(out.get_pixel(0, 10)[2] > 200);
    }
}
