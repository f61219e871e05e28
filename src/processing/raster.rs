//! A premultiplied floating point canvas with affine image drawing.

use glam::{Affine2, Vec2};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::processing::blend::{
    LinearGradient, Premultiplied, TRANSPARENT, premultiply, soft_light_onto, source_over,
    unpremultiply,
};

#[derive(Debug, Clone)]
pub struct Surface {
    width: u32,
    height: u32,
    data: Vec<Premultiplied>,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![TRANSPARENT; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if (width, height) != self.dimensions() {
            *self = Self::new(width, height);
        }
    }

    pub fn clear(&mut self) {
        self.data.fill(TRANSPARENT);
    }

    /// Fill with a straight-alpha colour.
    pub fn fill(&mut self, color: [f32; 4]) {
        self.data.fill(premultiply(color));
    }

    /// Replace the contents with a same-sized image.
    pub fn copy_from_image(&mut self, image: &RgbaImage) {
        if image.dimensions() != self.dimensions() {
            tracing::warn!(
                surface = ?self.dimensions(),
                image = ?image.dimensions(),
                "background size mismatch; clearing"
            );
            self.clear();
            return;
        }
        self.data
            .par_iter_mut()
            .zip(image.as_raw().par_chunks_exact(4))
            .for_each(|(dst, px)| *dst = premultiply(to_unit(px)));
    }

    /// Source-over composite `other` on top of this surface.
    pub fn composite(&mut self, other: &Surface) {
        if other.dimensions() != self.dimensions() {
            return;
        }
        self.data
            .par_iter_mut()
            .zip(other.data.par_iter())
            .for_each(|(dst, src)| {
                if src[3] > 0.0 {
                    *dst = source_over(*dst, *src);
                }
            });
    }

    /// Draw `image` through `image_to_canvas`, which maps image pixel
    /// coordinates to canvas pixel coordinates. Uses inverse mapping with
    /// bilinear sampling.
    pub fn draw_image(&mut self, image: &RgbaImage, image_to_canvas: Affine2, opacity: f32) {
        let (iw, ih) = image.dimensions();
        if iw == 0 || ih == 0 || opacity <= 0.0 {
            return;
        }
        let det = image_to_canvas.matrix2.determinant();
        if !det.is_finite() || det.abs() < 1e-8 {
            return;
        }
        let inverse = image_to_canvas.inverse();
        let Some((x0, y0, x1, y1)) = self.bounds_of(image_to_canvas, iw as f32, ih as f32) else {
            return;
        };
        let width = self.width as usize;
        self.data
            .par_chunks_mut(width)
            .enumerate()
            .skip(y0)
            .take(y1 - y0)
            .for_each(|(y, row)| {
                for (x, dst) in row.iter_mut().enumerate().take(x1).skip(x0) {
                    let p = inverse.transform_point2(Vec2::new(x as f32 + 0.5, y as f32 + 0.5));
                    let src = sample_bilinear(image, p.x - 0.5, p.y - 0.5);
                    if src[3] <= 0.0 {
                        continue;
                    }
                    let src = [
                        src[0] * opacity,
                        src[1] * opacity,
                        src[2] * opacity,
                        src[3] * opacity,
                    ];
                    *dst = source_over(*dst, src);
                }
            });
    }

    /// Soft-light `gradient` over the covered pixels inside a `w` x `h`
    /// rectangle. `local_to_canvas` maps the gradient's space to the canvas;
    /// the rectangle spans `origin..origin + size` in that space.
    pub fn soft_light_gradient(
        &mut self,
        gradient: &LinearGradient,
        local_to_canvas: Affine2,
        origin: Vec2,
        size: Vec2,
    ) {
        let det = local_to_canvas.matrix2.determinant();
        if !det.is_finite() || det.abs() < 1e-8 {
            return;
        }
        let rect_to_canvas = local_to_canvas * Affine2::from_translation(origin);
        let Some((x0, y0, x1, y1)) = self.bounds_of(rect_to_canvas, size.x, size.y) else {
            return;
        };
        let inverse = local_to_canvas.inverse();
        let width = self.width as usize;
        self.data
            .par_chunks_mut(width)
            .enumerate()
            .skip(y0)
            .take(y1 - y0)
            .for_each(|(y, row)| {
                for (x, dst) in row.iter_mut().enumerate().take(x1).skip(x0) {
                    if dst[3] <= 0.0 {
                        continue;
                    }
                    let p = inverse.transform_point2(Vec2::new(x as f32 + 0.5, y as f32 + 0.5));
                    let rel = p - origin;
                    if rel.x < 0.0 || rel.y < 0.0 || rel.x > size.x || rel.y > size.y {
                        continue;
                    }
                    *dst = soft_light_onto(*dst, gradient.at(p));
                }
            });
    }

    /// Replace every pixel with `shade(x, y, current)`, one row per task.
    pub fn shade<F>(&mut self, shade: F)
    where
        F: Fn(u32, u32, Premultiplied) -> Premultiplied + Sync + Send,
    {
        if self.width == 0 {
            return;
        }
        let width = self.width as usize;
        self.data
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, px) in row.iter_mut().enumerate() {
                    *px = shade(x as u32, y as u32, *px);
                }
            });
    }

    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.width, self.height);
        let buf: &mut [u8] = &mut out;
        buf.par_chunks_exact_mut(4)
            .zip(self.data.par_iter())
            .for_each(|(dst, px)| {
                let straight = unpremultiply(*px);
                for c in 0..4 {
                    dst[c] = (straight[c].clamp(0.0, 1.0) * 255.0).round() as u8;
                }
            });
        out
    }

    /// Pixel-aligned bounding box of a transformed `w` x `h` rectangle,
    /// clipped to the surface. Returns `None` when nothing is visible.
    fn bounds_of(&self, transform: Affine2, w: f32, h: f32) -> Option<(usize, usize, usize, usize)> {
        let corners = [
            transform.transform_point2(Vec2::ZERO),
            transform.transform_point2(Vec2::new(w, 0.0)),
            transform.transform_point2(Vec2::new(0.0, h)),
            transform.transform_point2(Vec2::new(w, h)),
        ];
        let min = corners.iter().fold(Vec2::splat(f32::INFINITY), |m, c| m.min(*c));
        let max = corners
            .iter()
            .fold(Vec2::splat(f32::NEG_INFINITY), |m, c| m.max(*c));
        if !min.is_finite() || !max.is_finite() {
            return None;
        }
        let x0 = min.x.floor().max(0.0) as usize;
        let y0 = min.y.floor().max(0.0) as usize;
        let x1 = (max.x.ceil().max(0.0) as usize).min(self.width as usize);
        let y1 = (max.y.ceil().max(0.0) as usize).min(self.height as usize);
        (x0 < x1 && y0 < y1).then_some((x0, y0, x1, y1))
    }
}

#[inline]
fn to_unit(px: &[u8]) -> [f32; 4] {
    [
        f32::from(px[0]) / 255.0,
        f32::from(px[1]) / 255.0,
        f32::from(px[2]) / 255.0,
        f32::from(px[3]) / 255.0,
    ]
}

/// Bilinear sample at continuous texel coordinates (texel centres on
/// integers), premultiplied. Transparent outside the image.
pub fn sample_bilinear(image: &RgbaImage, x: f32, y: f32) -> Premultiplied {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 || x < -0.5 || y < -0.5 || x > w as f32 - 0.5 || y > h as f32 - 0.5 {
        return TRANSPARENT;
    }
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let fetch = |px: &Rgba<u8>| premultiply(to_unit(&px.0));
    let c00 = fetch(image.get_pixel(x0, y0));
    let c10 = fetch(image.get_pixel(x1, y0));
    let c01 = fetch(image.get_pixel(x0, y1));
    let c11 = fetch(image.get_pixel(x1, y1));

    let mut out = [0.0; 4];
    for c in 0..4 {
        let top = c00[c] * (1.0 - fx) + c10[c] * fx;
        let bottom = c01[c] * (1.0 - fx) + c11[c] * fx;
        out[c] = top * (1.0 - fy) + bottom * fy;
    }
    out
}

/// Sample an image at normalized `(u, v)`, where `(0, 0)` is the top-left
/// corner and `(1, 1)` the bottom-right.
pub fn sample_uv(image: &RgbaImage, u: f32, v: f32) -> Premultiplied {
    if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
        return TRANSPARENT;
    }
    sample_bilinear(
        image,
        u * image.width() as f32 - 0.5,
        v * image.height() as f32 - 0.5,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_draw_copies_pixels() {
        let img = RgbaImage::from_fn(4, 4, |x, y| Rgba([x as u8 * 60, y as u8 * 60, 0, 255]));
        let mut s = Surface::new(4, 4);
        s.draw_image(&img, Affine2::IDENTITY, 1.0);
        assert_eq!(s.to_rgba_image(), img);
    }

    #[test]
    fn translated_draw_leaves_rest_untouched() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255]));
        let mut s = Surface::new(6, 6);
        s.draw_image(&img, Affine2::from_translation(Vec2::new(3.0, 3.0)), 1.0);
        let out = s.to_rgba_image();
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(out.get_pixel(3, 3).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(4, 4).0, [255, 0, 0, 255]);
    }

    #[test]
    fn degenerate_transform_draws_nothing() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255]));
        let mut s = Surface::new(4, 4);
        s.draw_image(&img, Affine2::from_scale(Vec2::ZERO), 1.0);
        assert!(s.to_rgba_image().pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn composite_respects_transparency() {
        let mut base = Surface::new(2, 1);
        base.fill([0.0, 0.0, 1.0, 1.0]);
        let mut top = Surface::new(2, 1);
        top.draw_image(
            &RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 255])),
            Affine2::IDENTITY,
            1.0,
        );
        base.composite(&top);
        let out = base.to_rgba_image();
        assert_eq!(out.get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert_eq!(out.get_pixel(1, 0).0, [0, 0, 255, 255]);
    }

    #[test]
    fn uv_outside_is_transparent() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255]));
        assert_eq!(sample_uv(&img, 1.2, 0.5), TRANSPARENT);
        assert!(sample_uv(&img, 0.5, 0.5)[3] > 0.99);
    }
}
