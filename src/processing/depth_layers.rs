use std::ops::Range;

use image::{Rgba, RgbaImage};

/// One horizontal band of the character image.
#[derive(Debug, Clone)]
pub struct DepthLayer {
    /// Full-size image, transparent outside `rows`.
    pub image: RgbaImage,
    /// Position in the stack; 0 is the top band and the farthest layer.
    pub depth_index: u32,
    pub rows: Range<u32>,
}

impl DepthLayer {
    /// Parallax multiplier; nearer layers move more.
    pub fn parallax_factor(&self) -> f32 {
        (self.depth_index + 1) as f32
    }
}

/// Row range covered by band `index` of `bands` over `height` rows.
pub fn band_rows(index: u32, bands: u32, height: u32) -> Range<u32> {
    let bands = u64::from(bands.max(1));
    let h = u64::from(height);
    let start = u64::from(index) * h / bands;
    let end = (u64::from(index) + 1) * h / bands;
    start as u32..end as u32
}

/// Split `image` into `bands` full-size copies, each keeping only its own
/// horizontal band. The union of all bands reproduces the input.
pub fn slice_depth_bands(image: &RgbaImage, bands: u32) -> Vec<DepthLayer> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return Vec::new();
    }
    (0..bands.max(1))
        .map(|index| {
            let rows = band_rows(index, bands, h);
            let mut layer = RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 0]));
            let stride = w as usize * 4;
            let from = rows.start as usize * stride;
            let to = rows.end as usize * stride;
            let buf: &mut [u8] = &mut layer;
            buf[from..to].copy_from_slice(&image.as_raw()[from..to]);
            DepthLayer {
                image: layer,
                depth_index: index,
                rows,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_partition_rows() {
        let h = 10;
        let mut covered = vec![0; h as usize];
        for i in 0..3 {
            for r in band_rows(i, 3, h) {
                covered[r as usize] += 1;
            }
        }
        assert!(covered.iter().all(|&c| c == 1));
    }

    #[test]
    fn union_reproduces_source() {
        let img = RgbaImage::from_fn(7, 11, |x, y| Rgba([x as u8 * 30, y as u8 * 20, 90, 200]));
        let layers = slice_depth_bands(&img, 3);
        assert_eq!(layers.len(), 3);
        for (x, y, px) in img.enumerate_pixels() {
            let owners: Vec<_> = layers
                .iter()
                .filter(|l| l.image.get_pixel(x, y)[3] != 0)
                .collect();
            assert_eq!(owners.len(), 1);
            assert_eq!(owners[0].image.get_pixel(x, y), px);
        }
    }

    #[test]
    fn nearer_layers_have_larger_parallax() {
        let img = RgbaImage::from_pixel(4, 6, Rgba([1, 2, 3, 255]));
        let layers = slice_depth_bands(&img, 3);
        assert!(layers[2].parallax_factor() > layers[0].parallax_factor());
        assert_eq!(layers[0].rows, 0..2);
    }
}
