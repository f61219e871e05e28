//! Per-pixel blend math on premultiplied `[r, g, b, a]` values in `[0, 1]`.

use glam::Vec2;

pub type Premultiplied = [f32; 4];

pub const TRANSPARENT: Premultiplied = [0.0, 0.0, 0.0, 0.0];

pub fn premultiply(straight: [f32; 4]) -> Premultiplied {
    let a = straight[3];
    [straight[0] * a, straight[1] * a, straight[2] * a, a]
}

pub fn unpremultiply(px: Premultiplied) -> [f32; 4] {
    let a = px[3];
    if a <= f32::EPSILON {
        return TRANSPARENT;
    }
    [
        (px[0] / a).min(1.0),
        (px[1] / a).min(1.0),
        (px[2] / a).min(1.0),
        a,
    ]
}

/// Porter-Duff source-over.
#[inline]
pub fn source_over(dst: Premultiplied, src: Premultiplied) -> Premultiplied {
    let k = 1.0 - src[3];
    [
        src[0] + dst[0] * k,
        src[1] + dst[1] * k,
        src[2] + dst[2] * k,
        src[3] + dst[3] * k,
    ]
}

/// W3C soft-light for one channel.
#[inline]
pub fn soft_light_channel(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base - (1.0 - 2.0 * top) * base * (1.0 - base)
    } else {
        let d = if base <= 0.25 {
            ((16.0 * base - 12.0) * base + 4.0) * base
        } else {
            base.sqrt()
        };
        base + (2.0 * top - 1.0) * (d - base)
    }
}

/// Soft-light a straight-alpha colour onto `dst`. Coverage of `dst` is kept,
/// so transparent pixels stay transparent.
pub fn soft_light_onto(dst: Premultiplied, top: [f32; 4]) -> Premultiplied {
    let a = dst[3];
    if a <= f32::EPSILON || top[3] <= 0.0 {
        return dst;
    }
    let base = unpremultiply(dst);
    let mut out = [0.0; 4];
    for c in 0..3 {
        let blended = soft_light_channel(base[c], top[c]);
        out[c] = (base[c] * (1.0 - top[3]) + blended * top[3]).clamp(0.0, 1.0) * a;
    }
    out[3] = a;
    out
}

/// Two-stop linear gradient in straight alpha.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearGradient {
    pub start: Vec2,
    pub end: Vec2,
    pub from: [f32; 4],
    pub to: [f32; 4],
}

impl LinearGradient {
    pub fn at(&self, p: Vec2) -> [f32; 4] {
        let axis = self.end - self.start;
        let len2 = axis.length_squared();
        let t = if len2 <= f32::EPSILON {
            0.0
        } else {
            ((p - self.start).dot(axis) / len2).clamp(0.0, 1.0)
        };
        let mut out = [0.0; 4];
        for (c, slot) in out.iter_mut().enumerate() {
            *slot = self.from[c] + (self.to[c] - self.from[c]) * t;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_source_replaces_destination() {
        let out = source_over([0.2, 0.2, 0.2, 1.0], [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(out, [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn neutral_grey_soft_light_is_identity() {
        for base in [0.0, 0.1, 0.5, 0.9, 1.0] {
            assert!((soft_light_channel(base, 0.5) - base).abs() < 1e-6);
        }
    }

    #[test]
    fn soft_light_keeps_transparency() {
        let out = soft_light_onto(TRANSPARENT, [1.0, 1.0, 1.0, 0.12]);
        assert_eq!(out, TRANSPARENT);
    }

    #[test]
    fn white_highlight_brightens() {
        let out = soft_light_onto([0.4, 0.4, 0.4, 1.0], [1.0, 1.0, 1.0, 0.12]);
        assert!(out[0] > 0.4);
        assert_eq!(out[3], 1.0);
    }

    #[test]
    fn gradient_clamps_past_ends() {
        let g = LinearGradient {
            start: Vec2::ZERO,
            end: Vec2::new(10.0, 0.0),
            from: [1.0, 1.0, 1.0, 0.12],
            to: [0.0, 0.0, 0.0, 0.12],
        };
        assert_eq!(g.at(Vec2::new(-5.0, 3.0))[0], 1.0);
        assert_eq!(g.at(Vec2::new(50.0, 0.0))[0], 0.0);
        assert!((g.at(Vec2::new(5.0, 0.0))[0] - 0.5).abs() < 1e-6);
    }
}
