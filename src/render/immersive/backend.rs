//! GPU-style resource API plus a CPU implementation that ray-casts planes.

use std::collections::HashMap;

use glam::{Mat3, Mat4, Vec2, Vec3};
use image::RgbaImage;
use tracing::{debug, trace};

use crate::error::{ViewerError, ViewerResult};
use crate::placement::Pose;
use crate::processing::blend::{Premultiplied, source_over};
use crate::processing::layout::resize_to_cover;
use crate::processing::raster::{Surface, sample_uv};
use crate::processing::shading::unpack_normal;

pub const AMBIENT_INTENSITY: f32 = 0.8;
pub const DIRECTIONAL_INTENSITY: f32 = 1.2;
const LIGHT_SCALE: f32 = 0.5;
const NEAR_PLANE: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeometryId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialId(u32);

/// Flat shapes in their local XY plane, facing +Z.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Geometry {
    /// Centred rectangle.
    Plane { width: f32, height: f32 },
    /// Centred annulus.
    Ring { inner: f32, outer: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Material {
    /// Albedo lit by the scene lights, optionally perturbed by a normal map.
    Lit {
        albedo: TextureId,
        normal: Option<TextureId>,
    },
    /// Flat colour masked by the texture's alpha.
    Silhouette {
        mask: TextureId,
        color: [f32; 3],
        opacity: f32,
    },
    /// Unlit straight-alpha colour.
    Solid { color: [f32; 4] },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCall {
    pub geometry: GeometryId,
    pub material: MaterialId,
    pub model: Mat4,
}

/// Per-frame inputs shared by every draw call.
#[derive(Debug, Clone, Copy)]
pub struct FrameParams<'a> {
    pub camera: Pose,
    pub vertical_fov_deg: f32,
    pub exposure: f32,
    /// Camera passthrough drawn behind the scene, tagged with its sequence number.
    pub background: Option<(u64, &'a RgbaImage)>,
}

/// Resource and draw API the immersive renderer is written against.
pub trait SceneBackend: Send {
    fn viewport(&self) -> (u32, u32);
    fn create_texture(&mut self, image: RgbaImage) -> ViewerResult<TextureId>;
    fn create_geometry(&mut self, geometry: Geometry) -> ViewerResult<GeometryId>;
    fn create_material(&mut self, material: Material) -> ViewerResult<MaterialId>;
    fn release_texture(&mut self, id: TextureId);
    fn release_geometry(&mut self, id: GeometryId);
    fn release_material(&mut self, id: MaterialId);
    /// Render `calls` into the framebuffer, replacing its contents.
    fn draw(&mut self, frame: &FrameParams<'_>, calls: &[DrawCall]) -> ViewerResult<()>;
    /// Copy of the last rendered frame.
    fn read_framebuffer(&self) -> ViewerResult<RgbaImage>;
    /// Textures, geometries and materials not yet released.
    fn live_resources(&self) -> usize;
}

/// Narkowicz ACES filmic fit.
pub fn aces_filmic(x: f32) -> f32 {
    let x = x.max(0.0);
    ((x * (2.51 * x + 0.03)) / (x * (2.43 * x + 0.59) + 0.14)).clamp(0.0, 1.0)
}

pub fn light_direction() -> Vec3 {
    Vec3::new(1.0, 2.0, 1.0).normalize()
}

pub struct SoftwareBackend {
    width: u32,
    height: u32,
    next_id: u32,
    textures: HashMap<TextureId, RgbaImage>,
    geometries: HashMap<GeometryId, Geometry>,
    materials: HashMap<MaterialId, Material>,
    framebuffer: Surface,
    /// Cover-fitted passthrough keyed by frame sequence.
    background: Option<(u64, RgbaImage)>,
}

impl SoftwareBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            next_id: 1,
            textures: HashMap::new(),
            geometries: HashMap::new(),
            materials: HashMap::new(),
            framebuffer: Surface::new(width, height),
            background: None,
        }
    }

    fn allocate(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    fn prepare_background(&mut self, background: Option<(u64, &RgbaImage)>) {
        let Some((sequence, image)) = background else {
            self.framebuffer.clear();
            return;
        };
        let stale = self.background.as_ref().is_none_or(|(seq, _)| *seq != sequence);
        if stale {
            match resize_to_cover(image, self.width, self.height) {
                Ok(covered) => self.background = Some((sequence, covered)),
                Err(err) => {
                    debug!(error = %err, "passthrough frame skipped");
                }
            }
        }
        match &self.background {
            Some((_, covered)) => self.framebuffer.copy_from_image(covered),
            None => self.framebuffer.clear(),
        }
    }
}

/// A draw call with its resources resolved for the rasterizer.
struct PreparedDraw<'a> {
    inverse_model: Mat4,
    normal_matrix: Mat3,
    geometry: Geometry,
    shader: Shader<'a>,
}

enum Shader<'a> {
    Lit {
        albedo: &'a RgbaImage,
        normal: Option<&'a RgbaImage>,
    },
    Silhouette {
        mask: &'a RgbaImage,
        color: [f32; 3],
        opacity: f32,
    },
    Solid([f32; 4]),
}

impl PreparedDraw<'_> {
    /// Ray parameter and premultiplied colour where the ray meets this draw.
    fn intersect(&self, origin: Vec3, dir: Vec3, exposure: f32, light: Vec3) -> Option<(f32, Premultiplied)> {
        let o = self.inverse_model.transform_point3(origin);
        let d = self.inverse_model.transform_vector3(dir);
        if d.z.abs() < 1e-7 {
            return None;
        }
        let t = -o.z / d.z;
        if t < NEAR_PLANE {
            return None;
        }
        let p = o + d * t;
        let uv = match self.geometry {
            Geometry::Plane { width, height } => {
                let u = p.x / width + 0.5;
                let v = 0.5 - p.y / height;
                if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
                    return None;
                }
                Vec2::new(u, v)
            }
            Geometry::Ring { inner, outer } => {
                let r = Vec2::new(p.x, p.y).length();
                if r < inner || r > outer {
                    return None;
                }
                Vec2::ZERO
            }
        };
        let color = self.shade(uv, exposure, light)?;
        Some((t, color))
    }

    fn shade(&self, uv: Vec2, exposure: f32, light: Vec3) -> Option<Premultiplied> {
        match &self.shader {
            Shader::Lit { albedo, normal } => {
                let texel = sample_uv(albedo, uv.x, uv.y);
                let a = texel[3];
                if a <= 0.0 {
                    return None;
                }
                let n_local = match normal {
                    Some(map) => {
                        let x = ((uv.x * map.width() as f32) as u32).min(map.width().saturating_sub(1));
                        let y = ((uv.y * map.height() as f32) as u32).min(map.height().saturating_sub(1));
                        unpack_normal(map.get_pixel(x, y))
                    }
                    None => Vec3::Z,
                };
                let n = (self.normal_matrix * n_local).normalize_or(Vec3::Z);
                let irradiance = AMBIENT_INTENSITY + DIRECTIONAL_INTENSITY * n.dot(light).max(0.0);
                let gain = irradiance * LIGHT_SCALE * exposure;
                Some([
                    aces_filmic(texel[0] / a * gain) * a,
                    aces_filmic(texel[1] / a * gain) * a,
                    aces_filmic(texel[2] / a * gain) * a,
                    a,
                ])
            }
            Shader::Silhouette {
                mask,
                color,
                opacity,
            } => {
                let a = sample_uv(mask, uv.x, uv.y)[3] * opacity;
                (a > 0.0).then_some([color[0] * a, color[1] * a, color[2] * a, a])
            }
            Shader::Solid(color) => {
                let a = color[3];
                (a > 0.0).then_some([color[0] * a, color[1] * a, color[2] * a, a])
            }
        }
    }
}

impl SceneBackend for SoftwareBackend {
    fn viewport(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn create_texture(&mut self, image: RgbaImage) -> ViewerResult<TextureId> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ViewerError::Setup("texture has no pixels".into()));
        }
        let id = TextureId(self.allocate());
        self.textures.insert(id, image);
        Ok(id)
    }

    fn create_geometry(&mut self, geometry: Geometry) -> ViewerResult<GeometryId> {
        let valid = match geometry {
            Geometry::Plane { width, height } => width > 0.0 && height > 0.0,
            Geometry::Ring { inner, outer } => inner >= 0.0 && outer > inner,
        };
        if !valid {
            return Err(ViewerError::Setup(format!("degenerate geometry {geometry:?}")));
        }
        let id = GeometryId(self.allocate());
        self.geometries.insert(id, geometry);
        Ok(id)
    }

    fn create_material(&mut self, material: Material) -> ViewerResult<MaterialId> {
        let referenced = match material {
            Material::Lit { albedo, normal } => {
                self.textures.contains_key(&albedo)
                    && normal.is_none_or(|n| self.textures.contains_key(&n))
            }
            Material::Silhouette { mask, .. } => self.textures.contains_key(&mask),
            Material::Solid { .. } => true,
        };
        if !referenced {
            return Err(ViewerError::Setup("material references a released texture".into()));
        }
        let id = MaterialId(self.allocate());
        self.materials.insert(id, material);
        Ok(id)
    }

    fn release_texture(&mut self, id: TextureId) {
        self.textures.remove(&id);
    }

    fn release_geometry(&mut self, id: GeometryId) {
        self.geometries.remove(&id);
    }

    fn release_material(&mut self, id: MaterialId) {
        self.materials.remove(&id);
    }

    fn draw(&mut self, frame: &FrameParams<'_>, calls: &[DrawCall]) -> ViewerResult<()> {
        self.prepare_background(frame.background);

        let mut prepared = Vec::with_capacity(calls.len());
        for call in calls {
            let (Some(geometry), Some(material)) = (
                self.geometries.get(&call.geometry),
                self.materials.get(&call.material),
            ) else {
                trace!(?call, "skipping draw with released resources");
                continue;
            };
            let det = call.model.determinant();
            if !det.is_finite() || det.abs() < 1e-12 {
                continue;
            }
            let shader = match *material {
                Material::Lit { albedo, normal } => {
                    let Some(albedo) = self.textures.get(&albedo) else {
                        continue;
                    };
                    Shader::Lit {
                        albedo,
                        normal: normal.and_then(|n| self.textures.get(&n)),
                    }
                }
                Material::Silhouette {
                    mask,
                    color,
                    opacity,
                } => {
                    let Some(mask) = self.textures.get(&mask) else {
                        continue;
                    };
                    Shader::Silhouette {
                        mask,
                        color,
                        opacity,
                    }
                }
                Material::Solid { color } => Shader::Solid(color),
            };
            prepared.push(PreparedDraw {
                inverse_model: call.model.inverse(),
                normal_matrix: Mat3::from_mat4(call.model),
                geometry: *geometry,
                shader,
            });
        }

        let (w, h) = (self.width as f32, self.height as f32);
        let aspect = w / h.max(1.0);
        let tan_half = (frame.vertical_fov_deg.to_radians() * 0.5).tan();
        let origin = frame.camera.position;
        let rotation = frame.camera.orientation;
        let light = light_direction();
        let exposure = frame.exposure;

        self.framebuffer.shade(|x, y, background| {
            let ndc_x = (2.0 * (x as f32 + 0.5) / w - 1.0) * aspect * tan_half;
            let ndc_y = (1.0 - 2.0 * (y as f32 + 0.5) / h) * tan_half;
            let dir = (rotation * Vec3::new(ndc_x, ndc_y, -1.0)).normalize();
            let mut hits: Vec<(f32, Premultiplied)> = prepared
                .iter()
                .filter_map(|draw| draw.intersect(origin, dir, exposure, light))
                .collect();
            if hits.is_empty() {
                return background;
            }
            // Far to near.
            hits.sort_by(|a, b| b.0.total_cmp(&a.0));
            hits.into_iter()
                .fold(background, |acc, (_, color)| source_over(acc, color))
        });
        Ok(())
    }

    fn read_framebuffer(&self) -> ViewerResult<RgbaImage> {
        Ok(self.framebuffer.to_rgba_image())
    }

    fn live_resources(&self) -> usize {
        self.textures.len() + self.geometries.len() + self.materials.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;
    use image::Rgba;

    fn frame(camera: Pose) -> FrameParams<'static> {
        FrameParams {
            camera,
            vertical_fov_deg: 70.0,
            exposure: 1.0,
            background: None,
        }
    }

    #[test]
    fn releases_track_live_resources() {
        let mut b = SoftwareBackend::new(8, 8);
        let tex = b.create_texture(RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255]))).unwrap();
        let geo = b.create_geometry(Geometry::Plane { width: 1.0, height: 1.0 }).unwrap();
        let mat = b.create_material(Material::Lit { albedo: tex, normal: None }).unwrap();
        assert_eq!(b.live_resources(), 3);
        b.release_material(mat);
        b.release_geometry(geo);
        b.release_texture(tex);
        b.release_texture(tex);
        assert_eq!(b.live_resources(), 0);
    }

    #[test]
    fn material_requires_live_texture() {
        let mut b = SoftwareBackend::new(8, 8);
        let tex = b.create_texture(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255]))).unwrap();
        b.release_texture(tex);
        assert!(b.create_material(Material::Lit { albedo: tex, normal: None }).is_err());
    }

    #[test]
    fn plane_in_front_covers_centre_only() {
        let mut b = SoftwareBackend::new(32, 32);
        let tex = b.create_texture(RgbaImage::from_pixel(4, 4, Rgba([200, 200, 200, 255]))).unwrap();
        let geo = b.create_geometry(Geometry::Plane { width: 0.5, height: 0.5 }).unwrap();
        let mat = b.create_material(Material::Lit { albedo: tex, normal: None }).unwrap();
        let call = DrawCall {
            geometry: geo,
            material: mat,
            model: Mat4::from_translation(Vec3::new(0.0, 0.0, -2.0)),
        };
        b.draw(&frame(Pose::IDENTITY), &[call]).unwrap();
        let out = b.read_framebuffer().unwrap();
        assert_eq!(out.get_pixel(16, 16)[3], 255);
        assert_eq!(out.get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn nearer_draw_wins() {
        let mut b = SoftwareBackend::new(16, 16);
        let geo = b.create_geometry(Geometry::Plane { width: 1.0, height: 1.0 }).unwrap();
        let red = b.create_material(Material::Solid { color: [1.0, 0.0, 0.0, 1.0] }).unwrap();
        let blue = b.create_material(Material::Solid { color: [0.0, 0.0, 1.0, 1.0] }).unwrap();
        let near = DrawCall {
            geometry: geo,
            material: red,
            model: Mat4::from_translation(Vec3::new(0.0, 0.0, -1.0)),
        };
        let far = DrawCall {
            geometry: geo,
            material: blue,
            model: Mat4::from_translation(Vec3::new(0.0, 0.0, -1.5)),
        };
        b.draw(&frame(Pose::IDENTITY), &[near, far]).unwrap();
        assert_eq!(b.read_framebuffer().unwrap().get_pixel(8, 8).0, [255, 0, 0, 255]);
    }

    #[test]
    fn plane_behind_camera_is_invisible() {
        let mut b = SoftwareBackend::new(8, 8);
        let geo = b.create_geometry(Geometry::Plane { width: 4.0, height: 4.0 }).unwrap();
        let mat = b.create_material(Material::Solid { color: [1.0, 1.0, 1.0, 1.0] }).unwrap();
        let call = DrawCall {
            geometry: geo,
            material: mat,
            model: Mat4::from_translation(Vec3::new(0.0, 0.0, 2.0)),
        };
        let camera = Pose::new(Vec3::ZERO, Quat::IDENTITY);
        b.draw(&frame(camera), &[call]).unwrap();
        assert!(b.read_framebuffer().unwrap().pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn tone_curve_is_monotonic_and_bounded() {
        assert_eq!(aces_filmic(0.0), 0.0);
        assert!(aces_filmic(0.5) < aces_filmic(1.0));
        assert!(aces_filmic(100.0) <= 1.0);
    }
}
