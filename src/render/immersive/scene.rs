use std::collections::HashMap;

use glam::{Mat4, Quat, Vec2, Vec3};

use crate::config::ImmersiveConfig;
use crate::error::ViewerResult;
use crate::placement::{Pose, RenderTransform};
use crate::processing::decompose::Decomposition;
use crate::render::immersive::backend::{
    DrawCall, Geometry, GeometryId, Material, MaterialId, SceneBackend, TextureId,
};

const OUTLINE_COLOR: [f32; 3] = [17.0 / 255.0, 17.0 / 255.0, 17.0 / 255.0];
const OUTLINE_DEPTH: f32 = -0.01;
const RETICLE_RADII: (f32, f32) = (0.08, 0.1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawableId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawableKind {
    Outline,
    Layer,
}

#[derive(Debug, Clone)]
pub struct Drawable {
    pub id: DrawableId,
    pub kind: DrawableKind,
    pub geometry: GeometryId,
    pub material: MaterialId,
    pub offset: Vec3,
    pub scale: f32,
}

impl Drawable {
    fn local_matrix(&self) -> Mat4 {
        Mat4::from_translation(self.offset) * Mat4::from_scale(Vec3::splat(self.scale))
    }
}

/// Depth information for a layer drawable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerSlot {
    /// 1 for the farthest band, growing towards the viewer.
    pub depth_index: u32,
    /// Offset before parallax is applied.
    pub base_offset: Vec3,
}

/// The layered character: one plane per depth band and an outline behind them.
#[derive(Debug)]
pub struct CharacterObject {
    drawables: Vec<Drawable>,
    layers: HashMap<DrawableId, LayerSlot>,
    textures: Vec<TextureId>,
    geometries: Vec<GeometryId>,
    transform: RenderTransform,
}

impl CharacterObject {
    /// Upload the decomposition and build the drawables. The plane is 1 m wide
    /// and shifted so the visual centre sits on the local origin.
    pub fn build<B: SceneBackend + ?Sized>(
        backend: &mut B,
        decomposition: &Decomposition,
        cfg: &ImmersiveConfig,
    ) -> ViewerResult<Self> {
        let mut object = Self {
            drawables: Vec::new(),
            layers: HashMap::new(),
            textures: Vec::new(),
            geometries: Vec::new(),
            transform: RenderTransform {
                position: Vec3::new(0.0, 0.0, -1.5),
                orientation: Quat::IDENTITY,
                scale: 1.0,
            },
        };
        if decomposition.layers.is_empty() {
            return Ok(object);
        }
        // Partially built objects must still release what they created.
        if let Err(err) = object.populate(backend, decomposition, cfg) {
            object.release(backend);
            return Err(err);
        }
        Ok(object)
    }

    fn populate<B: SceneBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        decomposition: &Decomposition,
        cfg: &ImmersiveConfig,
    ) -> ViewerResult<()> {
        let width = 1.0;
        let height = decomposition.aspect();
        let center = decomposition.center;
        let shift = Vec2::new(-(center.x - 0.5) * width, -(0.5 - center.y) * height);

        let plane = backend.create_geometry(Geometry::Plane { width, height })?;
        self.geometries.push(plane);

        let normals = backend.create_texture(decomposition.shading.normals.clone())?;
        self.textures.push(normals);

        let silhouette = backend.create_texture((*decomposition.source).clone())?;
        self.textures.push(silhouette);
        let outline_material = backend.create_material(Material::Silhouette {
            mask: silhouette,
            color: OUTLINE_COLOR,
            opacity: cfg.outline_opacity,
        })?;
        self.drawables.push(Drawable {
            id: DrawableId(0),
            kind: DrawableKind::Outline,
            geometry: plane,
            material: outline_material,
            offset: (shift * cfg.outline_scale).extend(OUTLINE_DEPTH),
            scale: cfg.outline_scale,
        });

        for layer in &decomposition.layers {
            let albedo = backend.create_texture(layer.image.clone())?;
            self.textures.push(albedo);
            let material = backend.create_material(Material::Lit {
                albedo,
                normal: Some(normals),
            })?;
            let id = DrawableId(self.drawables.len() as u32);
            let base_offset = shift.extend(layer.depth_index as f32 * cfg.layer_spacing);
            self.drawables.push(Drawable {
                id,
                kind: DrawableKind::Layer,
                geometry: plane,
                material,
                offset: base_offset,
                scale: 1.0,
            });
            self.layers.insert(
                id,
                LayerSlot {
                    depth_index: layer.depth_index + 1,
                    base_offset,
                },
            );
        }
        Ok(())
    }

    pub fn drawables(&self) -> &[Drawable] {
        &self.drawables
    }

    pub fn layer_slot(&self, id: DrawableId) -> Option<&LayerSlot> {
        self.layers.get(&id)
    }

    pub fn transform(&self) -> RenderTransform {
        self.transform
    }

    pub fn set_transform(&mut self, transform: RenderTransform) {
        self.transform = transform;
    }

    /// Shift every layer by `per_depth` times its depth index.
    pub fn apply_parallax(&mut self, per_depth: Vec2) {
        for drawable in &mut self.drawables {
            if let Some(slot) = self.layers.get(&drawable.id) {
                let shift = per_depth * slot.depth_index as f32;
                drawable.offset = slot.base_offset + shift.extend(0.0);
            }
        }
    }

    pub fn draw_calls(&self) -> Vec<DrawCall> {
        let group = Mat4::from_scale_rotation_translation(
            Vec3::splat(self.transform.scale),
            self.transform.orientation,
            self.transform.position,
        );
        self.drawables
            .iter()
            .map(|d| DrawCall {
                geometry: d.geometry,
                material: d.material,
                model: group * d.local_matrix(),
            })
            .collect()
    }

    /// Release every backend resource. Safe to call more than once.
    pub fn release<B: SceneBackend + ?Sized>(&mut self, backend: &mut B) {
        for drawable in self.drawables.drain(..) {
            backend.release_material(drawable.material);
        }
        self.layers.clear();
        for texture in self.textures.drain(..) {
            backend.release_texture(texture);
        }
        for geometry in self.geometries.drain(..) {
            backend.release_geometry(geometry);
        }
    }
}

/// Ring marking the current surface hit.
#[derive(Debug)]
pub struct Reticle {
    geometry: Option<GeometryId>,
    material: Option<MaterialId>,
    pose: Option<Pose>,
}

impl Reticle {
    pub fn build<B: SceneBackend + ?Sized>(backend: &mut B) -> ViewerResult<Self> {
        let geometry = backend.create_geometry(Geometry::Ring {
            inner: RETICLE_RADII.0,
            outer: RETICLE_RADII.1,
        })?;
        let material = match backend.create_material(Material::Solid {
            color: [1.0, 1.0, 1.0, 0.9],
        }) {
            Ok(material) => material,
            Err(err) => {
                backend.release_geometry(geometry);
                return Err(err);
            }
        };
        Ok(Self {
            geometry: Some(geometry),
            material: Some(material),
            pose: None,
        })
    }

    /// Follow the latest hit; hidden when there is none.
    pub fn update(&mut self, hit: Option<Pose>) {
        self.pose = hit;
    }

    pub fn is_visible(&self) -> bool {
        self.pose.is_some() && self.geometry.is_some()
    }

    pub fn draw_call(&self) -> Option<DrawCall> {
        let pose = self.pose?;
        // The ring lies flat on the hit surface.
        let model = Mat4::from_rotation_translation(pose.orientation, pose.position)
            * Mat4::from_rotation_x(-std::f32::consts::FRAC_PI_2);
        Some(DrawCall {
            geometry: self.geometry?,
            material: self.material?,
            model,
        })
    }

    pub fn release<B: SceneBackend + ?Sized>(&mut self, backend: &mut B) {
        if let Some(material) = self.material.take() {
            backend.release_material(material);
        }
        if let Some(geometry) = self.geometry.take() {
            backend.release_geometry(geometry);
        }
        self.pose = None;
    }
}
