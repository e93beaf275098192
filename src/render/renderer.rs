//! Sample renderer: shades one primary ray against a world.
//!
//! A sample composites, front to back, the surface hit under the volume
//! in front of it under the background. Debug modes replace only the
//! surface color; volumes are integrated and composited in every mode.

use std::sync::Arc;

use prism_accel::{Hit, Ray, INVALID_ID};

use crate::array::{sample_linear, DEFAULT_ATTRIBUTE_VALUE};
use crate::core::{ObjectContext, ObjectImpl, ObjectRef, ParameterTable};
use crate::scene::{Attribute, InstanceData, SurfaceData, VolumeHit, WorldScene};
use crate::util::{accumulate, Box1, DataType, Vec2, Vec3, Vec4, WrapMode};

/// Surface shading mode, selected by the renderer's `mode` parameter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RenderMode {
    #[default]
    Default,
    PrimitiveId,
    ObjectId,
    InstanceId,
    PrimIndex,
    GeomIndex,
    InstIndex,
    Ng,
    NgAbs,
    Uvw,
    HitSurface,
    HitVolume,
    Backface,
    Attribute(Attribute),
    OpacityHeatmap,
}

impl RenderMode {
    pub fn from_name(name: &str) -> Option<Self> {
        let mode = match name {
            "default" => Self::Default,
            "primitiveId" => Self::PrimitiveId,
            "objectId" => Self::ObjectId,
            "instanceId" => Self::InstanceId,
            "primIndex" | "embreePrimID" => Self::PrimIndex,
            "geomIndex" | "embreeGeomID" => Self::GeomIndex,
            "instIndex" | "embreeInstID" => Self::InstIndex,
            "Ng" => Self::Ng,
            "Ng.abs" => Self::NgAbs,
            "uvw" => Self::Uvw,
            "hitSurface" => Self::HitSurface,
            "hitVolume" => Self::HitVolume,
            "backface" => Self::Backface,
            "opacityHeatmap" => Self::OpacityHeatmap,
            other => {
                let attr = other.strip_prefix("geometry.").and_then(Attribute::from_name)?;
                Self::Attribute(attr)
            }
        };
        Some(mode)
    }
}

/// Everything one pixel gets.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelSample {
    pub color: Vec4,
    pub depth: f32,
    pub prim_id: u32,
    pub obj_id: u32,
    pub inst_id: u32,
}

impl PixelSample {
    fn miss(color: Vec4, depth: f32) -> Self {
        Self {
            color,
            depth,
            prim_id: INVALID_ID,
            obj_id: INVALID_ID,
            inst_id: INVALID_ID,
        }
    }
}

/// Distinct, stable color per id.
pub fn random_color(i: u32) -> Vec3 {
    const MX: u32 = 13 * 17 * 43;
    const MY: u32 = 11 * 29;
    const MZ: u32 = 7 * 23 * 63;
    let g = i.wrapping_mul(3 * 5 * 127).wrapping_add(12312314);
    Vec3::new(
        (g % MX) as f32 / (MX - 1) as f32,
        (g % MY) as f32 / (MY - 1) as f32,
        (g % MZ) as f32 / (MZ - 1) as f32,
    )
}

/// Green for true, red for false.
pub fn bool_color(pred: bool) -> Vec3 {
    if pred {
        Vec3::Y
    } else {
        Vec3::X
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Background {
    Color(Vec4),
    /// Array2D sampled at the screen position
    Image(ObjectRef),
}

/// Unlit share of the opacity heatmap, independent of `ambientMix`.
const HEATMAP_MIX: f32 = 0.2;

/// Renderer state captured for one frame.
#[derive(Debug)]
pub(crate) struct RendererData {
    background: Background,
    ambient_radiance: f32,
    /// Weight of the unlit term against the view-facing falloff
    ambient_mix: f32,
    mode: RenderMode,
    heatmap: [Vec4; 4],
    /// Reciprocal of `volumeSamplingRate`, scales the ray-march step
    inv_volume_sampling_rate: f32,
}

impl Default for RendererData {
    fn default() -> Self {
        Self {
            background: Background::Color(Vec4::W),
            ambient_radiance: 1.0,
            ambient_mix: 0.2,
            mode: RenderMode::Default,
            heatmap: [
                Vec4::new(0.0, 0.0, 1.0, 1.0),
                Vec4::new(1.0, 0.0, 0.0, 1.0),
                Vec4::new(1.0, 1.0, 0.0, 1.0),
                Vec4::ONE,
            ],
            inv_volume_sampling_rate: 1.0,
        }
    }
}

impl RendererData {
    pub fn background(&self, screen: Vec2) -> Vec4 {
        match &self.background {
            Background::Color(c) => *c,
            Background::Image(image) => image
                .read()
                .as_array2d()
                .map(|img| img.sample_bilinear(screen, WrapMode::ClampToEdge))
                .unwrap_or(Vec4::W),
        }
    }

    fn lit(&self, c: Vec3, falloff: f32) -> Vec3 {
        self.blend(c, falloff, self.ambient_mix)
    }

    fn blend(&self, c: Vec3, falloff: f32, mix: f32) -> Vec3 {
        let falloff = falloff.clamp(0.0, 1.0);
        ((1.0 - mix) * c * falloff + mix * c) * self.ambient_radiance
    }

    /// Shade one primary ray.
    pub fn render_sample(&self, screen: Vec2, ray: &Ray, world: &WorldScene) -> PixelSample {
        let bg = self.background(screen);

        let hit = world.intersect(ray);
        let t_far = hit.map_or(ray.t_far, |h| h.t);
        let vhit = world.intersect_volumes(ray.org, ray.dir, Box1::new(ray.t_near, t_far));

        let depth = match &vhit {
            Some(v) => t_far.min(v.t.lower),
            None => t_far,
        };

        // A hit whose instance or surface is gone counts as a miss
        let surface_hit = hit.and_then(|h| {
            let inst = world.instances.get(h.inst_id as usize)?;
            let surface = inst.group.surfaces.get(h.geom_id as usize)?;
            Some((h, inst, surface))
        });

        if surface_hit.is_none() && vhit.is_none() {
            return PixelSample::miss(bg, depth);
        }

        let mut sample = PixelSample::miss(bg, depth);
        match (&vhit, &surface_hit) {
            (Some(v), _) => {
                sample.prim_id = 0;
                sample.obj_id = v.volume.id;
                sample.inst_id = world.instances.get(v.instance).map_or(INVALID_ID, |i| i.id);
            }
            (None, Some((h, inst, surface))) => {
                sample.prim_id = surface.geometry.primitive_id(h.prim_id);
                sample.obj_id = surface.id;
                sample.inst_id = inst.id;
            }
            (None, None) => {}
        }

        let bg_rgb = bg.truncate();
        let (geometry_color, geometry_opacity) = match &surface_hit {
            Some((h, inst, surface)) => self.shade_surface(&sample, ray, h, inst, surface, vhit.is_some()),
            None => (bg_rgb, 0.0),
        };

        let mut volume_color = Vec3::ZERO;
        let mut volume_opacity = 0.0f32;
        if let Some(v) = &vhit {
            integrate_volume(v, self.inv_volume_sampling_rate, &mut volume_color, &mut volume_opacity);
        }

        let mut color = volume_color.min(Vec3::ONE);
        let mut opacity = volume_opacity.clamp(0.0, 1.0);
        if surface_hit.is_some() {
            let alpha = opacity;
            accumulate(&mut color, geometry_color.min(Vec3::ONE) * geometry_opacity, alpha);
            accumulate(&mut opacity, geometry_opacity, alpha);
        }
        let alpha = opacity;
        accumulate(&mut color, bg_rgb, alpha);
        accumulate(&mut opacity, bg.w, alpha);

        sample.color = color.extend(opacity);
        sample
    }

    fn shade_surface(
        &self,
        sample: &PixelSample,
        ray: &Ray,
        hit: &Hit,
        inst: &InstanceData,
        surface: &SurfaceData,
        hit_volume: bool,
    ) -> (Vec3, f32) {
        let falloff = (-ray.dir).normalize_or_zero().dot(hit.ng.normalize_or_zero()).abs();
        let color = match self.mode {
            RenderMode::Default => {
                let c = surface.color(hit, &inst.uniforms);
                let o = surface.opacity(hit, &inst.uniforms);
                return (self.lit(c.truncate(), falloff), o);
            }
            RenderMode::PrimitiveId => random_color(sample.prim_id),
            RenderMode::ObjectId => random_color(sample.obj_id),
            RenderMode::InstanceId => random_color(sample.inst_id),
            RenderMode::PrimIndex => random_color(hit.prim_id),
            RenderMode::GeomIndex => random_color(hit.geom_id),
            RenderMode::InstIndex => random_color(hit.inst_id),
            RenderMode::Ng => hit.ng.normalize_or_zero(),
            RenderMode::NgAbs => hit.ng.abs().normalize_or_zero(),
            RenderMode::Uvw => Vec3::new(hit.u, hit.v, 1.0),
            RenderMode::HitSurface => bool_color(true),
            RenderMode::HitVolume => bool_color(hit_volume),
            RenderMode::Backface => bool_color(hit.ng.dot(ray.dir) < 0.0),
            RenderMode::Attribute(attr) => surface
                .geometry
                .attribute(attr, hit)
                .unwrap_or(DEFAULT_ATTRIBUTE_VALUE)
                .truncate(),
            RenderMode::OpacityHeatmap => {
                let o = surface.opacity(hit, &inst.uniforms);
                let c = sample_linear(&self.heatmap, o).truncate();
                self.blend(c, falloff, HEATMAP_MIX)
            }
        };
        (color, 1.0)
    }
}

fn integrate_volume(v: &VolumeHit, inv_sampling_rate: f32, color: &mut Vec3, opacity: &mut f32) {
    v.volume.render(v.org, v.dir, v.t, inv_sampling_rate, color, opacity);
}

/// The `default` renderer object.
#[derive(Debug, Default)]
pub(crate) struct Renderer {
    data: Arc<RendererData>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(&self) -> Arc<RendererData> {
        Arc::clone(&self.data)
    }
}

impl ObjectImpl for Renderer {
    fn commit_parameters(&mut self, params: &ParameterTable, ctx: &ObjectContext<'_>) {
        let defaults = RendererData::default();
        let background = match params.get_object("background", DataType::Array2D) {
            Some(image) => Background::Image(image),
            None => Background::Color(
                params
                    .get::<Vec4>("background")
                    .or_else(|| params.get::<Vec3>("background").map(|c| c.extend(1.0)))
                    .unwrap_or(Vec4::W),
            ),
        };
        let mode_name = params.get_string_or("mode", "default");
        let mode = RenderMode::from_name(&mode_name).unwrap_or_else(|| {
            ctx.warn(format!("unknown renderer mode '{mode_name}', using 'default'"));
            RenderMode::Default
        });

        let sampling_rate: f32 = params.get_or("volumeSamplingRate", 1.0);
        let sampling_rate = if sampling_rate > 0.0 {
            sampling_rate
        } else {
            ctx.warn(format!("volumeSamplingRate must be positive, got {sampling_rate}; using 1"));
            1.0
        };

        self.data = Arc::new(RendererData {
            background,
            ambient_radiance: params.get_or("ambientRadiance", defaults.ambient_radiance),
            ambient_mix: params.get_or("ambientMix", defaults.ambient_mix).clamp(0.0, 1.0),
            mode,
            heatmap: defaults.heatmap,
            inv_volume_sampling_rate: 1.0 / sampling_rate,
        });
    }
}

#[cfg(test)]
impl RendererData {
    pub fn with_mode(mode: RenderMode, background: Vec4) -> Self {
        Self {
            mode,
            background: Background::Color(background),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names() {
        assert_eq!(RenderMode::from_name("default"), Some(RenderMode::Default));
        assert_eq!(RenderMode::from_name("Ng.abs"), Some(RenderMode::NgAbs));
        assert_eq!(
            RenderMode::from_name("geometry.attribute2"),
            Some(RenderMode::Attribute(Attribute::Attribute2))
        );
        assert_eq!(
            RenderMode::from_name("geometry.color"),
            Some(RenderMode::Attribute(Attribute::Color))
        );
        assert_eq!(RenderMode::from_name("geometry.normal"), None);
        assert_eq!(RenderMode::from_name("wireframe"), None);
        assert_eq!(RenderMode::from_name("embreePrimID"), Some(RenderMode::PrimIndex));
        assert_eq!(RenderMode::from_name("embreeGeomID"), Some(RenderMode::GeomIndex));
        assert_eq!(RenderMode::from_name("embreeInstID"), Some(RenderMode::InstIndex));
    }

    #[test]
    fn test_random_color_stable() {
        let a = random_color(0);
        assert_eq!(a, random_color(0));
        assert_ne!(a, random_color(1));
        for i in [0, 1, 7, u32::MAX] {
            let c = random_color(i);
            assert!(c.cmpge(Vec3::ZERO).all() && c.cmple(Vec3::ONE).all());
        }
        // g = 12312314 for id 0
        assert!((a.x - (12312314 % 9503) as f32 / 9502.0).abs() < 1e-6);
    }

    #[test]
    fn test_miss_returns_background() {
        let r = RendererData::with_mode(RenderMode::Default, Vec4::new(0.1, 0.2, 0.3, 1.0));
        let world = WorldScene::empty();
        let ray = Ray::new(Vec3::ZERO, Vec3::NEG_Z);
        let s = r.render_sample(Vec2::splat(0.5), &ray, &world);
        assert_eq!(s.color, Vec4::new(0.1, 0.2, 0.3, 1.0));
        assert_eq!(s.depth, ray.t_far);
        assert_eq!(s.prim_id, INVALID_ID);
        assert_eq!(s.inst_id, INVALID_ID);
    }

    #[test]
    fn test_lit_mix() {
        let r = RendererData::default();
        // Facing the viewer: full color
        assert_eq!(r.lit(Vec3::ONE, 1.0), Vec3::ONE);
        // Grazing: only the unlit share remains
        assert!((r.lit(Vec3::ONE, 0.0).x - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_heatmap_ignores_ambient_mix() {
        let r = RendererData {
            ambient_mix: 0.9,
            ambient_radiance: 2.0,
            ..RendererData::default()
        };
        // Grazing: 0.2 of the color survives regardless of ambientMix
        let c = r.blend(Vec3::ONE, 0.0, HEATMAP_MIX);
        assert!((c.x - 0.4).abs() < 1e-6);
        assert!((r.lit(Vec3::ONE, 0.0).x - 1.8).abs() < 1e-6);
    }

    #[test]
    fn test_volume_sampling_rate_param() {
        let state = crate::core::DeviceState::new(crate::core::DeviceConfig::default()).expect("state");
        let owner = state.create_object(DataType::Renderer, "default", crate::device::ObjectBody::Unknown);
        let ctx = ObjectContext::new(&state, &owner);

        let mut renderer = Renderer::new();
        let mut params = ParameterTable::new();
        params.set("volumeSamplingRate", 4.0f32.into());
        renderer.commit_parameters(&params, &ctx);
        assert_eq!(renderer.data().inv_volume_sampling_rate, 0.25);

        params.set("volumeSamplingRate", 0.0f32.into());
        renderer.commit_parameters(&params, &ctx);
        assert_eq!(renderer.data().inv_volume_sampling_rate, 1.0);
    }
}
