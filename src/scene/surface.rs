//! Surface - a geometry paired with a material.

use std::sync::Arc;

use prism_accel::Hit;

use super::material::Input;
use super::{Attribute, GeometryData, MaterialData, SamplerData};
use crate::array::DEFAULT_ATTRIBUTE_VALUE;
use crate::core::{ObjectContext, ObjectImpl, ObserverRef, ParameterTable};
use crate::util::{DataType, Vec4};

/// Per-instance attribute overrides, indexed by [`Attribute::index`].
pub(crate) type UniformAttributes = [Option<Vec4>; 5];

/// Render-time view of one surface.
#[derive(Debug, Clone)]
pub(crate) struct SurfaceData {
    pub id: u32,
    pub geometry: Arc<GeometryData>,
    pub material: Option<Arc<MaterialData>>,
    invalid_color: Vec4,
}

impl SurfaceData {
    fn lookup(&self, attr: Attribute, hit: &Hit, uniforms: &UniformAttributes) -> Vec4 {
        uniforms[attr.index()]
            .or_else(|| self.geometry.attribute(attr, hit))
            .unwrap_or(DEFAULT_ATTRIBUTE_VALUE)
    }

    fn sample(&self, sampler: &SamplerData, hit: &Hit, uniforms: &UniformAttributes) -> Vec4 {
        sampler.sample(
            |attr| self.lookup(attr, hit, uniforms),
            self.geometry.primitive_id(hit.prim_id),
        )
    }

    /// Base color: instance override, then geometry attribute, then the
    /// material constant. Samplers read attributes the same way.
    pub fn color(&self, hit: &Hit, uniforms: &UniformAttributes) -> Vec4 {
        let Some(material) = &self.material else {
            return self.invalid_color;
        };
        match &material.color {
            Input::Constant(c) => *c,
            Input::Attribute(attr) => self.lookup(*attr, hit, uniforms),
            Input::Sampler(sampler) => self.sample(sampler, hit, uniforms),
        }
    }

    /// Coverage after the material's alpha mode.
    pub fn opacity(&self, hit: &Hit, uniforms: &UniformAttributes) -> f32 {
        let Some(material) = &self.material else {
            return 1.0;
        };
        let opacity = match &material.opacity {
            Input::Constant(o) => *o,
            Input::Attribute(attr) => self.lookup(*attr, hit, uniforms).x,
            Input::Sampler(sampler) => self.sample(sampler, hit, uniforms).x,
        };
        let alpha = (self.color(hit, uniforms).w * opacity).clamp(0.0, 1.0);
        material.adjusted_alpha(alpha)
    }
}

#[derive(Debug)]
pub(crate) struct Surface {
    geometry: Option<ObserverRef>,
    material: Option<ObserverRef>,
    id: u32,
    allow_invalid_material: bool,
    invalid_color: Vec4,
}

impl Surface {
    pub fn new() -> Self {
        Self {
            geometry: None,
            material: None,
            id: u32::MAX,
            allow_invalid_material: true,
            invalid_color: Vec4::new(1.0, 0.0, 1.0, 1.0),
        }
    }

    /// Current geometry and material state; `None` if not renderable.
    pub fn snapshot(&self) -> Option<SurfaceData> {
        let geometry = self.geometry.as_ref()?.read().as_geometry()?.data()?;
        let material = self
            .material
            .as_ref()
            .and_then(|m| m.read().as_material().map(|m| m.data()));
        if material.is_none() && !self.allow_invalid_material {
            return None;
        }
        Some(SurfaceData {
            id: self.id,
            geometry,
            material,
            invalid_color: self.invalid_color,
        })
    }
}

impl ObjectImpl for Surface {
    fn commit_parameters(&mut self, params: &ParameterTable, ctx: &ObjectContext<'_>) {
        self.geometry = params
            .get_object("geometry", DataType::Geometry)
            .map(|g| ctx.observe(g));
        self.material = params
            .get_object("material", DataType::Material)
            .map(|m| ctx.observe(m));
        self.id = params.get_or("id", u32::MAX);
        self.allow_invalid_material = ctx.state.config.allow_invalid_surface_materials;
        self.invalid_color = Vec4::from_array(ctx.state.config.invalid_material_color);

        if self.material.is_none() {
            ctx.warn("missing 'material' on surface");
        }
        if self.geometry.is_none() {
            ctx.warn("missing 'geometry' on surface");
        }
    }

    fn is_valid(&self) -> bool {
        let geometry_ok = self.geometry.as_ref().is_some_and(|g| g.is_valid());
        let material_ok = self.material.as_ref().is_some_and(|m| m.is_valid());
        geometry_ok && (material_ok || self.allow_invalid_material)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::material::AlphaMode;
    use prism_accel::TriangleMesh;

    fn surface_data(material: Option<MaterialData>) -> SurfaceData {
        SurfaceData {
            id: 3,
            geometry: Arc::new(GeometryData::for_tests(Arc::new(TriangleMesh::default()))),
            material: material.map(Arc::new),
            invalid_color: Vec4::new(1.0, 0.0, 1.0, 1.0),
        }
    }

    fn hit() -> Hit {
        Hit {
            t: 1.0,
            u: 0.0,
            v: 0.0,
            ng: crate::util::Vec3::Z,
            prim_id: 0,
            geom_id: 0,
            inst_id: 0,
        }
    }

    #[test]
    fn test_missing_material_uses_invalid_color() {
        let s = surface_data(None);
        assert_eq!(s.color(&hit(), &Default::default()), Vec4::new(1.0, 0.0, 1.0, 1.0));
        assert_eq!(s.opacity(&hit(), &Default::default()), 1.0);
    }

    #[test]
    fn test_uniform_override_wins() {
        let s = surface_data(Some(MaterialData {
            color: Input::Attribute(Attribute::Color),
            opacity: Input::Constant(0.5),
            alpha_mode: AlphaMode::Blend,
            alpha_cutoff: 0.5,
        }));
        let mut uniforms: UniformAttributes = Default::default();
        // No geometry attribute: falls back to the default value
        assert_eq!(s.color(&hit(), &uniforms), DEFAULT_ATTRIBUTE_VALUE);

        uniforms[Attribute::Color.index()] = Some(Vec4::new(0.0, 1.0, 0.0, 0.5));
        assert_eq!(s.color(&hit(), &uniforms), Vec4::new(0.0, 1.0, 0.0, 0.5));
        assert_eq!(s.opacity(&hit(), &uniforms), 0.25);
    }

    #[test]
    fn test_sampler_reads_hit_attributes() {
        let texels = vec![Vec4::X, Vec4::Y, Vec4::Z, Vec4::W];
        let sampler = Arc::new(SamplerData::image2d_for_tests(texels, 2, 2, false));
        let s = surface_data(Some(MaterialData {
            color: Input::Sampler(Arc::clone(&sampler)),
            opacity: Input::Sampler(sampler),
            alpha_mode: AlphaMode::Blend,
            alpha_cutoff: 0.5,
        }));
        let mut uniforms: UniformAttributes = Default::default();
        uniforms[Attribute::Attribute0.index()] = Some(Vec4::new(0.75, 0.25, 0.0, 1.0));
        assert_eq!(s.color(&hit(), &uniforms), Vec4::Y);
        // Opacity reads x of the same texel and w is zero
        assert_eq!(s.opacity(&hit(), &uniforms), 0.0);

        uniforms[Attribute::Attribute0.index()] = Some(Vec4::new(0.25, 0.25, 0.0, 1.0));
        assert_eq!(s.color(&hit(), &uniforms), Vec4::X);
    }
}
