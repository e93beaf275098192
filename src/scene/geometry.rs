//! Triangle, quad and sphere geometry with per-vertex and per-primitive
//! attributes.
//!
//! Parameters:
//! - `vertex.position` - float32 vec3 Array1D (required)
//! - `primitive.index` - uint32 vec3 (triangle), vec4 (quad) or scalar
//!   (sphere) Array1D; sequential indices when absent
//! - `vertex.radius` - float32 Array1D, one radius per vertex (sphere)
//! - `radius` - radius of spheres without `vertex.radius`, default 0.01
//! - `vertex.color`, `vertex.attribute0..3` - interpolated barycentrically
//!   on meshes, read per sphere vertex on spheres
//! - `primitive.color`, `primitive.attribute0..3` - one value per primitive
//! - `id` - user id (uint32)
//!
//! Quads are split into two triangles `(v0, v1, v2)` and `(v0, v2, v3)`.

use std::sync::Arc;

use prism_accel::{Hit, Shape, SphereSet, TriangleMesh};

use super::{observe_array, Attribute};
use crate::array::{is_attribute_type, DEFAULT_ATTRIBUTE_VALUE};
use crate::core::{ObjectContext, ObjectImpl, ObserverRef, ParameterTable};
use crate::util::{UVec3, UVec4, Vec3, Vec4};

const DEFAULT_SPHERE_RADIUS: f32 = 0.01;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum GeometryKind {
    Triangle,
    Quad,
    Sphere,
}

impl GeometryKind {
    pub fn from_subtype(subtype: &str) -> Option<Self> {
        match subtype {
            "triangle" => Some(Self::Triangle),
            "quad" => Some(Self::Quad),
            "sphere" => Some(Self::Sphere),
            _ => None,
        }
    }

    /// Vertices per input primitive.
    fn arity(self) -> u32 {
        match self {
            Self::Triangle => 3,
            Self::Quad => 4,
            Self::Sphere => 1,
        }
    }

    /// Backend primitives per input primitive.
    fn triangles_per_primitive(self) -> u32 {
        match self {
            Self::Quad => 2,
            Self::Triangle | Self::Sphere => 1,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Triangle => "triangle",
            Self::Quad => "quad",
            Self::Sphere => "sphere",
        }
    }
}

/// Immutable geometry snapshot read by groups and the renderer.
#[derive(Debug)]
pub(crate) struct GeometryData {
    pub shape: Shape,
    pub id: u32,
    triangles_per_primitive: u32,
    /// Vertex of each sphere; empty when spheres map 1:1 to vertices
    sphere_vertices: Vec<u32>,
    vertex_attributes: [Option<Vec<Vec4>>; 5],
    primitive_attributes: [Option<Vec<Vec4>>; 5],
}

impl GeometryData {
    /// Input primitive a backend primitive belongs to.
    #[inline]
    pub fn primitive_id(&self, prim: u32) -> u32 {
        prim / self.triangles_per_primitive
    }

    pub fn mesh(&self) -> Option<&TriangleMesh> {
        match &self.shape {
            Shape::Triangles(mesh) => Some(mesh.as_ref()),
            Shape::Spheres(_) => None,
        }
    }

    /// Attribute at a hit: vertex data wins over primitive data.
    pub fn attribute(&self, attr: Attribute, hit: &Hit) -> Option<Vec4> {
        let slot = attr.index();
        if let Some(values) = &self.vertex_attributes[slot] {
            let v = |i: u32| values.get(i as usize).copied().unwrap_or(DEFAULT_ATTRIBUTE_VALUE);
            return match &self.shape {
                Shape::Triangles(mesh) => {
                    let idx = mesh.indices.get(hit.prim_id as usize)?;
                    let uvw = hit.uvw();
                    Some(v(idx.x) * uvw.x + v(idx.y) * uvw.y + v(idx.z) * uvw.z)
                }
                Shape::Spheres(_) => {
                    let vertex = self.sphere_vertices.get(hit.prim_id as usize).copied();
                    Some(v(vertex.unwrap_or(hit.prim_id)))
                }
            };
        }
        if let Some(values) = &self.primitive_attributes[slot] {
            return values.get(self.primitive_id(hit.prim_id) as usize).copied();
        }
        None
    }
}

#[cfg(test)]
impl GeometryData {
    pub fn for_tests(mesh: Arc<TriangleMesh>) -> Self {
        Self {
            shape: Shape::Triangles(mesh),
            id: u32::MAX,
            triangles_per_primitive: 1,
            sphere_vertices: Vec::new(),
            vertex_attributes: Default::default(),
            primitive_attributes: Default::default(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Geometry {
    kind: GeometryKind,
    positions: Option<ObserverRef>,
    indices: Option<ObserverRef>,
    radii: Option<ObserverRef>,
    radius: f32,
    vertex_attributes: [Option<ObserverRef>; 5],
    primitive_attributes: [Option<ObserverRef>; 5],
    id: u32,
    data: Option<Arc<GeometryData>>,
}

impl Geometry {
    pub fn new(kind: GeometryKind) -> Self {
        Self {
            kind,
            positions: None,
            indices: None,
            radii: None,
            radius: DEFAULT_SPHERE_RADIUS,
            vertex_attributes: Default::default(),
            primitive_attributes: Default::default(),
            id: u32::MAX,
            data: None,
        }
    }

    pub fn data(&self) -> Option<Arc<GeometryData>> {
        self.data.clone()
    }

    fn build(&self, ctx: &ObjectContext<'_>) -> Option<GeometryData> {
        let Some(positions) = &self.positions else {
            ctx.warn(format!(
                "missing required parameter 'vertex.position' on {} geometry",
                self.kind.name()
            ));
            return None;
        };
        let positions: Vec<Vec3> = {
            let body = positions.read();
            let Some(values) = body.as_array1d().and_then(|a| a.values::<Vec3>()) else {
                ctx.warn("'vertex.position' must be a float32_vec3 array");
                return None;
            };
            values.into_owned()
        };
        let vertex_count = positions.len();

        let (shape, sphere_vertices, primitive_count) = match self.kind {
            GeometryKind::Sphere => {
                let (set, vertices) = self.build_spheres(positions, ctx)?;
                let count = set.sphere_count();
                (Shape::Spheres(Arc::new(set)), vertices, count)
            }
            GeometryKind::Triangle | GeometryKind::Quad => {
                let mesh = self.build_mesh(positions, ctx)?;
                let count = mesh.triangle_count() / self.kind.triangles_per_primitive() as usize;
                (Shape::Triangles(Arc::new(mesh)), Vec::new(), count)
            }
        };

        let vertex_attributes = self.read_attributes(&self.vertex_attributes, "vertex", vertex_count, ctx);
        let primitive_attributes =
            self.read_attributes(&self.primitive_attributes, "primitive", primitive_count, ctx);

        Some(GeometryData {
            shape,
            id: self.id,
            triangles_per_primitive: self.kind.triangles_per_primitive(),
            sphere_vertices,
            vertex_attributes,
            primitive_attributes,
        })
    }

    fn build_mesh(&self, positions: Vec<Vec3>, ctx: &ObjectContext<'_>) -> Option<TriangleMesh> {
        let triangles = match &self.indices {
            Some(indices) => self.read_indices(indices, ctx)?,
            None => self.sequential_indices(positions.len()),
        };

        let n = positions.len() as u32;
        if let Some(bad) = triangles.iter().find(|t| t.max_element() >= n) {
            ctx.warn(format!(
                "'primitive.index' references vertex {} but only {n} vertices exist",
                bad.max_element()
            ));
            return None;
        }
        Some(TriangleMesh::new(positions, triangles))
    }

    /// One sphere per index (or per vertex without indices), plus the
    /// vertex each sphere reads attributes from.
    fn build_spheres(&self, positions: Vec<Vec3>, ctx: &ObjectContext<'_>) -> Option<(SphereSet, Vec<u32>)> {
        let n = positions.len();
        let vertices: Vec<u32> = match &self.indices {
            Some(indices) => {
                let body = indices.read();
                let Some(values) = body.as_array1d().and_then(|a| a.values::<u32>()) else {
                    ctx.warn("'primitive.index' on sphere geometry must be uint32");
                    return None;
                };
                values.into_owned()
            }
            None => Vec::new(),
        };
        if let Some(bad) = vertices.iter().find(|i| **i as usize >= n) {
            ctx.warn(format!(
                "'primitive.index' references vertex {bad} but only {n} vertices exist"
            ));
            return None;
        }

        let radii = self.read_radii(n, ctx);
        let radius_of = |i: usize| radii.as_ref().and_then(|r| r.get(i).copied()).unwrap_or(self.radius);

        let set = if vertices.is_empty() && self.indices.is_none() {
            let radii = (0..n).map(radius_of).collect();
            SphereSet::new(positions, radii)
        } else {
            let centers = vertices.iter().map(|i| positions[*i as usize]).collect();
            let radii = vertices.iter().map(|i| radius_of(*i as usize)).collect();
            SphereSet::new(centers, radii)
        };
        Some((set, vertices))
    }

    fn read_radii(&self, vertex_count: usize, ctx: &ObjectContext<'_>) -> Option<Vec<f32>> {
        let array = self.radii.as_ref()?;
        let body = array.read();
        let Some(values) = body.as_array1d().and_then(|a| a.values::<f32>()) else {
            ctx.warn("'vertex.radius' must be a float32 array, using 'radius'");
            return None;
        };
        if values.len() < vertex_count {
            ctx.warn(format!(
                "'vertex.radius' has {} values, {vertex_count} expected; using 'radius'",
                values.len()
            ));
            return None;
        }
        Some(values.into_owned())
    }

    fn read_indices(&self, indices: &ObserverRef, ctx: &ObjectContext<'_>) -> Option<Vec<UVec3>> {
        let body = indices.read();
        let array = body.as_array1d()?;
        let triangles = match self.kind {
            GeometryKind::Triangle => match array.values::<UVec3>() {
                Some(v) => Some(v.into_owned()),
                None => {
                    ctx.warn("'primitive.index' on triangle geometry must be uint32_vec3");
                    None
                }
            },
            GeometryKind::Quad => match array.values::<UVec4>() {
                Some(v) => Some(v.iter().flat_map(|q| split_quad(*q)).collect()),
                None => {
                    ctx.warn("'primitive.index' on quad geometry must be uint32_vec4");
                    None
                }
            },
            GeometryKind::Sphere => None,
        };
        triangles
    }

    fn sequential_indices(&self, vertex_count: usize) -> Vec<UVec3> {
        let arity = self.kind.arity();
        let count = vertex_count as u32 / arity;
        match self.kind {
            GeometryKind::Triangle => (0..count)
                .map(|i| UVec3::new(3 * i, 3 * i + 1, 3 * i + 2))
                .collect(),
            GeometryKind::Quad => (0..count)
                .flat_map(|i| split_quad(UVec4::new(4 * i, 4 * i + 1, 4 * i + 2, 4 * i + 3)))
                .collect(),
            GeometryKind::Sphere => Vec::new(),
        }
    }

    fn read_attributes(
        &self,
        arrays: &[Option<ObserverRef>; 5],
        scope: &str,
        expected: usize,
        ctx: &ObjectContext<'_>,
    ) -> [Option<Vec<Vec4>>; 5] {
        let mut out: [Option<Vec<Vec4>>; 5] = Default::default();
        for attr in Attribute::ALL {
            let Some(array) = &arrays[attr.index()] else {
                continue;
            };
            let body = array.read();
            let Some(a) = body.as_array1d() else {
                continue;
            };
            let ty = a.core().element_type();
            if !is_attribute_type(ty) {
                ctx.warn(format!("'{scope}.{}' has unsupported element type {ty}", attr.name()));
                continue;
            }
            if a.size() < expected {
                ctx.warn(format!(
                    "'{scope}.{}' has {} values, {expected} expected",
                    attr.name(),
                    a.size()
                ));
            }
            out[attr.index()] = Some(a.attribute_values());
        }
        out
    }
}

fn split_quad(q: UVec4) -> [UVec3; 2] {
    [UVec3::new(q.x, q.y, q.z), UVec3::new(q.x, q.z, q.w)]
}

impl ObjectImpl for Geometry {
    fn commit_parameters(&mut self, params: &ParameterTable, ctx: &ObjectContext<'_>) {
        self.positions = observe_array(params, "vertex.position", ctx);
        self.indices = observe_array(params, "primitive.index", ctx);
        for attr in Attribute::ALL {
            self.vertex_attributes[attr.index()] =
                observe_array(params, &format!("vertex.{}", attr.name()), ctx);
            self.primitive_attributes[attr.index()] =
                observe_array(params, &format!("primitive.{}", attr.name()), ctx);
        }
        if self.kind == GeometryKind::Sphere {
            self.radii = observe_array(params, "vertex.radius", ctx);
            self.radius = params.get_or("radius", DEFAULT_SPHERE_RADIUS);
        }
        self.id = params.get_or("id", u32::MAX);
    }

    fn finalize(&mut self, ctx: &ObjectContext<'_>) {
        self.data = self.build(ctx).map(Arc::new);
    }

    fn is_valid(&self) -> bool {
        self.data.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{Array1D, ArrayDescriptor};
    use crate::core::{AnyValue, DeviceConfig, DeviceState, ObjectRef};
    use crate::device::ObjectBody;
    use crate::util::DataType;
    use std::sync::Arc;

    fn array<T: bytemuck::Pod>(state: &DeviceState, ty: DataType, values: &[T]) -> ObjectRef {
        let mut a = Array1D::new(ArrayDescriptor::new_1d(ty, values.len())).expect("array");
        a.core_mut().bytes_mut().copy_from_slice(bytemuck::cast_slice(values));
        state.create_internal(DataType::Array1D, "", ObjectBody::Array1D(a))
    }

    fn finalize(state: &Arc<DeviceState>, geom: &mut Geometry, params: &ParameterTable) {
        let rec = state.create_object(DataType::Geometry, "", ObjectBody::Unknown);
        let ctx = ObjectContext::new(state, &rec);
        geom.commit_parameters(params, &ctx);
        geom.finalize(&ctx);
    }

    fn hit(prim_id: u32, u: f32, v: f32) -> Hit {
        Hit {
            t: 1.0,
            u,
            v,
            ng: Vec3::Z,
            prim_id,
            geom_id: 0,
            inst_id: 0,
        }
    }

    #[test]
    fn test_quad_split_and_primitive_ids() {
        let state = DeviceState::new(DeviceConfig::default()).expect("state");
        let positions = [Vec3::ZERO, Vec3::X, Vec3::new(1.0, 1.0, 0.0), Vec3::Y];
        let mut params = ParameterTable::new();
        params.set_direct(
            "vertex.position",
            AnyValue::from_object(DataType::Array1D, array(&state, DataType::Float32Vec3, &positions)),
        );
        let colors = [Vec4::X];
        params.set_direct(
            "primitive.color",
            AnyValue::from_object(DataType::Array1D, array(&state, DataType::Float32Vec4, &colors)),
        );

        let mut geom = Geometry::new(GeometryKind::Quad);
        finalize(&state, &mut geom, &params);
        let data = geom.data().expect("valid quad");
        assert_eq!(data.mesh().expect("mesh").indices, vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)]);
        assert_eq!(data.primitive_id(1), 0);
        assert_eq!(data.attribute(Attribute::Color, &hit(1, 0.2, 0.2)), Some(Vec4::X));
        assert_eq!(data.attribute(Attribute::Attribute0, &hit(1, 0.2, 0.2)), None);
    }

    #[test]
    fn test_vertex_attribute_interpolation() {
        let state = DeviceState::new(DeviceConfig::default()).expect("state");
        let positions = [Vec3::ZERO, Vec3::X, Vec3::Y];
        let values = [0.0f32, 1.0, 2.0];
        let mut params = ParameterTable::new();
        params.set_direct(
            "vertex.position",
            AnyValue::from_object(DataType::Array1D, array(&state, DataType::Float32Vec3, &positions)),
        );
        params.set_direct(
            "vertex.attribute0",
            AnyValue::from_object(DataType::Array1D, array(&state, DataType::Float32, &values)),
        );
        params.set_direct(
            "primitive.attribute0",
            AnyValue::from_object(DataType::Array1D, array(&state, DataType::Float32, &[9.0f32])),
        );

        let mut geom = Geometry::new(GeometryKind::Triangle);
        finalize(&state, &mut geom, &params);
        let data = geom.data().expect("valid triangle");
        let v = data.attribute(Attribute::Attribute0, &hit(0, 0.25, 0.5)).expect("attribute");
        // 0 * 0.25 + 1 * 0.25 + 2 * 0.5
        assert!((v.x - 1.25).abs() < 1e-6);
        assert_eq!(v.w, 1.0);
    }

    #[test]
    fn test_out_of_range_index_invalid() {
        let state = DeviceState::new(DeviceConfig::default()).expect("state");
        let mut params = ParameterTable::new();
        params.set_direct(
            "vertex.position",
            AnyValue::from_object(
                DataType::Array1D,
                array(&state, DataType::Float32Vec3, &[Vec3::ZERO, Vec3::X, Vec3::Y]),
            ),
        );
        params.set_direct(
            "primitive.index",
            AnyValue::from_object(DataType::Array1D, array(&state, DataType::UInt32Vec3, &[UVec3::new(0, 1, 3)])),
        );
        let mut geom = Geometry::new(GeometryKind::Triangle);
        finalize(&state, &mut geom, &params);
        assert!(!geom.is_valid());
    }

    #[test]
    fn test_missing_positions_invalid() {
        let state = DeviceState::new(DeviceConfig::default()).expect("state");
        let mut geom = Geometry::new(GeometryKind::Triangle);
        finalize(&state, &mut geom, &ParameterTable::new());
        assert!(!geom.is_valid());
        assert_eq!(GeometryKind::from_subtype("sphere"), Some(GeometryKind::Sphere));
        assert_eq!(GeometryKind::from_subtype("cylinder"), None);
    }

    fn sphere_bounds(data: &GeometryData) -> (Vec3, Vec3) {
        let b = data.shape.bounds();
        (b.min, b.max)
    }

    #[test]
    fn test_spheres_per_vertex() {
        let state = DeviceState::new(DeviceConfig::default()).expect("state");
        let positions = [Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0)];
        let mut params = ParameterTable::new();
        params.set_direct(
            "vertex.position",
            AnyValue::from_object(DataType::Array1D, array(&state, DataType::Float32Vec3, &positions)),
        );
        params.set_direct(
            "vertex.radius",
            AnyValue::from_object(DataType::Array1D, array(&state, DataType::Float32, &[1.0f32, 0.5])),
        );
        params.set_direct(
            "vertex.color",
            AnyValue::from_object(DataType::Array1D, array(&state, DataType::Float32Vec4, &[Vec4::X, Vec4::Y])),
        );

        let mut geom = Geometry::new(GeometryKind::Sphere);
        finalize(&state, &mut geom, &params);
        let data = geom.data().expect("valid spheres");
        assert!(data.mesh().is_none());
        assert_eq!(data.shape.prim_count(), 2);
        assert_eq!(sphere_bounds(&data), (Vec3::splat(-1.0), Vec3::new(4.5, 1.0, 1.0)));
        assert_eq!(data.attribute(Attribute::Color, &hit(1, 0.0, 0.0)), Some(Vec4::Y));
        assert_eq!(data.primitive_id(1), 1);
    }

    #[test]
    fn test_indexed_spheres_read_indexed_vertices() {
        let state = DeviceState::new(DeviceConfig::default()).expect("state");
        let positions = [Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.0, 2.0, 0.0)];
        let mut params = ParameterTable::new();
        params.set_direct(
            "vertex.position",
            AnyValue::from_object(DataType::Array1D, array(&state, DataType::Float32Vec3, &positions)),
        );
        params.set_direct(
            "primitive.index",
            AnyValue::from_object(DataType::Array1D, array(&state, DataType::UInt32, &[2u32])),
        );
        params.set_direct(
            "vertex.attribute0",
            AnyValue::from_object(DataType::Array1D, array(&state, DataType::Float32, &[0.0f32, 1.0, 2.0])),
        );
        params.set("radius", AnyValue::new(0.25f32));

        let mut geom = Geometry::new(GeometryKind::Sphere);
        finalize(&state, &mut geom, &params);
        let data = geom.data().expect("valid spheres");
        assert_eq!(data.shape.prim_count(), 1);
        assert_eq!(
            sphere_bounds(&data),
            (Vec3::new(-0.25, 1.75, -0.25), Vec3::new(0.25, 2.25, 0.25))
        );
        let v = data.attribute(Attribute::Attribute0, &hit(0, 0.0, 0.0)).expect("attribute");
        assert_eq!(v.x, 2.0);
    }

    #[test]
    fn test_sphere_bad_radius_array_ignored() {
        let state = DeviceState::new(DeviceConfig::default()).expect("state");
        let mut params = ParameterTable::new();
        params.set_direct(
            "vertex.position",
            AnyValue::from_object(DataType::Array1D, array(&state, DataType::Float32Vec3, &[Vec3::ZERO])),
        );
        params.set_direct(
            "vertex.radius",
            AnyValue::from_object(DataType::Array1D, array(&state, DataType::UInt32, &[3u32])),
        );

        let mut geom = Geometry::new(GeometryKind::Sphere);
        finalize(&state, &mut geom, &params);
        let data = geom.data().expect("radius array is optional");
        assert_eq!(sphere_bounds(&data), (Vec3::splat(-0.01), Vec3::splat(0.01)));

        params.set_direct(
            "primitive.index",
            AnyValue::from_object(DataType::Array1D, array(&state, DataType::UInt32, &[1u32])),
        );
        finalize(&state, &mut geom, &params);
        assert!(!geom.is_valid());
    }
}
