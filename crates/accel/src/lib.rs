//! CPU ray intersection backend.
//!
//! Two-level acceleration structures over triangle meshes and sphere sets:
//! - [`Blas`] - bottom level, one per group of surfaces
//! - [`Tlas`] - top level, one leaf per transformed instance of a [`Blas`]
//!
//! Both levels share the binned-SAH builder in [`build`].
//!
//! ## Example
//!
//! ```ignore
//! use prism_accel::{Blas, Ray, Shape, Tlas, TlasInstance, TriangleMesh};
//!
//! let blas = Arc::new(Blas::build(&[Shape::Triangles(mesh)]));
//! let tlas = Tlas::build(vec![TlasInstance::new(0, blas, Mat4::IDENTITY)]);
//! if let Some(hit) = tlas.intersect(&Ray::new(org, dir)) {
//!     println!("hit prim {} at t={}", hit.prim_id, hit.t);
//! }
//! ```

mod aabb;
pub mod build;
mod blas;
mod mesh;
mod ray;
mod shape;
mod spheres;
mod tlas;

pub use aabb::{Aabb, BvhNode};
pub use blas::Blas;
pub use build::{build_bvh, Bvh};
pub use mesh::TriangleMesh;
pub use ray::{Hit, Ray, INVALID_ID};
pub use shape::Shape;
pub use spheres::SphereSet;
pub use tlas::{Tlas, TlasInstance};
