//! Group - a set of surfaces and volumes sharing one bottom-level
//! acceleration structure (BLS).
//!
//! The BLS is built lazily. `bls_construct` re-gathers the valid members
//! when the device-wide reconstruct request is newer than the last
//! construction; `bls_commit` re-reads member geometry when only mesh
//! contents changed.

use std::sync::Arc;

use prism_accel::Blas;

use super::{observe_array, SurfaceData, VolumeData};
use crate::core::{
    AnyValue, ObjectContext, ObjectImpl, ObjectRef, ObserverRef, ParameterTable, TimeStamp, UpdateRequests,
    WaitMode,
};
use crate::util::{Box3, DataType};

/// Render-time view of a group.
#[derive(Debug)]
pub(crate) struct GroupScene {
    pub blas: Arc<Blas>,
    /// Indexed by the hit's geometry id
    pub surfaces: Vec<SurfaceData>,
    pub volumes: Vec<Arc<VolumeData>>,
}

impl GroupScene {
    pub fn empty() -> Self {
        Self {
            blas: Arc::new(Blas::build(&[])),
            surfaces: Vec::new(),
            volumes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty() && self.volumes.is_empty()
    }

    /// Surface geometry bounds plus volume bounds.
    pub fn bounds(&self) -> Box3 {
        let mut b = Box3::from(self.blas.bounds());
        for v in &self.volumes {
            b.extend(&v.bounds());
        }
        b
    }
}

#[derive(Debug)]
pub(crate) struct Group {
    surface_data: Option<ObserverRef>,
    volume_data: Option<ObserverRef>,
    surfaces: Vec<ObjectRef>,
    volumes: Vec<ObjectRef>,
    last_construction: TimeStamp,
    last_commit: TimeStamp,
    scene: Arc<GroupScene>,
}

impl Group {
    pub fn new() -> Self {
        Self {
            surface_data: None,
            volume_data: None,
            surfaces: Vec::new(),
            volumes: Vec::new(),
            last_construction: 0,
            last_commit: 0,
            scene: Arc::new(GroupScene::empty()),
        }
    }

    pub fn scene(&self) -> Arc<GroupScene> {
        Arc::clone(&self.scene)
    }

    pub fn is_stale(&self, requests: &UpdateRequests) -> bool {
        self.last_construction <= requests.bls_reconstruct() || self.last_commit <= requests.bls_commit()
    }

    fn members(array: &Option<ObserverRef>, kind: DataType, ctx: &ObjectContext<'_>) -> Vec<ObjectRef> {
        let Some(array) = array else {
            return Vec::new();
        };
        let handles: Vec<ObjectRef> = match array.read().as_object_array() {
            Some(a) => a.handles().iter().map(ObjectRef::new).collect(),
            None => return Vec::new(),
        };
        handles
            .into_iter()
            .filter(|h| {
                let ok = h.kind() == kind && h.is_valid();
                if !ok {
                    ctx.debug(format!("rejecting invalid {kind} {} in building BLS", h.handle()));
                }
                ok
            })
            .collect()
    }

    /// Re-gather members if a reconstruct was requested. Returns true if
    /// the structure was rebuilt.
    pub fn bls_construct(&mut self, ctx: &ObjectContext<'_>) -> bool {
        if self.last_construction > ctx.state.requests.bls_reconstruct() {
            return false;
        }
        ctx.debug("rebuilding BLS");

        self.surfaces = Self::members(&self.surface_data, DataType::Surface, ctx);
        self.volumes = Self::members(&self.volume_data, DataType::Volume, ctx);

        self.last_construction = ctx.now();
        self.last_commit = 0;
        self.bls_commit(ctx);
        true
    }

    /// Rebuild the structure from the current members if a commit was
    /// requested. Returns true if it ran.
    pub fn bls_commit(&mut self, ctx: &ObjectContext<'_>) -> bool {
        if self.last_commit > ctx.state.requests.bls_commit() {
            return false;
        }
        ctx.debug("committing BLS");

        let surfaces: Vec<SurfaceData> = self
            .surfaces
            .iter()
            .filter_map(|s| s.read().as_surface().and_then(|s| s.snapshot()))
            .collect();
        let volumes: Vec<Arc<VolumeData>> = self
            .volumes
            .iter()
            .filter_map(|v| v.read().as_volume().and_then(|v| v.snapshot()))
            .map(Arc::new)
            .collect();
        let shapes: Vec<_> = surfaces.iter().map(|s| s.geometry.shape.clone()).collect();

        self.scene = Arc::new(GroupScene {
            blas: Arc::new(Blas::build(&shapes)),
            surfaces,
            volumes,
        });
        self.last_commit = ctx.now();
        true
    }
}

impl ObjectImpl for Group {
    fn commit_parameters(&mut self, params: &ParameterTable, ctx: &ObjectContext<'_>) {
        self.surface_data = observe_array(params, "surface", ctx);
        self.volume_data = observe_array(params, "volume", ctx);
        self.last_construction = 0;
        self.last_commit = 0;
    }

    fn get_property(
        &mut self,
        name: &str,
        ty: DataType,
        wait: WaitMode,
        ctx: &ObjectContext<'_>,
    ) -> Option<AnyValue> {
        match (name, ty) {
            ("bounds", DataType::Float32Box3) => {
                match wait {
                    WaitMode::Wait => {
                        self.bls_construct(ctx);
                        self.bls_commit(ctx);
                    }
                    WaitMode::NoWait if self.is_stale(&ctx.state.requests) => return None,
                    WaitMode::NoWait => {}
                }
                Some(AnyValue::new(self.scene.bounds()))
            }
            _ => None,
        }
    }
}
