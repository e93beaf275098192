//! World - the instances rendered by a frame.
//!
//! Besides the explicit `instance` list, a world carries an implicit
//! "zero" group/instance pair that hosts surfaces and volumes attached to
//! the world directly. Neither is ever handed out publicly.
//!
//! Acceleration structures are rebuilt lazily by [`World::scene_update`]:
//!
//! 1. groups are reconstructed when the device-wide reconstruct request is
//!    not older than the world's last check,
//! 2. groups are recommitted when only geometry contents changed,
//! 3. the top-level structure is rebuilt when an instance changed or any
//!    group did in steps 1-2.

use std::sync::Arc;

use prism_accel::{Hit, Ray, Tlas, TlasInstance};

use super::{InstanceData, VolumeData};
use crate::core::{
    AnyValue, ObjectContext, ObjectImpl, ObjectRef, ObserverRef, ParameterTable, TimeStamp, UpdateRequests,
    WaitMode,
};
use crate::util::{Box1, Box3, DataType, Vec3};

/// Number of structure rebuilds a world has run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RebuildStats {
    pub tls_builds: u64,
    pub bls_constructs: u64,
    pub bls_commits: u64,
}

/// Closest volume entered by a ray.
#[derive(Debug, Clone)]
pub(crate) struct VolumeHit {
    pub volume: Arc<VolumeData>,
    /// Index into [`WorldScene::instances`]
    pub instance: usize,
    /// Ray in the volume's object space
    pub org: Vec3,
    pub dir: Vec3,
    pub t: Box1,
}

/// Render-time view of a world.
#[derive(Debug)]
pub(crate) struct WorldScene {
    pub tlas: Tlas,
    /// Indexed by the hit's instance id
    pub instances: Vec<InstanceData>,
    pub bounds: Box3,
}

impl WorldScene {
    pub fn empty() -> Self {
        Self {
            tlas: Tlas::empty(),
            instances: Vec::new(),
            bounds: Box3::EMPTY,
        }
    }

    pub fn intersect(&self, ray: &Ray) -> Option<Hit> {
        self.tlas.intersect(ray)
    }

    /// First volume entered along `org + dir * t` within `t`.
    pub fn intersect_volumes(&self, org: Vec3, dir: Vec3, t: Box1) -> Option<VolumeHit> {
        let mut best: Option<VolumeHit> = None;
        for (i, inst) in self.instances.iter().enumerate() {
            if inst.group.volumes.is_empty() {
                continue;
            }
            let local_org = inst.inv_xfm.transform_point3(org);
            let local_dir = inst.inv_xfm.transform_vector3(dir);
            for volume in &inst.group.volumes {
                let span = volume.bounds().intersect_ray(local_org, local_dir, t);
                if span.is_empty() {
                    continue;
                }
                if best.as_ref().is_some_and(|b| b.t.lower <= span.lower) {
                    continue;
                }
                best = Some(VolumeHit {
                    volume: Arc::clone(volume),
                    instance: i,
                    org: local_org,
                    dir: local_dir,
                    t: span,
                });
            }
        }
        best
    }
}

#[derive(Debug)]
pub(crate) struct World {
    zero_group: ObjectRef,
    zero_instance: ObjectRef,
    add_zero_instance: bool,

    instance_data: Option<ObserverRef>,
    instances: Vec<ObjectRef>,

    last_bls_reconstruct_check: TimeStamp,
    last_bls_commit_check: TimeStamp,
    last_tls_build: TimeStamp,

    stats: RebuildStats,
    scene: Arc<WorldScene>,
}

impl World {
    /// `zero_instance` must already reference `zero_group` as its group.
    pub fn new(zero_group: ObjectRef, zero_instance: ObjectRef) -> Self {
        Self {
            zero_group,
            zero_instance,
            add_zero_instance: false,
            instance_data: None,
            instances: Vec::new(),
            last_bls_reconstruct_check: 0,
            last_bls_commit_check: 0,
            last_tls_build: 0,
            stats: RebuildStats::default(),
            scene: Arc::new(WorldScene::empty()),
        }
    }

    pub fn stats(&self) -> RebuildStats {
        self.stats
    }

    pub fn scene(&self) -> Arc<WorldScene> {
        Arc::clone(&self.scene)
    }

    /// Instances gathered by the last finalize, zero instance included.
    pub fn instances(&self) -> &[ObjectRef] {
        &self.instances
    }

    pub fn is_stale(&self, requests: &UpdateRequests) -> bool {
        requests.bls_reconstruct() >= self.last_bls_reconstruct_check
            || requests.bls_commit() >= self.last_bls_commit_check
            || requests.tls_reconstruct() >= self.last_tls_build
    }

    fn groups(&self) -> Vec<ObjectRef> {
        self.instances
            .iter()
            .filter_map(|inst| inst.read().as_instance().and_then(|i| i.group().cloned()))
            .collect()
    }

    fn detach_zero_instance(&self) {
        if let Some(array) = &self.instance_data {
            if let Some(a) = array.write().as_object_array_mut() {
                a.remove_appended_handles();
            }
        }
    }

    /// Bring every structure up to date and return the result.
    pub fn scene_update(&mut self, ctx: &ObjectContext<'_>) -> Arc<WorldScene> {
        let _span = tracing::debug_span!("world_update", world = %ctx.this.handle()).entered();
        self.rebuild_blss(ctx);
        self.recommit_blss(ctx);
        self.rebuild_tls(ctx);
        self.scene()
    }

    fn rebuild_blss(&mut self, ctx: &ObjectContext<'_>) {
        if ctx.state.requests.bls_reconstruct() < self.last_bls_reconstruct_check {
            return;
        }
        self.last_tls_build = 0;
        ctx.debug(format!("rebuilding {} BLSs", self.instances.len()));
        for group in self.groups() {
            let gctx = ObjectContext::new(ctx.state, group.record());
            let rebuilt = group
                .write()
                .as_group_mut()
                .is_some_and(|g| g.bls_construct(&gctx));
            if rebuilt {
                self.stats.bls_constructs += 1;
            }
        }
        self.last_bls_reconstruct_check = ctx.now();
        self.last_bls_commit_check = ctx.now();
    }

    fn recommit_blss(&mut self, ctx: &ObjectContext<'_>) {
        if ctx.state.requests.bls_commit() < self.last_bls_commit_check {
            return;
        }
        self.last_tls_build = 0;
        ctx.debug(format!("recommitting {} BLSs", self.instances.len()));
        for group in self.groups() {
            let gctx = ObjectContext::new(ctx.state, group.record());
            let recommitted = group
                .write()
                .as_group_mut()
                .is_some_and(|g| g.bls_commit(&gctx));
            if recommitted {
                self.stats.bls_commits += 1;
            }
        }
        self.last_bls_commit_check = ctx.now();
    }

    fn rebuild_tls(&mut self, ctx: &ObjectContext<'_>) {
        if ctx.state.requests.tls_reconstruct() < self.last_tls_build {
            return;
        }
        ctx.debug(format!("rebuilding TLS over {} instances", self.instances.len()));

        let mut instances = Vec::with_capacity(self.instances.len());
        let mut placed = Vec::with_capacity(self.instances.len());
        let mut bounds = Box3::EMPTY;
        for inst in &self.instances {
            let data = if inst.is_valid() {
                inst.read().as_instance().and_then(|i| i.snapshot())
            } else {
                None
            };
            let Some(data) = data else {
                ctx.debug(format!("rejecting invalid instance {} when building TLS", inst.handle()));
                continue;
            };

            for v in &data.group.volumes {
                bounds.extend(&v.bounds().transformed(&data.xfm));
            }
            if data.group.surfaces.is_empty() {
                ctx.debug(format!(
                    "rejecting empty surfaces in instance {} when building TLS",
                    inst.handle()
                ));
            } else {
                let slot = instances.len() as u32;
                placed.push(TlasInstance::new(slot, Arc::clone(&data.group.blas), data.xfm));
            }
            instances.push(data);
        }

        let tlas = Tlas::build(placed);
        bounds.extend(&Box3::from(tlas.bounds()));
        self.scene = Arc::new(WorldScene {
            tlas,
            instances,
            bounds,
        });
        self.stats.tls_builds += 1;
        self.last_tls_build = ctx.now();
    }
}

impl ObjectImpl for World {
    fn commit_parameters(&mut self, params: &ParameterTable, ctx: &ObjectContext<'_>) {
        self.detach_zero_instance();

        let has_surfaces = params.get_object("surface", DataType::Array1D).is_some();
        let has_volumes = params.get_object("volume", DataType::Array1D).is_some();
        self.add_zero_instance = has_surfaces || has_volumes;
        if self.add_zero_instance {
            ctx.debug("world will add zero instance");
        }

        {
            let mut group_params = self.zero_group.params.lock();
            for name in ["surface", "volume"] {
                if params.get_object(name, DataType::Array1D).is_some() {
                    group_params.set_direct(name, params.get_direct(name));
                } else {
                    group_params.remove(name);
                }
            }
        }
        self.zero_instance
            .params
            .lock()
            .set("id", AnyValue::new(params.get_or("id", u32::MAX)));
        ctx.state.commit_now(self.zero_group.record());
        ctx.state.commit_now(self.zero_instance.record());

        self.instance_data = params
            .get_object("instance", DataType::Array1D)
            .map(|a| ctx.observe(a));

        self.last_bls_reconstruct_check = 0;
        self.last_bls_commit_check = 0;
        self.last_tls_build = 0;
    }

    fn finalize(&mut self, _ctx: &ObjectContext<'_>) {
        self.instances = match &self.instance_data {
            Some(array) => {
                let mut body = array.write();
                let mut handles = Vec::new();
                if let Some(a) = body.as_object_array_mut() {
                    a.remove_appended_handles();
                    if self.add_zero_instance {
                        a.append_handle(self.zero_instance.clone());
                    }
                    handles = a
                        .handles()
                        .iter()
                        .filter(|h| h.kind() == DataType::Instance)
                        .map(ObjectRef::new)
                        .collect();
                }
                handles
            }
            None if self.add_zero_instance => vec![self.zero_instance.clone()],
            None => Vec::new(),
        };

        self.last_bls_reconstruct_check = 0;
        self.last_bls_commit_check = 0;
        self.last_tls_build = 0;
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
                        self.scene_update(ctx);
                    }
                    WaitMode::NoWait if self.is_stale(&ctx.state.requests) => return None,
                    WaitMode::NoWait => {}
                }
                Some(AnyValue::new(self.scene.bounds))
            }
            ("tlsBuildCount", DataType::UInt64) => Some(AnyValue::new(self.stats.tls_builds)),
            ("blsBuildCount", DataType::UInt64) => Some(AnyValue::new(self.stats.bls_constructs)),
            ("blsCommitCount", DataType::UInt64) => Some(AnyValue::new(self.stats.bls_commits)),
            _ => None,
        }
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.detach_zero_instance();
    }
}
