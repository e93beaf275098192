//! Integration tests for groups, instances, worlds and lazy rebuilds.

use prism::{
    AppMemory, ArrayDescriptor, Box3, CommitState, DataType, Device, DeviceConfig, Handle, Mat4, RefType, UVec3, Vec3,
    WaitMode,
};

/// Committed surface over one triangle.
fn triangle_surface(device: &Device, vertices: &[Vec3]) -> (Handle, Handle) {
    let positions = device
        .new_array1d(ArrayDescriptor::new_1d(DataType::Float32Vec3, vertices.len()))
        .expect("positions");
    device.write_array(positions, 0, vertices).expect("write");

    let geometry = device.new_geometry("triangle").expect("geometry");
    device
        .set_parameter_object(geometry, "vertex.position", DataType::Array1D, Some(positions))
        .expect("param");
    device.commit_parameters(geometry).expect("commit");

    let surface = device.new_surface().expect("surface");
    device
        .set_parameter_object(surface, "geometry", DataType::Geometry, Some(geometry))
        .expect("param");
    device.commit_parameters(surface).expect("commit");
    device.release(geometry).expect("release geometry");
    (surface, positions)
}

fn unit_triangle() -> [Vec3; 3] {
    [Vec3::ZERO, Vec3::X, Vec3::Y]
}

fn world_with_surfaces(device: &Device, surfaces: &[Handle]) -> Handle {
    let list = device.new_object_array(DataType::Surface, surfaces).expect("list");
    let world = device.new_world().expect("world");
    device
        .set_parameter_object(world, "surface", DataType::Array1D, Some(list))
        .expect("param");
    device.commit_parameters(world).expect("commit");
    device.release(list).expect("release list");
    world
}

fn counter(device: &Device, world: Handle, name: &str) -> u64 {
    device.get_property::<u64>(world, name, WaitMode::NoWait).expect(name)
}

#[test]
fn test_repeated_bounds_query_builds_once() {
    let device = Device::new(DeviceConfig::default()).expect("device");
    let (surface, positions) = triangle_surface(&device, &unit_triangle());
    let world = world_with_surfaces(&device, &[surface]);

    let first: Box3 = device.get_property(world, "bounds", WaitMode::Wait).expect("bounds");
    let second: Box3 = device.get_property(world, "bounds", WaitMode::Wait).expect("bounds");
    assert_eq!(first, second);
    assert_eq!(first, Box3::new(Vec3::ZERO, Vec3::new(1.0, 1.0, 0.0)));
    assert_eq!(counter(&device, world, "tlsBuildCount"), 1);
    assert_eq!(counter(&device, world, "blsBuildCount"), 1);
    assert_eq!(counter(&device, world, "blsCommitCount"), 0);

    // Moving a vertex recommits the BLS and rebuilds the TLS, nothing more
    device.write_array(positions, 2, &[Vec3::new(0.0, 3.0, 0.0)]).expect("write");
    let moved: Box3 = device.get_property(world, "bounds", WaitMode::Wait).expect("bounds");
    assert_eq!(moved.upper, Vec3::new(1.0, 3.0, 0.0));
    assert_eq!(counter(&device, world, "tlsBuildCount"), 2);
    assert_eq!(counter(&device, world, "blsBuildCount"), 1);
    assert_eq!(counter(&device, world, "blsCommitCount"), 1);

    for h in [surface, positions, world] {
        device.release(h).expect("release");
    }
}

#[test]
fn test_nowait_bounds_while_stale() {
    let device = Device::new(DeviceConfig::default()).expect("device");
    let (surface, positions) = triangle_surface(&device, &unit_triangle());
    let world = world_with_surfaces(&device, &[surface]);

    assert_eq!(device.get_property::<Box3>(world, "bounds", WaitMode::NoWait), None);
    assert!(device.get_property::<Box3>(world, "bounds", WaitMode::Wait).is_some());
    assert!(device.get_property::<Box3>(world, "bounds", WaitMode::NoWait).is_some());
    // Wrong type is simply unavailable
    assert_eq!(device.get_property::<f32>(world, "bounds", WaitMode::Wait), None);

    for h in [surface, positions, world] {
        device.release(h).expect("release");
    }
}

#[test]
fn test_empty_world_bounds() {
    let device = Device::new(DeviceConfig::default()).expect("device");
    let world = device.new_world().expect("world");
    device.commit_parameters(world).expect("commit");
    let bounds: Box3 = device.get_property(world, "bounds", WaitMode::Wait).expect("bounds");
    assert!(bounds.is_empty());
    device.release(world).expect("release");
}

#[test]
fn test_instanced_group_bounds() {
    let device = Device::new(DeviceConfig::default()).expect("device");
    let (surface, positions) = triangle_surface(&device, &unit_triangle());

    let surfaces = device.new_object_array(DataType::Surface, &[surface]).expect("list");
    let group = device.new_group().expect("group");
    device
        .set_parameter_object(group, "surface", DataType::Array1D, Some(surfaces))
        .expect("param");
    device.commit_parameters(group).expect("commit");

    let group_bounds: Box3 = device.get_property(group, "bounds", WaitMode::Wait).expect("group bounds");
    assert_eq!(group_bounds, Box3::new(Vec3::ZERO, Vec3::new(1.0, 1.0, 0.0)));

    let mut instances = Vec::new();
    for offset in [Vec3::new(-5.0, 0.0, 0.0), Vec3::new(5.0, 0.0, 2.0)] {
        let inst = device.new_instance("transform").expect("instance");
        device
            .set_parameter_object(inst, "group", DataType::Group, Some(group))
            .expect("group param");
        device
            .set_parameter(inst, "transform", Mat4::from_translation(offset))
            .expect("transform");
        device.commit_parameters(inst).expect("commit");
        instances.push(inst);
    }

    let list = device.new_object_array(DataType::Instance, &instances).expect("instances");
    let world = device.new_world().expect("world");
    device
        .set_parameter_object(world, "instance", DataType::Array1D, Some(list))
        .expect("param");
    device.commit_parameters(world).expect("commit");

    let bounds: Box3 = device.get_property(world, "bounds", WaitMode::Wait).expect("bounds");
    assert_eq!(bounds, Box3::new(Vec3::new(-5.0, 0.0, 0.0), Vec3::new(6.0, 1.0, 2.0)));

    // Moving one instance only rebuilds the top level
    device
        .set_parameter(instances[0], "transform", Mat4::from_translation(Vec3::new(-9.0, 0.0, 0.0)))
        .expect("transform");
    device.commit_parameters(instances[0]).expect("commit");
    let bounds: Box3 = device.get_property(world, "bounds", WaitMode::Wait).expect("bounds");
    assert_eq!(bounds.lower.x, -9.0);
    assert_eq!(counter(&device, world, "tlsBuildCount"), 2);
    assert_eq!(counter(&device, world, "blsBuildCount"), 1);

    for h in instances.into_iter().chain([list, world, group, surfaces, surface, positions]) {
        device.release(h).expect("release");
    }
    assert!(device.object_counts().is_empty());
}

#[test]
fn test_invalid_surface_rejected_from_bls() {
    let device = Device::new(DeviceConfig::default()).expect("device");
    let (good, positions) = triangle_surface(&device, &unit_triangle());
    // Surface without geometry never becomes valid
    let bad = device.new_surface().expect("surface");
    device.commit_parameters(bad).expect("commit");

    let world = world_with_surfaces(&device, &[good, bad]);
    let bounds: Box3 = device.get_property(world, "bounds", WaitMode::Wait).expect("bounds");
    assert_eq!(bounds, Box3::new(Vec3::ZERO, Vec3::new(1.0, 1.0, 0.0)));

    for h in [good, bad, positions, world] {
        device.release(h).expect("release");
    }
}

#[test]
fn test_deferred_commits_flush_on_wait() {
    let config = DeviceConfig {
        defer_commits: true,
        ..DeviceConfig::default()
    };
    let device = Device::new(config).expect("device");
    let (surface, positions) = triangle_surface(&device, &unit_triangle());
    assert_eq!(device.commit_state(surface).expect("state"), CommitState::CommitPending);

    let world = world_with_surfaces(&device, &[surface]);
    let bounds: Box3 = device.get_property(world, "bounds", WaitMode::Wait).expect("bounds");
    assert!(!bounds.is_empty());
    assert_eq!(device.commit_state(surface).expect("state"), CommitState::Committed);
    assert_eq!(device.commit_state(world).expect("state"), CommitState::Committed);

    for h in [surface, positions, world] {
        device.release(h).expect("release");
    }
}

#[test]
fn test_commit_without_changes_is_a_no_op() {
    let device = Device::new(DeviceConfig::default()).expect("device");
    let (surface, positions) = triangle_surface(&device, &unit_triangle());
    let world = world_with_surfaces(&device, &[surface]);
    let _: Option<Box3> = device.get_property(world, "bounds", WaitMode::Wait);

    device.commit_parameters(world).expect("commit");
    device.commit_parameters(world).expect("commit");
    let _: Option<Box3> = device.get_property(world, "bounds", WaitMode::Wait);
    assert_eq!(counter(&device, world, "tlsBuildCount"), 1);

    device.set_parameter(world, "id", 4u32).expect("id");
    assert_eq!(device.commit_state(world).expect("state"), CommitState::Uncommitted);
    device.commit_parameters(world).expect("commit");
    assert_eq!(device.commit_state(world).expect("state"), CommitState::Committed);

    // Writing the same value again is not a change
    device.set_parameter(world, "id", 4u32).expect("id");
    assert_eq!(device.commit_state(world).expect("state"), CommitState::Committed);

    for h in [surface, positions, world] {
        device.release(h).expect("release");
    }
}

#[test]
fn test_refcounts_balance_after_scene_teardown() {
    let device = Device::new(DeviceConfig::default()).expect("device");
    let (surface, positions) = triangle_surface(&device, &unit_triangle());
    let world = world_with_surfaces(&device, &[surface]);
    let _: Option<Box3> = device.get_property(world, "bounds", WaitMode::Wait);

    assert_eq!(device.use_count(surface, RefType::Public).expect("count"), 1);
    assert!(device.use_count(surface, RefType::Internal).expect("count") >= 1);

    // Release in dependency order reversed: the world keeps the rest alive
    device.release(surface).expect("release");
    device.release(positions).expect("release");
    assert!(!device.object_counts().is_empty());
    device.release(world).expect("release");
    assert!(device.object_counts().is_empty());
}

/// Two-triangle mesh over shared vertex memory, reached through
/// surface -> group -> instance -> world. Dropping every public handle
/// below the world leaves the world's bounds untouched.
#[test]
fn test_bounds_survive_releasing_scene_handles() {
    let device = Device::new(DeviceConfig::default()).expect("device");
    let mut vertices = vec![
        Vec3::new(-1.0, -2.0, 0.0),
        Vec3::new(3.0, -2.0, 0.0),
        Vec3::new(3.0, 4.0, 1.0),
        Vec3::new(-1.0, 4.0, 1.0),
    ];
    // SAFETY: `vertices` outlives the array's reads; the array privatizes
    // its contents when the public handle is released below.
    let memory = unsafe { AppMemory::from_slice(&mut vertices) };
    let positions = device
        .new_array1d(ArrayDescriptor::new_1d(DataType::Float32Vec3, 4).shared(memory))
        .expect("shared positions");
    let indices = device
        .new_array1d(ArrayDescriptor::new_1d(DataType::UInt32Vec3, 2))
        .expect("indices");
    device
        .write_array(indices, 0, &[UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)])
        .expect("write");

    let geometry = device.new_geometry("triangle").expect("geometry");
    device
        .set_parameter_object(geometry, "vertex.position", DataType::Array1D, Some(positions))
        .expect("param");
    device
        .set_parameter_object(geometry, "primitive.index", DataType::Array1D, Some(indices))
        .expect("param");
    device.commit_parameters(geometry).expect("commit");

    let surface = device.new_surface().expect("surface");
    device
        .set_parameter_object(surface, "geometry", DataType::Geometry, Some(geometry))
        .expect("param");
    device.commit_parameters(surface).expect("commit");

    let surfaces = device.new_object_array(DataType::Surface, &[surface]).expect("list");
    let group = device.new_group().expect("group");
    device
        .set_parameter_object(group, "surface", DataType::Array1D, Some(surfaces))
        .expect("param");
    device.commit_parameters(group).expect("commit");

    let instance = device.new_instance("transform").expect("instance");
    device
        .set_parameter_object(instance, "group", DataType::Group, Some(group))
        .expect("param");
    device.commit_parameters(instance).expect("commit");

    let instances = device.new_object_array(DataType::Instance, &[instance]).expect("list");
    let world = device.new_world().expect("world");
    device
        .set_parameter_object(world, "instance", DataType::Array1D, Some(instances))
        .expect("param");
    device.commit_parameters(world).expect("commit");

    let expected = Box3::new(Vec3::new(-1.0, -2.0, 0.0), Vec3::new(3.0, 4.0, 1.0));
    let before: Box3 = device.get_property(world, "bounds", WaitMode::Wait).expect("bounds");
    assert_eq!(before, expected);

    for h in [surface, surfaces, geometry, positions, indices] {
        device.release(h).expect("release");
    }
    assert!(device.use_count(surface, RefType::Internal).expect("count") >= 1);
    vertices.iter_mut().for_each(|v| *v = Vec3::splat(100.0));
    drop(vertices);

    let after: Box3 = device.get_property(world, "bounds", WaitMode::Wait).expect("bounds");
    assert_eq!(after, expected);

    // A forced rebuild reads the privatized copy, not the app memory
    device.set_parameter(instance, "id", 4u32).expect("id");
    device.commit_parameters(instance).expect("commit");
    let rebuilt: Box3 = device.get_property(world, "bounds", WaitMode::Wait).expect("bounds");
    assert_eq!(rebuilt, expected);

    for h in [instances, instance, group, world] {
        device.release(h).expect("release");
    }
    assert!(device.object_counts().is_empty());
}
