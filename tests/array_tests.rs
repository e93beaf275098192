//! Integration tests for array ownership, windows and mapping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use prism::{
    AppMemory, ArrayDescriptor, Box3, DataType, Device, DeviceConfig, Handle, Severity, StatusMessage, Vec3,
    WaitMode,
};

type StatusLog = Arc<Mutex<Vec<StatusMessage>>>;

fn device_with_log() -> (Device, StatusLog) {
    let device = Device::new(DeviceConfig::default()).expect("device");
    let log: StatusLog = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    device.set_status_callback(Some(Arc::new(move |m: &StatusMessage| sink.lock().push(m.clone()))));
    (device, log)
}

fn count_messages(log: &StatusLog, severity: Severity, needle: &str) -> usize {
    log.lock()
        .iter()
        .filter(|m| m.severity == severity && m.message.contains(needle))
        .count()
}

/// World with one surface over `positions`; returns (world, geometry).
fn world_over(device: &Device, positions: Handle) -> (Handle, Handle) {
    let geometry = device.new_geometry("triangle").expect("geometry");
    device
        .set_parameter_object(geometry, "vertex.position", DataType::Array1D, Some(positions))
        .expect("positions");
    device.commit_parameters(geometry).expect("commit geometry");

    let material = device.new_material("matte").expect("material");
    device.commit_parameters(material).expect("commit material");

    let surface = device.new_surface().expect("surface");
    device
        .set_parameter_object(surface, "geometry", DataType::Geometry, Some(geometry))
        .expect("geometry param");
    device
        .set_parameter_object(surface, "material", DataType::Material, Some(material))
        .expect("material param");
    device.commit_parameters(surface).expect("commit surface");

    let surfaces = device.new_object_array(DataType::Surface, &[surface]).expect("surfaces");
    let world = device.new_world().expect("world");
    device
        .set_parameter_object(world, "surface", DataType::Array1D, Some(surfaces))
        .expect("surface param");
    device.commit_parameters(world).expect("commit world");

    for h in [material, surface, surfaces] {
        device.release(h).expect("release");
    }
    (world, geometry)
}

#[test]
fn test_shared_array_privatized_on_release() {
    let (device, log) = device_with_log();
    let mut vertices = vec![Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 2.0, 0.0)];
    // SAFETY: `vertices` outlives every read the array makes of it before
    // the array is privatized below.
    let memory = unsafe { AppMemory::from_slice(&mut vertices) };
    let positions = device
        .new_array1d(ArrayDescriptor::new_1d(DataType::Float32Vec3, 3).shared(memory))
        .expect("shared array");

    let (world, geometry) = world_over(&device, positions);
    let bounds: Box3 = device.get_property(world, "bounds", WaitMode::Wait).expect("bounds");
    assert_eq!(bounds, Box3::new(Vec3::ZERO, Vec3::new(1.0, 2.0, 0.0)));

    // Last public reference goes away while the geometry still uses it
    device.release(positions).expect("release positions");
    assert_eq!(count_messages(&log, Severity::PerformanceWarning, "private copy"), 1);

    vertices[2] = Vec3::new(0.0, 9.0, 0.0);
    drop(vertices);

    device.set_parameter(geometry, "id", 7u32).expect("id");
    device.commit_parameters(geometry).expect("recommit");
    let bounds: Box3 = device.get_property(world, "bounds", WaitMode::Wait).expect("bounds");
    assert_eq!(bounds.upper, Vec3::new(1.0, 2.0, 0.0));

    device.release(geometry).expect("release geometry");
    device.release(world).expect("release world");
    assert!(device.object_counts().is_empty());
}

#[test]
fn test_window_bounds_swapped() {
    let (device, log) = device_with_log();
    let vertices: Vec<Vec3> = (0..8).map(|i| Vec3::new(i as f32, (i % 3) as f32, 0.0)).collect();
    let positions = device
        .new_array1d(ArrayDescriptor::new_1d(DataType::Float32Vec3, vertices.len()))
        .expect("array");
    device.write_array(positions, 0, &vertices).expect("write");

    device.set_parameter(positions, "begin", 5u64).expect("begin");
    device.set_parameter(positions, "end", 2u64).expect("end");
    device.commit_parameters(positions).expect("commit array");
    assert_eq!(count_messages(&log, Severity::Warning, "swapping"), 1);

    // Window [2, 5) holds vertices 2, 3 and 4: one triangle
    let (world, geometry) = world_over(&device, positions);
    let bounds: Box3 = device.get_property(world, "bounds", WaitMode::Wait).expect("bounds");
    assert_eq!(bounds, Box3::new(Vec3::new(2.0, 0.0, 0.0), Vec3::new(4.0, 2.0, 0.0)));

    for h in [positions, geometry, world] {
        device.release(h).expect("release");
    }
}

#[test]
fn test_double_map_and_unmap_warn() {
    let (device, log) = device_with_log();
    let a = device
        .new_array1d(ArrayDescriptor::new_1d(DataType::Float32, 4))
        .expect("array");

    let first = device.map_array(a).expect("map");
    let second = device.map_array(a).expect("map again");
    assert_eq!(first, second);
    assert_eq!(count_messages(&log, Severity::Warning, "mapped again"), 1);

    // SAFETY: the array is mapped and holds four floats
    unsafe { first.as_ptr().cast::<f32>().write_unaligned(3.5) };
    device.unmap_array(a).expect("unmap");
    device.unmap_array(a).expect("unmap again");
    assert_eq!(count_messages(&log, Severity::Warning, "unmapped again"), 1);

    device.release(a).expect("release");
}

#[test]
fn test_captured_memory_deleter_runs_once() {
    let device = Device::new(DeviceConfig::default()).expect("device");
    let mut values = vec![1.0f32, 2.0, 3.0];
    let deleted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&deleted);

    // SAFETY: `values` outlives the array
    let memory = unsafe { AppMemory::from_slice(&mut values) };
    let desc = ArrayDescriptor::new_1d(DataType::Float32, 3).captured(
        memory,
        Box::new(move |_| {
            assert!(!flag.swap(true, Ordering::SeqCst), "deleter ran twice");
        }),
    );
    let a = device.new_array1d(desc).expect("captured array");
    assert!(!deleted.load(Ordering::SeqCst));
    device.release(a).expect("release");
    assert!(deleted.load(Ordering::SeqCst));
}

#[test]
fn test_unsupported_layout_is_an_error() {
    let device = Device::new(DeviceConfig::default()).expect("device");
    let desc = ArrayDescriptor::new_1d(DataType::Float32Vec3, 4).strides([16, 0, 0]);
    assert!(matches!(
        device.new_array1d(desc),
        Err(prism::Error::UnsupportedLayout { stride: 16, .. })
    ));
    assert!(device
        .new_array1d(ArrayDescriptor::new_1d(DataType::Unknown, 4))
        .is_err());
    assert!(device.object_counts().is_empty());
}

#[test]
fn test_object_array_keeps_members_alive() {
    let device = Device::new(DeviceConfig::default()).expect("device");
    let g = device.new_geometry("triangle").expect("geometry");
    let list = device.new_object_array(DataType::Geometry, &[g, g]).expect("list");
    assert_eq!(device.use_count(g, prism::RefType::Internal).expect("count"), 2);

    device.release(g).expect("release member");
    assert_eq!(device.object_counts().get(&DataType::Geometry), Some(&1));
    device.release(list).expect("release list");
    assert!(device.object_counts().is_empty());
}
