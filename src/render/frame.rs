//! Frame - pixel channels and the render loop that fills them.
//!
//! `render` brings the world's acceleration structures up to date on the
//! calling thread, then hands the image to a background thread that splits
//! it into square tiles and shades them on the device's rayon pool.

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::Mutex;
use rayon::prelude::*;

use super::renderer::PixelSample;
use crate::core::{AnyValue, Completion, ObjectContext, ObjectImpl, ObjectRef, ParameterTable, Severity, WaitMode};
use crate::util::{cast_elements, DataType, UVec2, Vec2, Vec4};

/// Copy of one channel handed out by `map`.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedChannel {
    pub width: u32,
    pub height: u32,
    /// `Unknown` for channels the frame does not have
    pub pixel_type: DataType,
    pub data: Vec<u8>,
}

impl MappedChannel {
    pub(crate) fn missing() -> Self {
        Self {
            width: 0,
            height: 0,
            pixel_type: DataType::Unknown,
            data: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Pixels as `T` (for example `Vec4`, `[u8; 4]`, `f32` or `u32`).
    pub fn values<T: bytemuck::Pod>(&self) -> Cow<'_, [T]> {
        cast_elements(&self.data)
    }
}

fn is_color_type(ty: DataType) -> bool {
    matches!(
        ty,
        DataType::Float32Vec4 | DataType::UFixed8Vec4 | DataType::UFixed8RgbaSrgb
    )
}

#[inline]
fn to_unorm8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn encode_color(ty: DataType, c: Vec4, out: &mut [u8]) {
    match ty {
        DataType::Float32Vec4 => out.copy_from_slice(bytemuck::bytes_of(&c)),
        DataType::UFixed8Vec4 => {
            out.copy_from_slice(&[to_unorm8(c.x), to_unorm8(c.y), to_unorm8(c.z), to_unorm8(c.w)])
        }
        DataType::UFixed8RgbaSrgb => {
            let s = |v: f32| to_unorm8(v.max(0.0).powf(1.0 / 2.2));
            out.copy_from_slice(&[s(c.x), s(c.y), s(c.z), to_unorm8(c.w)]);
        }
        _ => {}
    }
}

/// Storage for every enabled channel.
#[derive(Debug, Default)]
struct Channels {
    size: UVec2,
    color_type: DataType,
    color: Vec<u8>,
    depth: Vec<f32>,
    prim_id: Vec<u32>,
    obj_id: Vec<u32>,
    inst_id: Vec<u32>,
}

impl Channels {
    fn pixel_count(&self) -> usize {
        self.size.x as usize * self.size.y as usize
    }

    fn write(&mut self, idx: usize, s: &PixelSample) {
        let bpp = self.color_type.num_bytes().unwrap_or(0);
        if let Some(px) = self.color.get_mut(idx * bpp..(idx + 1) * bpp) {
            encode_color(self.color_type, s.color, px);
        }
        if let Some(d) = self.depth.get_mut(idx) {
            *d = s.depth;
        }
        if let Some(p) = self.prim_id.get_mut(idx) {
            *p = s.prim_id;
        }
        if let Some(o) = self.obj_id.get_mut(idx) {
            *o = s.obj_id;
        }
        if let Some(i) = self.inst_id.get_mut(idx) {
            *i = s.inst_id;
        }
    }

    fn clear(&mut self) {
        self.color.fill(0);
        self.depth.fill(0.0);
        self.prim_id.fill(0);
        self.obj_id.fill(0);
        self.inst_id.fill(0);
    }

    fn map(&self, channel: &str) -> MappedChannel {
        let (pixel_type, data): (DataType, &[u8]) = match channel {
            "channel.color" if !self.color.is_empty() => (self.color_type, &self.color),
            "channel.depth" if !self.depth.is_empty() => (DataType::Float32, bytemuck::cast_slice(&self.depth)),
            "channel.primitiveId" if !self.prim_id.is_empty() => {
                (DataType::UInt32, bytemuck::cast_slice(&self.prim_id))
            }
            "channel.objectId" if !self.obj_id.is_empty() => (DataType::UInt32, bytemuck::cast_slice(&self.obj_id)),
            "channel.instanceId" if !self.inst_id.is_empty() => {
                (DataType::UInt32, bytemuck::cast_slice(&self.inst_id))
            }
            _ => return MappedChannel::missing(),
        };
        MappedChannel {
            width: self.size.x,
            height: self.size.y,
            pixel_type,
            data: data.to_vec(),
        }
    }
}

/// Pixel rectangle `[x0, x1) x [y0, y1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Tile {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

fn tiles(size: UVec2, tile_size: u32) -> Vec<Tile> {
    let ts = tile_size.max(1);
    let mut out = Vec::new();
    for y0 in (0..size.y).step_by(ts as usize) {
        for x0 in (0..size.x).step_by(ts as usize) {
            out.push(Tile {
                x0,
                y0,
                x1: (x0 + ts).min(size.x),
                y1: (y0 + ts).min(size.y),
            });
        }
    }
    out
}

#[derive(Debug)]
pub(crate) struct Frame {
    renderer: Option<ObjectRef>,
    camera: Option<ObjectRef>,
    world: Option<ObjectRef>,

    size: UVec2,
    color_type: Option<DataType>,
    depth_type: Option<DataType>,
    prim_id_type: Option<DataType>,
    obj_id_type: Option<DataType>,
    inst_id_type: Option<DataType>,
    valid: bool,

    channels: Arc<Mutex<Channels>>,
    duration: Arc<AtomicU32>,
    discarded: Arc<AtomicBool>,
    completion: Option<Arc<Completion>>,
    worker: Option<JoinHandle<()>>,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            renderer: None,
            camera: None,
            world: None,
            size: UVec2::splat(10),
            color_type: None,
            depth_type: None,
            prim_id_type: None,
            obj_id_type: None,
            inst_id_type: None,
            valid: false,
            channels: Arc::new(Mutex::new(Channels::default())),
            duration: Arc::new(AtomicU32::new(0)),
            discarded: Arc::new(AtomicBool::new(false)),
            completion: None,
            worker: None,
        }
    }

    /// True once the last render finished (or if none was started).
    pub fn ready(&self) -> bool {
        self.completion.as_ref().map_or(true, |c| c.is_done())
    }

    pub fn wait(&mut self) {
        if let Some(c) = &self.completion {
            c.wait();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("frame render thread panicked");
            }
        }
    }

    pub fn duration(&self) -> f32 {
        f32::from_bits(self.duration.load(Ordering::Acquire))
    }

    /// Stop shading tiles that have not started yet.
    pub fn discard(&mut self) {
        self.discarded.store(true, Ordering::Release);
    }

    pub fn map(&mut self, channel: &str) -> MappedChannel {
        self.wait();
        self.channels.lock().map(channel)
    }

    /// Start rendering; returns immediately.
    pub fn render(&mut self, ctx: &ObjectContext<'_>) {
        self.wait();
        let start = Instant::now();
        let inputs = match (&self.renderer, &self.camera, &self.world) {
            (Some(r), Some(c), Some(w)) if self.valid => {
                let renderer = r.read().as_renderer().map(|r| r.data());
                let camera = c.read().as_camera().map(|c| c.data());
                let wctx = ObjectContext::new(ctx.state, w.record());
                let scene = w.write().as_world_mut().map(|w| w.scene_update(&wctx));
                renderer.zip(camera).zip(scene)
            }
            _ => None,
        };

        let completion = Arc::new(Completion::new());
        ctx.state.set_current_frame(Arc::clone(&completion));
        self.completion = Some(Arc::clone(&completion));
        self.discarded.store(false, Ordering::Release);

        let Some(((renderer, camera), scene)) = inputs else {
            ctx.report(Severity::Error, "skipping render of incomplete frame object");
            self.channels.lock().clear();
            self.duration.store(0, Ordering::Release);
            completion.complete();
            return;
        };

        let size = self.size;
        let inv_size = Vec2::ONE / size.as_vec2();
        let tiles = tiles(size, ctx.state.config.tile_size);
        let pool = Arc::clone(&ctx.state.pool);
        let channels = Arc::clone(&self.channels);
        let duration = Arc::clone(&self.duration);
        let discarded = Arc::clone(&self.discarded);
        let done = Arc::clone(&completion);

        let spawned = std::thread::Builder::new()
            .name("prism-frame".into())
            .spawn(move || {
                let _span = tracing::debug_span!("render_frame", width = size.x, height = size.y).entered();
                pool.install(|| {
                    tiles.par_iter().for_each(|tile| {
                        if discarded.load(Ordering::Acquire) {
                            return;
                        }
                        let mut samples = Vec::with_capacity(((tile.x1 - tile.x0) * (tile.y1 - tile.y0)) as usize);
                        for y in tile.y0..tile.y1 {
                            for x in tile.x0..tile.x1 {
                                let screen = Vec2::new(x as f32, y as f32) * inv_size;
                                let ray = camera.ray(screen);
                                let idx = y as usize * size.x as usize + x as usize;
                                samples.push((idx, renderer.render_sample(screen, &ray, &scene)));
                            }
                        }
                        let mut ch = channels.lock();
                        for (idx, s) in &samples {
                            ch.write(*idx, s);
                        }
                    });
                });
                let elapsed = start.elapsed().as_secs_f32();
                duration.store(elapsed.to_bits(), Ordering::Release);
                tracing::debug!(seconds = elapsed, "frame rendered");
                done.complete();
            });

        match spawned {
            Ok(handle) => self.worker = Some(handle),
            Err(e) => {
                ctx.report(Severity::Error, format!("failed to start render thread: {e}"));
                completion.complete();
            }
        }
    }
}

impl ObjectImpl for Frame {
    fn commit_parameters(&mut self, params: &ParameterTable, _ctx: &ObjectContext<'_>) {
        self.renderer = params.get_object("renderer", DataType::Renderer);
        self.camera = params.get_object("camera", DataType::Camera);
        self.world = params.get_object("world", DataType::World);
        self.size = params.get_or("size", UVec2::splat(10));
        self.color_type = params.get_data_type("channel.color");
        self.depth_type = params.get_data_type("channel.depth");
        self.prim_id_type = params.get_data_type("channel.primitiveId");
        self.obj_id_type = params.get_data_type("channel.objectId");
        self.inst_id_type = params.get_data_type("channel.instanceId");
    }

    fn finalize(&mut self, ctx: &ObjectContext<'_>) {
        self.wait();
        for (name, present) in [
            ("renderer", self.renderer.is_some()),
            ("camera", self.camera.is_some()),
            ("world", self.world.is_some()),
        ] {
            if !present {
                ctx.warn(format!("missing required parameter '{name}' on frame"));
            }
        }
        if self.size.cmpeq(UVec2::ZERO).any() {
            ctx.warn("frame 'size' must be non-zero");
        }

        let color_type = match self.color_type {
            Some(ty) if is_color_type(ty) => ty,
            Some(ty) => {
                ctx.warn(format!("unsupported color channel type {ty}"));
                DataType::Unknown
            }
            None => DataType::Unknown,
        };
        let wants = |ty: Option<DataType>, expected: DataType, name: &str| match ty {
            Some(t) if t == expected => true,
            Some(t) => {
                ctx.warn(format!("unsupported {name} channel type {t}"));
                false
            }
            None => false,
        };
        let depth = wants(self.depth_type, DataType::Float32, "depth");
        let prim_id = wants(self.prim_id_type, DataType::UInt32, "primitiveId");
        let obj_id = wants(self.obj_id_type, DataType::UInt32, "objectId");
        let inst_id = wants(self.inst_id_type, DataType::UInt32, "instanceId");

        let valid_ref = |r: &Option<ObjectRef>| r.as_ref().is_some_and(|o| o.is_valid());
        self.valid = valid_ref(&self.renderer)
            && valid_ref(&self.camera)
            && valid_ref(&self.world)
            && self.size.cmpgt(UVec2::ZERO).all();

        let mut ch = Channels {
            size: self.size,
            color_type,
            ..Channels::default()
        };
        let n = ch.pixel_count();
        let bpp = color_type.num_bytes().unwrap_or(0);
        ch.color = vec![0; n * bpp];
        ch.depth = if depth { vec![0.0; n] } else { Vec::new() };
        ch.prim_id = if prim_id { vec![0; n] } else { Vec::new() };
        ch.obj_id = if obj_id { vec![0; n] } else { Vec::new() };
        ch.inst_id = if inst_id { vec![0; n] } else { Vec::new() };
        *self.channels.lock() = ch;
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn get_property(
        &mut self,
        name: &str,
        ty: DataType,
        wait: WaitMode,
        _ctx: &ObjectContext<'_>,
    ) -> Option<AnyValue> {
        match (name, ty) {
            ("duration", DataType::Float32) => {
                if wait == WaitMode::Wait {
                    self.wait();
                }
                Some(AnyValue::new(self.duration()))
            }
            _ => None,
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiles_cover_image() {
        let t = tiles(UVec2::new(20, 10), 8);
        assert_eq!(t.len(), 6);
        assert_eq!(t[2], Tile { x0: 16, y0: 0, x1: 20, y1: 8 });
        let covered: u32 = t.iter().map(|t| (t.x1 - t.x0) * (t.y1 - t.y0)).sum();
        assert_eq!(covered, 200);
    }

    #[test]
    fn test_color_encoding() {
        let mut px = [0u8; 4];
        encode_color(DataType::UFixed8Vec4, Vec4::new(1.0, 0.5, 0.0, 2.0), &mut px);
        assert_eq!(px, [255, 128, 0, 255]);

        encode_color(DataType::UFixed8RgbaSrgb, Vec4::new(0.5, 0.0, 1.0, 0.5), &mut px);
        assert_eq!(px[0], to_unorm8(0.5f32.powf(1.0 / 2.2)));
        assert_eq!(px[3], 128);

        let mut wide = [0u8; 16];
        encode_color(DataType::Float32Vec4, Vec4::new(0.25, 0.5, 0.75, 1.0), &mut wide);
        assert_eq!(bytemuck::cast_slice::<u8, f32>(&wide), &[0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_channels_map() {
        let mut ch = Channels {
            size: UVec2::new(2, 1),
            color_type: DataType::UFixed8Vec4,
            color: vec![0; 8],
            depth: vec![0.0; 2],
            ..Channels::default()
        };
        let s = PixelSample {
            color: Vec4::ONE,
            depth: 3.0,
            prim_id: 1,
            obj_id: 2,
            inst_id: 3,
        };
        ch.write(1, &s);

        let color = ch.map("channel.color");
        assert_eq!(color.pixel_type, DataType::UFixed8Vec4);
        assert_eq!(color.values::<[u8; 4]>().as_ref(), &[[0, 0, 0, 0], [255, 255, 255, 255]]);
        assert_eq!(ch.map("channel.depth").values::<f32>().as_ref(), &[0.0, 3.0]);

        let ids = ch.map("channel.primitiveId");
        assert!(ids.is_empty());
        assert_eq!(ids.pixel_type, DataType::Unknown);
    }
}
