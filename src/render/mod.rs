//! Rendering: the sample renderer and the frame that drives it.

mod frame;
mod renderer;

pub use frame::MappedChannel;
pub use renderer::{bool_color, random_color, PixelSample, RenderMode};

pub(crate) use frame::Frame;
pub(crate) use renderer::{Renderer, RendererData};
