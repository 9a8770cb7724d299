mod ascii;
mod camera;
mod light_rig;
mod raster;

pub use ascii::{
    luminance, ramp_index, AsciiEffect, AsciiOptions, AsciiOutput, ColoredCell, ReadbackHint,
};
pub use camera::{OrbitControls, PerspectiveCamera};
pub use light_rig::{LightRig, LIGHT_SPIN_STEP};
pub use raster::SoftwareRenderer;

use crate::scene::SceneGraph;
use image::RgbaImage;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("renderer has been disposed")]
    Disposed,
    #[error("renderer backend failed: {0}")]
    Backend(String),
}

/// Draws a scene into an RGBA frame that can be read back on the CPU.
pub trait FrameRenderer {
    fn set_size(&mut self, width: u32, height: u32);
    fn size(&self) -> (u32, u32);
    fn render(&mut self, scene: &SceneGraph, camera: &PerspectiveCamera) -> Result<(), RenderError>;
    /// The most recently rendered frame.
    fn frame(&self) -> &RgbaImage;
    fn dispose(&mut self);
}
