//! ASCII post-process stage.
//!
//! Each frame the wrapped renderer draws the scene, the result is box-filtered
//! down into a small readback canvas of `floor(w * resolution) x floor(h * resolution)`
//! pixels, and every pixel becomes one character picked from the ramp by luminance.

use super::{FrameRenderer, PerspectiveCamera, RenderError};
use crate::config::DEFAULT_CHAR_RAMP;
use crate::scene::SceneGraph;
use image::{imageops, RgbaImage};
use serde::{Deserialize, Serialize};

const DEFAULT_RESOLUTION: f32 = 0.15;

/// How the readback canvas is used between frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadbackHint {
    /// Pixels are read every frame: keep one buffer alive and downsample into it in place.
    Frequent,
    /// Occasional reads: allocate a scaled copy per read and drop it afterwards.
    Occasional,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsciiOptions {
    pub invert: bool,
    /// Downsample factor in `(0, 1]`; lower is coarser and cheaper.
    pub resolution: f32,
    pub colorize: bool,
    pub readback: ReadbackHint,
    /// Displayed height / width of one character cell.
    pub cell_aspect: f32,
}

impl Default for AsciiOptions {
    fn default() -> Self {
        Self {
            invert: false,
            resolution: DEFAULT_RESOLUTION,
            colorize: false,
            readback: ReadbackHint::Frequent,
            cell_aspect: 1.0,
        }
    }
}

impl AsciiOptions {
    pub fn normalized(mut self) -> Self {
        if !self.resolution.is_finite() || self.resolution <= 0.0 {
            log::warn!(
                "invalid ASCII resolution {}; using {}",
                self.resolution,
                DEFAULT_RESOLUTION
            );
            self.resolution = DEFAULT_RESOLUTION;
        }
        self.resolution = self.resolution.min(1.0);
        if !self.cell_aspect.is_finite() || self.cell_aspect <= 0.0 {
            self.cell_aspect = 1.0;
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColoredCell {
    pub ch: char,
    pub rgb: [u8; 3],
}

/// Character grid emitted by the effect.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AsciiOutput {
    #[default]
    Empty,
    /// One text block, rows terminated by `'\n'`.
    Text(String),
    Colored(Vec<Vec<ColoredCell>>),
}

impl AsciiOutput {
    pub fn is_empty(&self) -> bool {
        matches!(self, AsciiOutput::Empty)
    }

    pub fn rows(&self) -> usize {
        match self {
            AsciiOutput::Empty => 0,
            AsciiOutput::Text(text) => text.lines().count(),
            AsciiOutput::Colored(rows) => rows.len(),
        }
    }

    pub fn columns(&self) -> usize {
        match self {
            AsciiOutput::Empty => 0,
            AsciiOutput::Text(text) => text.lines().next().map_or(0, |line| line.chars().count()),
            AsciiOutput::Colored(rows) => rows.first().map_or(0, Vec::len),
        }
    }
}

/// Luma in `[0, 1]` from 8-bit RGB (BT.601 weights).
pub fn luminance(r: u8, g: u8, b: u8) -> f32 {
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32) / 255.0
}

/// Ramp slot for a luminance value: rounded, clamped to `[0, ramp_len - 1]`.
pub fn ramp_index(luminance: f32, ramp_len: usize, invert: bool) -> usize {
    if ramp_len == 0 {
        return 0;
    }
    let mut value = if luminance.is_finite() {
        luminance.clamp(0.0, 1.0)
    } else {
        0.0
    };
    if invert {
        value = 1.0 - value;
    }
    let last = ramp_len - 1;
    ((value * last as f32).round() as usize).min(last)
}

struct ReadbackCanvas {
    hint: ReadbackHint,
    retained: RgbaImage,
}

impl ReadbackCanvas {
    fn new(hint: ReadbackHint) -> Self {
        Self {
            hint,
            retained: RgbaImage::new(0, 0),
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.retained = match self.hint {
            ReadbackHint::Frequent => RgbaImage::new(width, height),
            ReadbackHint::Occasional => RgbaImage::new(0, 0),
        };
    }

    /// Draws `source` scaled to `width x height` and hands the pixels to `read`.
    fn draw_and_read<T>(
        &mut self,
        source: &RgbaImage,
        width: u32,
        height: u32,
        read: impl FnOnce(&RgbaImage) -> T,
    ) -> T {
        match self.hint {
            ReadbackHint::Frequent => {
                if self.retained.dimensions() != (width, height) {
                    self.retained = RgbaImage::new(width, height);
                }
                box_downsample_into(source, &mut self.retained);
                read(&self.retained)
            }
            ReadbackHint::Occasional => {
                let scaled = imageops::thumbnail(source, width, height);
                read(&scaled)
            }
        }
    }
}

/// Area-average `source` into every pixel of `target`.
fn box_downsample_into(source: &RgbaImage, target: &mut RgbaImage) {
    let (src_w, src_h) = source.dimensions();
    let (dst_w, dst_h) = target.dimensions();
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return;
    }
    for ty in 0..dst_h {
        let y0 = (ty as u64 * src_h as u64 / dst_h as u64) as u32;
        let y1 = (((ty + 1) as u64 * src_h as u64 / dst_h as u64) as u32).max(y0 + 1);
        for tx in 0..dst_w {
            let x0 = (tx as u64 * src_w as u64 / dst_w as u64) as u32;
            let x1 = (((tx + 1) as u64 * src_w as u64 / dst_w as u64) as u32).max(x0 + 1);
            let mut sum = [0u32; 4];
            let mut count = 0u32;
            for sy in y0..y1.min(src_h) {
                for sx in x0..x1.min(src_w) {
                    let pixel = source.get_pixel(sx, sy).0;
                    for (acc, channel) in sum.iter_mut().zip(pixel) {
                        *acc += channel as u32;
                    }
                    count += 1;
                }
            }
            let count = count.max(1);
            target.put_pixel(
                tx,
                ty,
                image::Rgba([
                    (sum[0] / count) as u8,
                    (sum[1] / count) as u8,
                    (sum[2] / count) as u8,
                    (sum[3] / count) as u8,
                ]),
            );
        }
    }
}

pub struct AsciiEffect {
    renderer: Box<dyn FrameRenderer>,
    ramp: Vec<char>,
    options: AsciiOptions,
    width: u32,
    height: u32,
    columns: u32,
    rows: u32,
    font_size_px: f32,
    line_height_px: f32,
    canvas: ReadbackCanvas,
    output: AsciiOutput,
}

impl AsciiEffect {
    /// `ramp` runs from darkest/sparsest to densest.
    pub fn new(renderer: Box<dyn FrameRenderer>, ramp: &str, options: AsciiOptions) -> Self {
        let mut ramp: Vec<char> = ramp.chars().collect();
        if ramp.is_empty() {
            log::warn!("empty character ramp; using default '{}'", DEFAULT_CHAR_RAMP);
            ramp = DEFAULT_CHAR_RAMP.chars().collect();
        }
        let options = options.normalized();
        Self {
            renderer,
            ramp,
            canvas: ReadbackCanvas::new(options.readback),
            options,
            width: 0,
            height: 0,
            columns: 0,
            rows: 0,
            font_size_px: 0.0,
            line_height_px: 0.0,
            output: AsciiOutput::Empty,
        }
    }

    pub fn options(&self) -> &AsciiOptions {
        &self.options
    }

    pub fn renderer(&self) -> &dyn FrameRenderer {
        self.renderer.as_ref()
    }

    pub fn renderer_mut(&mut self) -> &mut dyn FrameRenderer {
        self.renderer.as_mut()
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.renderer.set_size(width, height);
        self.columns = (width as f32 * self.options.resolution).floor() as u32;
        self.rows = (height as f32 * self.options.resolution).floor() as u32;
        self.canvas.resize(self.columns, self.rows);
        self.font_size_px = if self.columns > 0 {
            width as f32 / self.columns as f32
        } else {
            0.0
        };
        self.line_height_px = if self.rows > 0 {
            height as f32 / self.rows as f32
        } else {
            0.0
        };
    }

    /// Character grid size as `(columns, rows)`.
    pub fn grid_size(&self) -> (u32, u32) {
        (self.columns, self.rows)
    }

    /// Pixel width of one character cell at the current size.
    pub fn font_size_px(&self) -> f32 {
        self.font_size_px
    }

    pub fn line_height_px(&self) -> f32 {
        self.line_height_px
    }

    pub fn output(&self) -> &AsciiOutput {
        &self.output
    }

    /// Renders and converts one frame. A zero-sized target is a no-op.
    pub fn render(
        &mut self,
        scene: &SceneGraph,
        camera: &PerspectiveCamera,
    ) -> Result<(), RenderError> {
        if self.width == 0 || self.height == 0 || self.columns == 0 || self.rows == 0 {
            return Ok(());
        }
        self.renderer.render(scene, camera)?;

        let ramp = &self.ramp;
        let options = self.options;
        let (columns, rows) = (self.columns, self.rows);
        let frame = self.renderer.frame();
        self.output = self.canvas.draw_and_read(frame, columns, rows, |pixels| {
            if options.colorize {
                colored_grid(pixels, ramp, options.invert)
            } else {
                text_grid(pixels, ramp, options.invert)
            }
        });
        Ok(())
    }

    /// Clears the emitted grid. The host element itself belongs to the caller.
    pub fn dispose(&mut self) {
        self.output = AsciiOutput::Empty;
    }
}

fn text_grid(pixels: &RgbaImage, ramp: &[char], invert: bool) -> AsciiOutput {
    let (width, height) = pixels.dimensions();
    let mut text = String::with_capacity(((width + 1) * height) as usize);
    for row in pixels.rows() {
        for pixel in row {
            let [r, g, b, _] = pixel.0;
            text.push(ramp[ramp_index(luminance(r, g, b), ramp.len(), invert)]);
        }
        text.push('\n');
    }
    AsciiOutput::Text(text)
}

fn colored_grid(pixels: &RgbaImage, ramp: &[char], invert: bool) -> AsciiOutput {
    let rows = pixels
        .rows()
        .map(|row| {
            row.map(|pixel| {
                let [r, g, b, _] = pixel.0;
                ColoredCell {
                    ch: ramp[ramp_index(luminance(r, g, b), ramp.len(), invert)],
                    rgb: [r, g, b],
                }
            })
            .collect()
        })
        .collect();
    AsciiOutput::Colored(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    /// Fills its frame with one color; counts render calls.
    struct SolidRenderer {
        color: [u8; 4],
        frame: RgbaImage,
        renders: usize,
    }

    impl SolidRenderer {
        fn new(color: [u8; 4]) -> Self {
            Self {
                color,
                frame: RgbaImage::new(0, 0),
                renders: 0,
            }
        }
    }

    impl FrameRenderer for SolidRenderer {
        fn set_size(&mut self, width: u32, height: u32) {
            self.frame = RgbaImage::new(width, height);
        }

        fn size(&self) -> (u32, u32) {
            self.frame.dimensions()
        }

        fn render(&mut self, _: &SceneGraph, _: &PerspectiveCamera) -> Result<(), RenderError> {
            self.renders += 1;
            for pixel in self.frame.pixels_mut() {
                *pixel = Rgba(self.color);
            }
            Ok(())
        }

        fn frame(&self) -> &RgbaImage {
            &self.frame
        }

        fn dispose(&mut self) {}
    }

    fn effect(color: [u8; 4], options: AsciiOptions) -> AsciiEffect {
        AsciiEffect::new(Box::new(SolidRenderer::new(color)), " .:#@", options)
    }

    fn camera() -> PerspectiveCamera {
        PerspectiveCamera::new(45.0, 1.0)
    }

    #[test]
    fn luminance_boundaries_map_to_ramp_ends() {
        assert_eq!(ramp_index(0.0, 10, false), 0);
        assert_eq!(ramp_index(1.0, 10, false), 9);
        assert_eq!(ramp_index(0.0, 10, true), 9);
        assert_eq!(ramp_index(1.0, 10, true), 0);
        assert_eq!(ramp_index(luminance(255, 255, 255), 10, false), 9);
        assert_eq!(ramp_index(luminance(0, 0, 0), 10, false), 0);
    }

    #[test]
    fn fractional_luminance_rounds_to_nearest() {
        // 0.5 * 4 = 2.0, 0.6 * 4 = 2.4, 0.65 * 4 = 2.6
        assert_eq!(ramp_index(0.5, 5, false), 2);
        assert_eq!(ramp_index(0.6, 5, false), 2);
        assert_eq!(ramp_index(0.65, 5, false), 3);
        assert_eq!(ramp_index(0.65, 5, true), 1);
    }

    #[test]
    fn out_of_range_luminance_is_clamped() {
        assert_eq!(ramp_index(-3.0, 4, false), 0);
        assert_eq!(ramp_index(7.0, 4, false), 3);
        assert_eq!(ramp_index(f32::NAN, 4, false), 0);
        assert_eq!(ramp_index(0.5, 1, false), 0);
        assert_eq!(ramp_index(0.5, 0, false), 0);
    }

    #[test]
    fn grid_matches_floor_of_scaled_size() {
        let options = AsciiOptions {
            resolution: 0.15,
            ..AsciiOptions::default()
        };
        let mut effect = effect([255, 255, 255, 255], options);
        effect.set_size(333, 101);
        effect.render(&SceneGraph::new(), &camera()).unwrap();

        let output = effect.output();
        assert_eq!(effect.grid_size(), (49, 15));
        assert_eq!(output.columns(), 49);
        assert_eq!(output.rows(), 15);
        assert!((effect.font_size_px() - 333.0 / 49.0).abs() < 1e-4);
    }

    #[test]
    fn resize_changes_next_frame_grid() {
        let mut effect = effect([0, 0, 0, 255], AsciiOptions {
            resolution: 0.5,
            ..AsciiOptions::default()
        });
        effect.set_size(40, 20);
        effect.render(&SceneGraph::new(), &camera()).unwrap();
        assert_eq!((effect.output().columns(), effect.output().rows()), (20, 10));

        effect.set_size(9, 7);
        effect.render(&SceneGraph::new(), &camera()).unwrap();
        assert_eq!((effect.output().columns(), effect.output().rows()), (4, 3));
    }

    #[test]
    fn monochrome_uses_ramp_ends() {
        let mut white = effect([255, 255, 255, 255], AsciiOptions {
            resolution: 1.0,
            ..AsciiOptions::default()
        });
        white.set_size(3, 2);
        white.render(&SceneGraph::new(), &camera()).unwrap();
        assert_eq!(white.output(), &AsciiOutput::Text("@@@\n@@@\n".to_string()));

        let mut inverted = effect([255, 255, 255, 255], AsciiOptions {
            resolution: 1.0,
            invert: true,
            ..AsciiOptions::default()
        });
        inverted.set_size(2, 1);
        inverted.render(&SceneGraph::new(), &camera()).unwrap();
        assert_eq!(inverted.output(), &AsciiOutput::Text("  \n".to_string()));
    }

    #[test]
    fn colorized_cells_carry_source_color() {
        let mut effect = effect([200, 10, 10, 255], AsciiOptions {
            resolution: 1.0,
            colorize: true,
            readback: ReadbackHint::Occasional,
            ..AsciiOptions::default()
        });
        effect.set_size(2, 2);
        effect.render(&SceneGraph::new(), &camera()).unwrap();
        match effect.output() {
            AsciiOutput::Colored(rows) => {
                assert_eq!(rows.len(), 2);
                assert!(rows.iter().flatten().all(|cell| cell.rgb == [200, 10, 10]));
            }
            other => panic!("expected colored output, got {:?}", other),
        }
    }

    #[test]
    fn zero_sized_target_is_a_no_op() {
        let mut effect = effect([255, 255, 255, 255], AsciiOptions::default());
        effect.set_size(0, 100);
        assert!(effect.render(&SceneGraph::new(), &camera()).is_ok());
        assert!(effect.output().is_empty());

        // Too small to yield a single cell at this resolution.
        effect.set_size(5, 5);
        assert!(effect.render(&SceneGraph::new(), &camera()).is_ok());
        assert!(effect.output().is_empty());
    }

    #[test]
    fn dispose_clears_output() {
        let mut effect = effect([255, 255, 255, 255], AsciiOptions {
            resolution: 1.0,
            ..AsciiOptions::default()
        });
        effect.set_size(2, 2);
        effect.render(&SceneGraph::new(), &camera()).unwrap();
        assert!(!effect.output().is_empty());
        effect.dispose();
        assert!(effect.output().is_empty());
    }

    #[test]
    fn box_downsample_averages_blocks() {
        let mut source = RgbaImage::new(4, 2);
        for (x, _, pixel) in source.enumerate_pixels_mut() {
            *pixel = if x < 2 {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([200, 100, 50, 255])
            };
        }
        let mut target = RgbaImage::new(2, 1);
        box_downsample_into(&source, &mut target);
        assert_eq!(target.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(target.get_pixel(1, 0).0, [200, 100, 50, 255]);
    }

    #[test]
    fn empty_ramp_falls_back_to_default() {
        let mut effect = AsciiEffect::new(
            Box::new(SolidRenderer::new([255, 255, 255, 255])),
            "",
            AsciiOptions {
                resolution: 1.0,
                ..AsciiOptions::default()
            },
        );
        effect.set_size(1, 1);
        effect.render(&SceneGraph::new(), &camera()).unwrap();
        let last = DEFAULT_CHAR_RAMP.chars().last().unwrap();
        assert_eq!(effect.output(), &AsciiOutput::Text(format!("{}\n", last)));
    }
}
