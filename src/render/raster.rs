use super::{FrameRenderer, PerspectiveCamera, RenderError};
use crate::scene::{Geometry, NodeId, NodeKind, SceneGraph, Skin};
use glam::{Mat4, Vec3, Vec4};
use image::{Rgba, RgbaImage};
use slotmap::SecondaryMap;

const SKELETON_COLOR_FALLBACK: Vec3 = Vec3::new(0.2, 1.0, 0.4);

struct Lighting {
    ambient: Vec3,
    directional: Vec<(Vec3, Vec3)>,
}

impl Lighting {
    fn collect(scene: &SceneGraph, worlds: &SecondaryMap<NodeId, Mat4>) -> Self {
        let mut ambient = Vec3::ZERO;
        let mut directional = Vec::new();
        let mut any = false;
        for (id, world) in worlds {
            let Some(node) = scene.node(id) else {
                continue;
            };
            if !node.visible {
                continue;
            }
            match node.kind {
                NodeKind::AmbientLight { color, intensity } => {
                    ambient += color * intensity;
                    any = true;
                }
                NodeKind::DirectionalLight { color, intensity } => {
                    // Directional lights point from their position at the origin.
                    let direction = world.transform_point3(Vec3::ZERO).normalize_or_zero();
                    if direction != Vec3::ZERO {
                        directional.push((direction, color * intensity));
                    }
                    any = true;
                }
                _ => {}
            }
        }
        if !any {
            ambient = Vec3::ONE;
        }
        Self {
            ambient,
            directional,
        }
    }

    fn shade(&self, normal: Vec3) -> Vec3 {
        self.directional
            .iter()
            .fold(self.ambient, |acc, (direction, radiance)| {
                acc + *radiance * normal.dot(*direction).max(0.0)
            })
    }
}

struct FrameContext<'a> {
    worlds: &'a SecondaryMap<NodeId, Mat4>,
    camera: &'a PerspectiveCamera,
    view_proj: Mat4,
    lighting: Lighting,
}

/// CPU rasterizer: flat-shaded, z-buffered triangles and depth-tested lines.
pub struct SoftwareRenderer {
    color: RgbaImage,
    depth: Vec<f32>,
    clear_color: [u8; 4],
    disposed: bool,
}

impl Default for SoftwareRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareRenderer {
    pub fn new() -> Self {
        Self {
            color: RgbaImage::new(0, 0),
            depth: Vec::new(),
            clear_color: [0, 0, 0, 0],
            disposed: false,
        }
    }

    pub fn with_clear_color(mut self, rgba: [u8; 4]) -> Self {
        self.clear_color = rgba;
        self
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn clear(&mut self) {
        for pixel in self.color.pixels_mut() {
            *pixel = Rgba(self.clear_color);
        }
        self.depth.fill(f32::INFINITY);
    }

    fn draw_mesh(
        &mut self,
        frame: &FrameContext<'_>,
        geometry: &Geometry,
        base_color: Vec3,
        world: Mat4,
        skin: Option<&Skin>,
    ) {
        let positions = world_positions(geometry, world, skin, frame.worlds);
        let clip: Vec<Vec4> = positions
            .iter()
            .map(|p| frame.view_proj * p.extend(1.0))
            .collect();
        let camera = frame.camera;
        let lighting = &frame.lighting;
        let min_w = camera.near * 0.5;
        for tri in geometry.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            if a >= clip.len() || b >= clip.len() || c >= clip.len() {
                continue;
            }
            if clip[a].w <= min_w || clip[b].w <= min_w || clip[c].w <= min_w {
                continue;
            }
            let (p0, p1, p2) = (positions[a], positions[b], positions[c]);
            let mut normal = (p1 - p0).cross(p2 - p0).normalize_or_zero();
            if normal.dot(camera.position - p0) < 0.0 {
                normal = -normal;
            }
            let lit = (base_color * lighting.shade(normal)).clamp(Vec3::ZERO, Vec3::ONE);
            let rgba = [
                (lit.x * 255.0) as u8,
                (lit.y * 255.0) as u8,
                (lit.z * 255.0) as u8,
                255,
            ];
            let screen = [
                self.to_screen(clip[a]),
                self.to_screen(clip[b]),
                self.to_screen(clip[c]),
            ];
            self.fill_triangle(screen, rgba);
        }
    }

    fn to_screen(&self, clip: Vec4) -> Vec3 {
        let ndc = clip.truncate() / clip.w;
        let (width, height) = self.color.dimensions();
        Vec3::new(
            (ndc.x * 0.5 + 0.5) * width as f32,
            (1.0 - (ndc.y * 0.5 + 0.5)) * height as f32,
            ndc.z,
        )
    }

    fn fill_triangle(&mut self, [v0, v1, v2]: [Vec3; 3], rgba: [u8; 4]) {
        let (width, height) = self.color.dimensions();
        let area = edge(v0, v1, v2);
        if area.abs() < 1e-8 || !area.is_finite() {
            return;
        }
        let min_x = v0.x.min(v1.x).min(v2.x).floor().max(0.0) as u32;
        let min_y = v0.y.min(v1.y).min(v2.y).floor().max(0.0) as u32;
        let max_x = (v0.x.max(v1.x).max(v2.x).ceil().max(0.0) as u32).min(width);
        let max_y = (v0.y.max(v1.y).max(v2.y).ceil().max(0.0) as u32).min(height);
        for y in min_y..max_y {
            for x in min_x..max_x {
                let p = Vec3::new(x as f32 + 0.5, y as f32 + 0.5, 0.0);
                let w0 = edge(v1, v2, p) / area;
                let w1 = edge(v2, v0, p) / area;
                let w2 = edge(v0, v1, p) / area;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }
                let z = w0 * v0.z + w1 * v1.z + w2 * v2.z;
                self.plot(x, y, z, rgba);
            }
        }
    }

    fn draw_line(&mut self, from: Vec4, to: Vec4, rgba: [u8; 4], min_w: f32) {
        if from.w <= min_w || to.w <= min_w {
            return;
        }
        let (a, b) = (self.to_screen(from), self.to_screen(to));
        let steps = (b.x - a.x).abs().max((b.y - a.y).abs()).ceil().max(1.0);
        if !steps.is_finite() || steps > 16_384.0 {
            return;
        }
        let steps = steps as u32;
        let (width, height) = self.color.dimensions();
        for i in 0..=steps {
            let t = i as f32 / steps as f32;
            let p = a.lerp(b, t);
            if p.x < 0.0 || p.y < 0.0 {
                continue;
            }
            let (x, y) = (p.x as u32, p.y as u32);
            if x < width && y < height {
                // Small bias keeps bones visible on top of coincident surfaces.
                self.plot(x, y, p.z - 1e-4, rgba);
            }
        }
    }

    fn plot(&mut self, x: u32, y: u32, z: f32, rgba: [u8; 4]) {
        if !(0.0..=1.0).contains(&z) {
            return;
        }
        let index = (y * self.color.width() + x) as usize;
        if z < self.depth[index] {
            self.depth[index] = z;
            self.color.put_pixel(x, y, Rgba(rgba));
        }
    }
}

fn edge(a: Vec3, b: Vec3, p: Vec3) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// World-space vertex positions, with linear blend skinning when the mesh has a skin.
fn world_positions(
    geometry: &Geometry,
    world: Mat4,
    skin: Option<&Skin>,
    worlds: &SecondaryMap<NodeId, Mat4>,
) -> Vec<Vec3> {
    let Some(skin) = skin.filter(|_| geometry.is_skinned()) else {
        return geometry
            .positions
            .iter()
            .map(|p| world.transform_point3(*p))
            .collect();
    };
    let joint_matrices: Vec<Mat4> = skin
        .joints
        .iter()
        .enumerate()
        .map(|(i, joint)| {
            let joint_world = worlds.get(*joint).copied().unwrap_or(world);
            joint_world * skin.inverse_bind.get(i).copied().unwrap_or(Mat4::IDENTITY)
        })
        .collect();
    geometry
        .positions
        .iter()
        .enumerate()
        .map(|(v, position)| {
            let joints = geometry.joints[v];
            let weights = geometry.weights.get(v).copied().unwrap_or([0.0; 4]);
            let mut blended = Mat4::ZERO;
            let mut total = 0.0;
            for (joint, weight) in joints.iter().zip(weights) {
                if weight <= 0.0 {
                    continue;
                }
                if let Some(matrix) = joint_matrices.get(*joint as usize) {
                    blended += *matrix * weight;
                    total += weight;
                }
            }
            if total <= 1e-6 {
                world.transform_point3(*position)
            } else {
                (blended * (1.0 / total)).transform_point3(*position)
            }
        })
        .collect()
}

impl FrameRenderer for SoftwareRenderer {
    fn set_size(&mut self, width: u32, height: u32) {
        self.color = RgbaImage::new(width, height);
        self.depth = vec![f32::INFINITY; width as usize * height as usize];
    }

    fn size(&self) -> (u32, u32) {
        self.color.dimensions()
    }

    fn render(&mut self, scene: &SceneGraph, camera: &PerspectiveCamera) -> Result<(), RenderError> {
        if self.disposed {
            return Err(RenderError::Disposed);
        }
        self.clear();
        let (width, height) = self.color.dimensions();
        if width == 0 || height == 0 {
            return Ok(());
        }

        let worlds = scene.world_matrices();
        let frame = FrameContext {
            worlds: &worlds,
            camera,
            view_proj: camera.view_projection(),
            lighting: Lighting::collect(scene, &worlds),
        };
        let min_w = camera.near * 0.5;

        let mut stack = vec![scene.root()];
        while let Some(id) = stack.pop() {
            let Some(node) = scene.node(id) else {
                continue;
            };
            if !node.visible {
                continue;
            }
            stack.extend(node.children.iter().copied());
            let Some(world) = worlds.get(id).copied() else {
                continue;
            };
            match &node.kind {
                NodeKind::Mesh {
                    geometry,
                    material,
                    skin,
                } => {
                    let Some(geometry) = scene.geometry(*geometry) else {
                        continue;
                    };
                    let base_color = scene
                        .material(*material)
                        .map(|material| material.color)
                        .unwrap_or(Vec3::splat(0.8));
                    self.draw_mesh(&frame, geometry, base_color, world, skin.as_ref());
                }
                NodeKind::Skeleton { bones, color } => {
                    let color = if color.is_finite() {
                        *color
                    } else {
                        SKELETON_COLOR_FALLBACK
                    };
                    let rgba = [
                        (color.x.clamp(0.0, 1.0) * 255.0) as u8,
                        (color.y.clamp(0.0, 1.0) * 255.0) as u8,
                        (color.z.clamp(0.0, 1.0) * 255.0) as u8,
                        255,
                    ];
                    for (from, to) in bones {
                        let (Some(a), Some(b)) = (worlds.get(*from), worlds.get(*to)) else {
                            continue;
                        };
                        let a = frame.view_proj * a.transform_point3(Vec3::ZERO).extend(1.0);
                        let b = frame.view_proj * b.transform_point3(Vec3::ZERO).extend(1.0);
                        self.draw_line(a, b, rgba, min_w);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn frame(&self) -> &RgbaImage {
        &self.color
    }

    fn dispose(&mut self) {
        self.disposed = true;
        self.color = RgbaImage::new(0, 0);
        self.depth = Vec::new();
    }
}
