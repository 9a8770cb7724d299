//! Scene graph arena.
//!
//! Nodes, geometries and materials live in `slotmap` arenas and are addressed
//! by integer handles. Geometry and material memory is released only through
//! [`SceneGraph::dispose_subtree`], never by dropping a node handle.

mod bounds;

pub use bounds::Aabb;

use glam::{Mat4, Quat, Vec3};
use slotmap::{SecondaryMap, SlotMap};

slotmap::new_key_type! {
    pub struct NodeId;
    pub struct GeometryId;
    pub struct MaterialId;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

/// Triangle list with optional skinning attributes (four influences per vertex).
#[derive(Debug, Clone, Default)]
pub struct Geometry {
    pub positions: Vec<Vec3>,
    pub indices: Vec<u32>,
    pub joints: Vec<[u16; 4]>,
    pub weights: Vec<[f32; 4]>,
}

impl Geometry {
    pub fn is_skinned(&self) -> bool {
        !self.joints.is_empty() && self.joints.len() == self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn local_bounds(&self) -> Aabb {
        Aabb::from_points(self.positions.iter().copied())
    }

    /// Flat disc in the XZ plane, facing +Y.
    pub fn circle(radius: f32, segments: u32) -> Self {
        let segments = segments.max(3);
        let mut positions = Vec::with_capacity(segments as usize + 1);
        positions.push(Vec3::ZERO);
        for i in 0..segments {
            let angle = i as f32 / segments as f32 * std::f32::consts::TAU;
            positions.push(Vec3::new(angle.cos() * radius, 0.0, -angle.sin() * radius));
        }
        let mut indices = Vec::with_capacity(segments as usize * 3);
        for i in 0..segments {
            let a = i + 1;
            let b = (i + 1) % segments + 1;
            indices.extend_from_slice(&[0, a, b]);
        }
        Self {
            positions,
            indices,
            joints: Vec::new(),
            weights: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    /// Linear RGB base color.
    pub color: Vec3,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            color: Vec3::splat(0.8),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Skin {
    pub joints: Vec<NodeId>,
    pub inverse_bind: Vec<Mat4>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Group,
    Bone,
    Mesh {
        geometry: GeometryId,
        material: MaterialId,
        skin: Option<Skin>,
    },
    /// Line segments drawn between bone world positions.
    Skeleton {
        bones: Vec<(NodeId, NodeId)>,
        color: Vec3,
    },
    DirectionalLight {
        color: Vec3,
        intensity: f32,
    },
    AmbientLight {
        color: Vec3,
        intensity: f32,
    },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub transform: Transform,
    pub visible: bool,
    pub kind: NodeKind,
}

impl Node {
    fn new(name: &str, kind: NodeKind) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            children: Vec::new(),
            transform: Transform::default(),
            visible: true,
            kind,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DisposeReport {
    pub nodes: usize,
    pub geometries: usize,
    pub materials: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResourceCounts {
    pub nodes: usize,
    pub geometries: usize,
    pub materials: usize,
}

pub struct SceneGraph {
    nodes: SlotMap<NodeId, Node>,
    geometries: SlotMap<GeometryId, Geometry>,
    materials: SlotMap<MaterialId, Material>,
    root: NodeId,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneGraph {
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(Node::new("Scene", NodeKind::Group));
        Self {
            nodes,
            geometries: SlotMap::with_key(),
            materials: SlotMap::with_key(),
            root,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn geometry(&self, id: GeometryId) -> Option<&Geometry> {
        self.geometries.get(id)
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id)
    }

    pub fn add_geometry(&mut self, geometry: Geometry) -> GeometryId {
        self.geometries.insert(geometry)
    }

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        self.materials.insert(material)
    }

    pub fn add_group(&mut self, parent: NodeId, name: &str) -> NodeId {
        self.add_node(parent, name, NodeKind::Group)
    }

    /// Creates a node under `parent`; a stale parent handle falls back to the root.
    pub fn add_node(&mut self, parent: NodeId, name: &str, kind: NodeKind) -> NodeId {
        let parent = if self.nodes.contains_key(parent) {
            parent
        } else {
            log::warn!("add_node: parent of '{}' no longer exists; using scene root", name);
            self.root
        };
        let id = self.nodes.insert(Node::new(name, kind));
        self.link(id, parent);
        id
    }

    pub fn attach(&mut self, child: NodeId, parent: NodeId) {
        if child == self.root || !self.nodes.contains_key(parent) {
            return;
        }
        self.detach(child);
        self.link(child, parent);
    }

    pub fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.nodes.get_mut(id).and_then(|node| node.parent.take()) else {
            return;
        };
        if let Some(parent) = self.nodes.get_mut(parent) {
            parent.children.retain(|child| *child != id);
        }
    }

    fn link(&mut self, child: NodeId, parent: NodeId) {
        if let Some(node) = self.nodes.get_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(parent) = self.nodes.get_mut(parent) {
            parent.children.push(child);
        }
    }

    /// Pre-order list of `id` and everything below it.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            out.push(current);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Detaches `id` and frees every node, geometry and material below it.
    /// Shared geometry/material handles are freed once; stale handles are a no-op.
    pub fn dispose_subtree(&mut self, id: NodeId) -> DisposeReport {
        let mut report = DisposeReport::default();
        if id == self.root || !self.nodes.contains_key(id) {
            return report;
        }
        self.detach(id);
        for node_id in self.descendants(id) {
            let Some(node) = self.nodes.remove(node_id) else {
                continue;
            };
            report.nodes += 1;
            if let NodeKind::Mesh {
                geometry, material, ..
            } = node.kind
            {
                if self.geometries.remove(geometry).is_some() {
                    report.geometries += 1;
                }
                if self.materials.remove(material).is_some() {
                    report.materials += 1;
                }
            }
        }
        report
    }

    pub fn resource_counts(&self) -> ResourceCounts {
        ResourceCounts {
            nodes: self.nodes.len(),
            geometries: self.geometries.len(),
            materials: self.materials.len(),
        }
    }

    pub fn world_matrix(&self, id: NodeId) -> Mat4 {
        let mut matrix = Mat4::IDENTITY;
        let mut current = Some(id);
        while let Some(node_id) = current {
            let Some(node) = self.nodes.get(node_id) else {
                break;
            };
            matrix = node.transform.matrix() * matrix;
            current = node.parent;
        }
        matrix
    }

    /// World matrices of every node reachable from the root.
    pub fn world_matrices(&self) -> SecondaryMap<NodeId, Mat4> {
        let mut out = SecondaryMap::new();
        let mut stack = vec![(self.root, Mat4::IDENTITY)];
        while let Some((id, parent_matrix)) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            let world = parent_matrix * node.transform.matrix();
            out.insert(id, world);
            stack.extend(node.children.iter().map(|child| (*child, world)));
        }
        out
    }

    /// Bounds of the visible content of `subject`, expressed in the space of `frame`.
    ///
    /// Mesh geometry is measured in bind pose. When the subtree has no mesh the
    /// bone positions are used instead, so bone-only rigs still get a box.
    pub fn visible_bounds(&self, subject: NodeId, frame: NodeId) -> Aabb {
        let to_frame = self.world_matrix(frame).inverse();
        let mut mesh_bounds = Aabb::empty();
        let mut bone_bounds = Aabb::empty();
        for id in self.descendants(subject) {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            let matrix = to_frame * self.world_matrix(id);
            match &node.kind {
                NodeKind::Mesh { geometry, .. } => {
                    if let Some(geometry) = self.geometries.get(*geometry) {
                        mesh_bounds.union(&geometry.local_bounds().transformed(&matrix));
                    }
                }
                NodeKind::Bone => bone_bounds.expand(matrix.transform_point3(Vec3::ZERO)),
                _ => {}
            }
        }
        if mesh_bounds.is_empty() {
            bone_bounds
        } else {
            mesh_bounds
        }
    }

    pub fn contains_mesh(&self, id: NodeId) -> bool {
        self.descendants(id).into_iter().any(|node_id| {
            matches!(
                self.nodes.get(node_id).map(|node| &node.kind),
                Some(NodeKind::Mesh { .. })
            )
        })
    }

    pub fn bones_in(&self, id: NodeId) -> Vec<NodeId> {
        self.descendants(id)
            .into_iter()
            .filter(|node_id| {
                matches!(
                    self.nodes.get(*node_id).map(|node| &node.kind),
                    Some(NodeKind::Bone)
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn box_geometry(min: Vec3, max: Vec3) -> Geometry {
        Geometry {
            positions: vec![min, max, Vec3::new(min.x, max.y, min.z)],
            indices: vec![0, 1, 2],
            ..Geometry::default()
        }
    }

    #[test]
    fn dispose_subtree_frees_resources_once() {
        let mut scene = SceneGraph::new();
        let group = scene.add_group(scene.root(), "clip");
        let geometry = scene.add_geometry(box_geometry(Vec3::ZERO, Vec3::ONE));
        let material = scene.add_material(Material::default());
        let kind = NodeKind::Mesh {
            geometry,
            material,
            skin: None,
        };
        scene.add_node(group, "a", kind.clone());
        // Second node shares the same geometry and material.
        scene.add_node(group, "b", kind);

        let report = scene.dispose_subtree(group);
        assert_eq!(
            report,
            DisposeReport {
                nodes: 3,
                geometries: 1,
                materials: 1
            }
        );
        assert_eq!(
            scene.resource_counts(),
            ResourceCounts {
                nodes: 1,
                geometries: 0,
                materials: 0
            }
        );
        assert!(scene.node(scene.root()).unwrap().children.is_empty());

        // Disposing a stale handle is a no-op.
        assert_eq!(scene.dispose_subtree(group), DisposeReport::default());
    }

    #[test]
    fn root_cannot_be_disposed() {
        let mut scene = SceneGraph::new();
        let root = scene.root();
        assert_eq!(scene.dispose_subtree(root), DisposeReport::default());
        assert!(scene.contains(root));
    }

    #[test]
    fn world_matrix_composes_parents() {
        let mut scene = SceneGraph::new();
        let parent = scene.add_group(scene.root(), "parent");
        scene.node_mut(parent).unwrap().transform.translation = Vec3::new(1.0, 0.0, 0.0);
        let child = scene.add_group(parent, "child");
        scene.node_mut(child).unwrap().transform.translation = Vec3::new(0.0, 2.0, 0.0);

        let world = scene.world_matrix(child).transform_point3(Vec3::ZERO);
        assert!((world - Vec3::new(1.0, 2.0, 0.0)).length() < 1e-6);
        let all = scene.world_matrices();
        assert!((all[child].transform_point3(Vec3::ZERO) - world).length() < 1e-6);
    }

    #[test]
    fn visible_bounds_is_relative_to_frame() {
        let mut scene = SceneGraph::new();
        let frame = scene.add_group(scene.root(), "turntable");
        scene.node_mut(frame).unwrap().transform.rotation = Quat::from_rotation_y(1.0);
        let subject = scene.add_group(frame, "subject");
        let geometry = scene.add_geometry(box_geometry(Vec3::ZERO, Vec3::new(2.0, 1.0, 2.0)));
        let material = scene.add_material(Material::default());
        scene.add_node(
            subject,
            "mesh",
            NodeKind::Mesh {
                geometry,
                material,
                skin: None,
            },
        );

        let bounds = scene.visible_bounds(subject, frame);
        assert!((bounds.size() - Vec3::new(2.0, 1.0, 2.0)).length() < 1e-5);
    }

    #[test]
    fn bone_only_subtree_uses_bone_positions() {
        let mut scene = SceneGraph::new();
        let subject = scene.add_group(scene.root(), "rig");
        let hip = scene.add_node(subject, "hip", NodeKind::Bone);
        let head = scene.add_node(hip, "head", NodeKind::Bone);
        scene.node_mut(head).unwrap().transform.translation = Vec3::new(0.0, 3.0, 0.0);

        assert!(!scene.contains_mesh(subject));
        assert_eq!(scene.bones_in(subject), vec![hip, head]);
        let bounds = scene.visible_bounds(subject, scene.root());
        assert_eq!(bounds.size(), Vec3::new(0.0, 3.0, 0.0));
    }

    #[test]
    fn circle_geometry_is_a_closed_fan() {
        let disc = Geometry::circle(1.0, 16);
        assert_eq!(disc.positions.len(), 17);
        assert_eq!(disc.triangle_count(), 16);
        assert!(disc.indices.iter().all(|index| (*index as usize) < disc.positions.len()));
    }
}
