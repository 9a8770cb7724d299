use crate::scene::{Aabb, Geometry, Material, NodeId, NodeKind, SceneGraph};
use glam::Vec3;

/// Largest dimension of every staged subject.
pub const TARGET_SIZE: f32 = 2.0;
const GROUND_MARGIN: f32 = 1.25;
const GROUND_SEGMENTS: u32 = 48;
const GROUND_COLOR: Vec3 = Vec3::splat(0.25);
const MARKER_COLOR: Vec3 = Vec3::new(0.2, 1.0, 0.4);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Staged {
    /// Bounds after staging, in the space of the staging frame.
    pub bounds: Aabb,
    pub scale: f32,
}

impl Staged {
    pub fn focus(&self) -> Vec3 {
        self.bounds.center()
    }

    pub fn radius(&self) -> f32 {
        self.bounds.radius().max(1e-3)
    }
}

/// Floors, centers and scales `subject` so that, measured in `frame` space,
/// it stands on Y=0, is centered on X/Z and its largest side is `TARGET_SIZE`.
pub fn stage(scene: &mut SceneGraph, subject: NodeId, frame: NodeId) -> Option<Staged> {
    let bounds = scene.visible_bounds(subject, frame);
    if bounds.is_empty() {
        log::warn!("staging: subject has no measurable content");
        return None;
    }
    let size = bounds.size();
    let max_dim = size.max_element();
    let scale = if max_dim > 1e-6 && max_dim.is_finite() {
        TARGET_SIZE / max_dim
    } else {
        1.0
    };
    let center = bounds.center();
    let offset = Vec3::new(center.x, bounds.min.y, center.z) * scale;

    let node = scene.node_mut(subject)?;
    node.transform.scale *= scale;
    node.transform.translation = node.transform.translation * scale - offset;

    let staged = Aabb {
        min: bounds.min * scale - offset,
        max: bounds.max * scale - offset,
    };
    log::debug!(
        "staging: scale {:.4}, bounds {:?}..{:?}",
        scale,
        staged.min,
        staged.max
    );
    Some(Staged {
        bounds: staged,
        scale,
    })
}

/// Cosmetic ground disc sized from the staged footprint.
pub fn add_ground(scene: &mut SceneGraph, parent: NodeId, staged: &Staged) -> NodeId {
    let size = staged.bounds.size();
    let radius = (size.x.max(size.z) * 0.5 * GROUND_MARGIN).max(0.1);
    let geometry = scene.add_geometry(Geometry::circle(radius, GROUND_SEGMENTS));
    let material = scene.add_material(Material {
        color: GROUND_COLOR,
    });
    let ground = scene.add_node(
        parent,
        "Ground",
        NodeKind::Mesh {
            geometry,
            material,
            skin: None,
        },
    );
    if let Some(node) = scene.node_mut(ground) {
        node.transform.translation.y = -0.002;
    }
    ground
}

/// Line helper joining each bone of `subject` to its parent bone.
///
/// Returns `None` when the subtree has no bones.
pub fn add_skeleton_marker(scene: &mut SceneGraph, parent: NodeId, subject: NodeId) -> Option<NodeId> {
    let bones = scene.bones_in(subject);
    if bones.is_empty() {
        return None;
    }
    let pairs: Vec<(NodeId, NodeId)> = bones
        .iter()
        .filter_map(|bone| {
            let parent = scene.node(*bone)?.parent?;
            matches!(scene.node(parent)?.kind, NodeKind::Bone).then_some((parent, *bone))
        })
        .collect();
    let pairs = if pairs.is_empty() {
        // Single unparented bones still get a visible stub from the subject origin.
        bones.iter().map(|bone| (subject, *bone)).collect()
    } else {
        pairs
    };
    Some(scene.add_node(
        parent,
        "SkeletonHelper",
        NodeKind::Skeleton {
            bones: pairs,
            color: MARKER_COLOR,
        },
    ))
}
