use crate::scene::{NodeId, NodeKind, SceneGraph};
use glam::{Quat, Vec3};

/// Light pivot yaw added per rendered frame while auto-spin is on.
pub const LIGHT_SPIN_STEP: f32 = 0.02;

const DEFAULT_YAW_DEG: f32 = 45.0;
const DEFAULT_HEIGHT: f32 = 3.0;
const DEFAULT_DISTANCE: f32 = 4.0;

/// A key light orbiting a pivot at the origin, plus a fixed ambient fill.
///
/// Manual positioning always switches auto-spin off.
#[derive(Debug, Clone)]
pub struct LightRig {
    pivot: NodeId,
    key: NodeId,
    yaw: f32,
    height: f32,
    distance: f32,
    spin: bool,
}

impl LightRig {
    pub fn new(scene: &mut SceneGraph) -> Self {
        let root = scene.root();
        scene.add_node(
            root,
            "AmbientLight",
            NodeKind::AmbientLight {
                color: Vec3::ONE,
                intensity: 0.35,
            },
        );
        let pivot = scene.add_group(root, "LightPivot");
        let key = scene.add_node(
            pivot,
            "KeyLight",
            NodeKind::DirectionalLight {
                color: Vec3::ONE,
                intensity: 1.0,
            },
        );
        let rig = Self {
            pivot,
            key,
            yaw: DEFAULT_YAW_DEG.to_radians(),
            height: DEFAULT_HEIGHT,
            distance: DEFAULT_DISTANCE,
            spin: false,
        };
        rig.apply(scene);
        rig
    }

    pub fn key_light(&self) -> NodeId {
        self.key
    }

    pub fn yaw_degrees(&self) -> f32 {
        self.yaw.to_degrees()
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn distance(&self) -> f32 {
        self.distance
    }

    pub fn is_spinning(&self) -> bool {
        self.spin
    }

    pub fn toggle_spin(&mut self) -> bool {
        self.spin = !self.spin;
        self.spin
    }

    pub fn set_yaw_degrees(&mut self, scene: &mut SceneGraph, degrees: f32) {
        self.spin = false;
        if degrees.is_finite() {
            self.yaw = degrees.to_radians();
        }
        self.apply(scene);
    }

    pub fn set_height(&mut self, scene: &mut SceneGraph, height: f32) {
        self.spin = false;
        if height.is_finite() {
            self.height = height;
        }
        self.apply(scene);
    }

    pub fn set_distance(&mut self, scene: &mut SceneGraph, distance: f32) {
        self.spin = false;
        if distance.is_finite() {
            self.distance = distance.max(0.0);
        }
        self.apply(scene);
    }

    /// Per-frame update; advances the yaw by a fixed step while spinning.
    pub fn tick(&mut self, scene: &mut SceneGraph) {
        if !self.spin {
            return;
        }
        self.yaw = (self.yaw + LIGHT_SPIN_STEP).rem_euclid(std::f32::consts::TAU);
        self.apply(scene);
    }

    fn apply(&self, scene: &mut SceneGraph) {
        if let Some(pivot) = scene.node_mut(self.pivot) {
            pivot.transform.rotation = Quat::from_rotation_y(self.yaw);
        }
        if let Some(key) = scene.node_mut(self.key) {
            key.transform.translation = Vec3::new(0.0, self.height, self.distance);
        }
    }
}
