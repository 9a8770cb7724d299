use glam::{Mat4, Vec3};

/// Camera distance as a multiple of the framed radius.
const FRAME_DISTANCE_FACTOR: f32 = 2.8;
const DEFAULT_VIEW_DIRECTION: Vec3 = Vec3::new(0.0, 0.35, 1.0);

#[derive(Debug, Clone, Copy)]
pub struct PerspectiveCamera {
    pub fov_y_deg: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub position: Vec3,
    pub target: Vec3,
}

impl PerspectiveCamera {
    pub fn new(fov_y_deg: f32, aspect: f32) -> Self {
        Self {
            fov_y_deg,
            aspect,
            near: 0.05,
            far: 200.0,
            position: Vec3::new(0.0, 1.4, 4.0),
            target: Vec3::new(0.0, 1.0, 0.0),
        }
    }

    /// Updates the aspect for a `width x height` pixel viewport whose pixels are
    /// shown `cell_aspect` times taller than wide.
    pub fn set_viewport(&mut self, width: u32, height: u32, cell_aspect: f32) {
        if width == 0 || height == 0 {
            return;
        }
        let cell_aspect = if cell_aspect > 0.0 { cell_aspect } else { 1.0 };
        self.aspect = width as f32 / height as f32 / cell_aspect;
    }

    pub fn view_matrix(&self) -> Mat4 {
        let up = if self.forward().cross(Vec3::Y).length_squared() < 1e-8 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        Mat4::look_at_rh(self.position, self.target, up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        let aspect = if self.aspect.is_finite() && self.aspect > 0.0 {
            self.aspect
        } else {
            1.0
        };
        Mat4::perspective_rh(self.fov_y_deg.to_radians(), aspect, self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }

    pub fn distance(&self) -> f32 {
        self.position.distance(self.target)
    }

    /// Frames a sphere, keeping the current viewing direction when it is usable.
    pub fn frame_sphere(&mut self, center: Vec3, radius: f32) {
        let radius = if radius.is_finite() && radius > 1e-4 { radius } else { 1.0 };
        let mut forward = self.forward();
        if forward == Vec3::ZERO || !forward.is_finite() {
            forward = -DEFAULT_VIEW_DIRECTION.normalize();
        }
        let distance = radius * FRAME_DISTANCE_FACTOR;
        self.target = center;
        self.position = center - forward * distance;
        self.near = (distance / 100.0).max(0.01);
        self.far = distance * 100.0;
    }
}

/// Orbit interaction around a target point, limited to a distance range.
#[derive(Debug, Clone, Copy)]
pub struct OrbitControls {
    pub target: Vec3,
    pub min_distance: f32,
    pub max_distance: f32,
    disposed: bool,
}

impl Default for OrbitControls {
    fn default() -> Self {
        Self {
            target: Vec3::new(0.0, 1.0, 0.0),
            min_distance: 0.5,
            max_distance: 20.0,
            disposed: false,
        }
    }
}

impl OrbitControls {
    /// Distance limits proportional to the framed radius.
    pub fn fit_radius(&mut self, target: Vec3, radius: f32) {
        let radius = if radius.is_finite() && radius > 1e-4 { radius } else { 1.0 };
        self.target = target;
        self.min_distance = radius * 0.5;
        self.max_distance = radius * 8.0;
    }

    pub fn orbit(&self, camera: &mut PerspectiveCamera, yaw_delta: f32, pitch_delta: f32) {
        if self.disposed {
            return;
        }
        let offset = camera.position - self.target;
        let distance = offset.length().max(0.05);
        let (mut yaw, mut pitch) = direction_to_yaw_pitch(offset / distance);
        yaw += yaw_delta;
        pitch = (pitch + pitch_delta).clamp(-MAX_PITCH, MAX_PITCH);
        wrap_angle(&mut yaw);
        camera.target = self.target;
        camera.position = self.target + yaw_pitch_to_direction(yaw, pitch) * distance;
    }

    pub fn zoom(&self, camera: &mut PerspectiveCamera, delta: f32) {
        if self.disposed {
            return;
        }
        let offset = camera.position - self.target;
        let direction = offset.normalize_or_zero();
        if direction == Vec3::ZERO {
            return;
        }
        let distance = self.clamp_distance(offset.length() + delta);
        camera.target = self.target;
        camera.position = self.target + direction * distance;
    }

    pub fn clamp_distance(&self, distance: f32) -> f32 {
        distance.clamp(self.min_distance, self.max_distance.max(self.min_distance))
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Returns `true` only on the first call.
    pub fn dispose(&mut self) -> bool {
        !std::mem::replace(&mut self.disposed, true)
    }
}

const MAX_PITCH: f32 = 1.5;

fn direction_to_yaw_pitch(direction: Vec3) -> (f32, f32) {
    let yaw = direction.x.atan2(direction.z);
    let pitch = direction.y.clamp(-1.0, 1.0).asin();
    (yaw, pitch)
}

fn yaw_pitch_to_direction(yaw: f32, pitch: f32) -> Vec3 {
    let cos_pitch = pitch.cos();
    Vec3::new(yaw.sin() * cos_pitch, pitch.sin(), yaw.cos() * cos_pitch)
}

fn wrap_angle(angle: &mut f32) {
    if angle.is_finite() {
        *angle = (*angle + std::f32::consts::PI).rem_euclid(std::f32::consts::TAU)
            - std::f32::consts::PI;
    }
}
