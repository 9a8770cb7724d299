//! Keyframe clips and the per-clip mixer that poses scene nodes from them.

mod queue;

pub use queue::{ClipPlayer, PlayerState, QueueStep, StepMode, StepRequest};

use crate::scene::{NodeId, SceneGraph};
use glam::{Quat, Vec3, Vec4};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Step,
    Linear,
    /// Values are stored as `[in_tangent, value, out_tangent]` per key.
    CubicSpline,
}

#[derive(Debug, Clone)]
pub enum TrackValues {
    Translation(Vec<Vec3>),
    Rotation(Vec<Quat>),
    Scale(Vec<Vec3>),
}

#[derive(Debug, Clone)]
pub struct Track {
    /// Index of the target node inside the source asset.
    pub target: usize,
    pub times: Vec<f32>,
    pub values: TrackValues,
    pub interpolation: Interpolation,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    Translation(Vec3),
    Rotation(Quat),
    Scale(Vec3),
}

impl Track {
    pub fn sample(&self, time: f32) -> Option<Sample> {
        match &self.values {
            TrackValues::Translation(values) => {
                sample_keys(&self.times, values, self.interpolation, time).map(Sample::Translation)
            }
            TrackValues::Rotation(values) => {
                sample_keys(&self.times, values, self.interpolation, time)
                    .map(|q: Quat| Sample::Rotation(q.normalize()))
            }
            TrackValues::Scale(values) => {
                sample_keys(&self.times, values, self.interpolation, time).map(Sample::Scale)
            }
        }
    }

    fn end_time(&self) -> f32 {
        self.times
            .iter()
            .copied()
            .filter(|t| t.is_finite())
            .fold(0.0, f32::max)
    }
}

#[derive(Debug, Clone)]
pub struct AnimationClip {
    pub name: String,
    /// Seconds; the latest key time over all tracks.
    pub duration: f32,
    pub tracks: Vec<Track>,
}

impl AnimationClip {
    pub fn new(name: impl Into<String>, tracks: Vec<Track>) -> Self {
        let duration = tracks.iter().map(Track::end_time).fold(0.0, f32::max);
        Self {
            name: name.into(),
            duration,
            tracks,
        }
    }
}

trait Keyframe: Copy {
    fn lerp_to(self, other: Self, t: f32) -> Self;
    fn hermite(p0: Self, m0: Self, p1: Self, m1: Self, t: f32, dt: f32) -> Self;
}

fn hermite_weights(t: f32) -> [f32; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        2.0 * t3 - 3.0 * t2 + 1.0,
        t3 - 2.0 * t2 + t,
        -2.0 * t3 + 3.0 * t2,
        t3 - t2,
    ]
}

impl Keyframe for Vec3 {
    fn lerp_to(self, other: Self, t: f32) -> Self {
        self.lerp(other, t)
    }

    fn hermite(p0: Self, m0: Self, p1: Self, m1: Self, t: f32, dt: f32) -> Self {
        let [a, b, c, d] = hermite_weights(t);
        p0 * a + m0 * (b * dt) + p1 * c + m1 * (d * dt)
    }
}

impl Keyframe for Quat {
    fn lerp_to(self, other: Self, t: f32) -> Self {
        self.slerp(other, t)
    }

    fn hermite(p0: Self, m0: Self, p1: Self, m1: Self, t: f32, dt: f32) -> Self {
        let [a, b, c, d] = hermite_weights(t);
        let v = Vec4::from(p0) * a + Vec4::from(m0) * (b * dt) + Vec4::from(p1) * c
            + Vec4::from(m1) * (d * dt);
        Quat::from_vec4(v).normalize()
    }
}

fn sample_keys<T: Keyframe>(
    times: &[f32],
    values: &[T],
    interpolation: Interpolation,
    time: f32,
) -> Option<T> {
    let count = times.len();
    if count == 0 {
        return None;
    }
    let cubic = interpolation == Interpolation::CubicSpline;
    let value = |key: usize| {
        if cubic {
            values.get(key * 3 + 1).copied()
        } else {
            values.get(key).copied()
        }
    };
    if count == 1 || time <= times[0] {
        return value(0);
    }
    if time >= times[count - 1] {
        return value(count - 1);
    }
    let next = times.partition_point(|t| *t <= time).clamp(1, count - 1);
    let prev = next - 1;
    let span = times[next] - times[prev];
    let alpha = if span > 0.0 {
        ((time - times[prev]) / span).clamp(0.0, 1.0)
    } else {
        0.0
    };
    match interpolation {
        Interpolation::Step => value(prev),
        Interpolation::Linear => Some(value(prev)?.lerp_to(value(next)?, alpha)),
        Interpolation::CubicSpline => {
            let p0 = value(prev)?;
            let p1 = value(next)?;
            let m0 = values.get(prev * 3 + 2).copied()?;
            let m1 = values.get(next * 3).copied()?;
            Some(T::hermite(p0, m0, p1, m1, alpha, span))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    Once,
    Repeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerEvent {
    Finished,
}

struct Action {
    clip: AnimationClip,
    bindings: Vec<Option<NodeId>>,
    time: f32,
    mode: LoopMode,
    finished: bool,
}

/// Drives one clip against the nodes of one loaded asset.
///
/// Pausing is a time scale of `0.0`; the pose is still applied every update.
pub struct AnimationMixer {
    action: Option<Action>,
    time_scale: f32,
}

impl Default for AnimationMixer {
    fn default() -> Self {
        Self::new()
    }
}

impl AnimationMixer {
    pub fn new() -> Self {
        Self {
            action: None,
            time_scale: 1.0,
        }
    }

    /// Starts `clip` from time zero. `bindings[i]` is the node driven by `clip.tracks[i]`.
    pub fn play(&mut self, clip: AnimationClip, bindings: Vec<Option<NodeId>>, mode: LoopMode) {
        log::debug!(
            "mixer: playing '{}' ({:.2}s, {} tracks, {:?})",
            clip.name,
            clip.duration,
            clip.tracks.len(),
            mode
        );
        self.action = Some(Action {
            clip,
            bindings,
            time: 0.0,
            mode,
            finished: false,
        });
    }

    pub fn has_action(&self) -> bool {
        self.action.is_some()
    }

    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    pub fn set_time_scale(&mut self, time_scale: f32) {
        self.time_scale = time_scale;
    }

    pub fn time(&self) -> f32 {
        self.action.as_ref().map_or(0.0, |action| action.time)
    }

    pub fn clip_name(&self) -> Option<&str> {
        self.action.as_ref().map(|action| action.clip.name.as_str())
    }

    pub fn is_finished(&self) -> bool {
        self.action.as_ref().is_some_and(|action| action.finished)
    }

    /// Advances by `dt` seconds and poses the bound nodes.
    ///
    /// A play-once clip reports `Finished` exactly once, then holds its last pose.
    /// A play-once clip with zero duration finishes on its first advancing update.
    pub fn update(&mut self, dt: f32, scene: &mut SceneGraph) -> Option<MixerEvent> {
        let delta = if dt.is_finite() { dt * self.time_scale } else { 0.0 };
        let action = self.action.as_mut()?;
        let duration = if action.clip.duration.is_finite() {
            action.clip.duration.max(0.0)
        } else {
            0.0
        };
        let mut event = None;
        if !action.finished && delta != 0.0 {
            action.time += delta;
            match action.mode {
                LoopMode::Repeat => {
                    action.time = if duration > 0.0 {
                        action.time.rem_euclid(duration)
                    } else {
                        0.0
                    };
                }
                LoopMode::Once => {
                    if duration <= 0.0 || action.time >= duration {
                        action.time = duration;
                        action.finished = true;
                        event = Some(MixerEvent::Finished);
                    } else if action.time < 0.0 {
                        action.time = 0.0;
                    }
                }
            }
        }
        apply_pose(action, scene);
        event
    }
}

fn apply_pose(action: &Action, scene: &mut SceneGraph) {
    for (track, binding) in action.clip.tracks.iter().zip(&action.bindings) {
        let Some(node) = binding.and_then(|id| scene.node_mut(id)) else {
            continue;
        };
        match track.sample(action.time) {
            Some(Sample::Translation(value)) => node.transform.translation = value,
            Some(Sample::Rotation(value)) => node.transform.rotation = value,
            Some(Sample::Scale(value)) => node.transform.scale = value,
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slide_clip(duration: f32, interpolation: Interpolation) -> AnimationClip {
        AnimationClip::new(
            "slide",
            vec![Track {
                target: 0,
                times: vec![0.0, duration],
                values: TrackValues::Translation(vec![Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0)]),
                interpolation,
            }],
        )
    }

    fn scene_with_node() -> (SceneGraph, NodeId) {
        let mut scene = SceneGraph::new();
        let root = scene.root();
        let node = scene.add_group(root, "target");
        (scene, node)
    }

    #[test]
    fn linear_translation_interpolates() {
        let clip = slide_clip(2.0, Interpolation::Linear);
        assert_eq!(clip.duration, 2.0);
        assert_eq!(
            clip.tracks[0].sample(0.5),
            Some(Sample::Translation(Vec3::new(2.5, 0.0, 0.0)))
        );
        assert_eq!(
            clip.tracks[0].sample(5.0),
            Some(Sample::Translation(Vec3::new(10.0, 0.0, 0.0)))
        );
    }

    #[test]
    fn step_interpolation_holds_previous_key() {
        let clip = slide_clip(2.0, Interpolation::Step);
        assert_eq!(
            clip.tracks[0].sample(1.9),
            Some(Sample::Translation(Vec3::ZERO))
        );
    }

    #[test]
    fn cubic_spline_hits_keys_with_zero_tangents() {
        let track = Track {
            target: 0,
            times: vec![0.0, 1.0],
            values: TrackValues::Scale(vec![
                Vec3::ZERO,
                Vec3::ONE,
                Vec3::ZERO,
                Vec3::ZERO,
                Vec3::splat(3.0),
                Vec3::ZERO,
            ]),
            interpolation: Interpolation::CubicSpline,
        };
        assert_eq!(track.sample(0.0), Some(Sample::Scale(Vec3::ONE)));
        assert_eq!(track.sample(1.0), Some(Sample::Scale(Vec3::splat(3.0))));
        match track.sample(0.5) {
            Some(Sample::Scale(value)) => assert!((value - Vec3::splat(2.0)).length() < 1e-5),
            other => panic!("unexpected sample {:?}", other),
        }
    }

    #[test]
    fn rotation_slerps_and_stays_normalized() {
        let track = Track {
            target: 0,
            times: vec![0.0, 1.0],
            values: TrackValues::Rotation(vec![
                Quat::IDENTITY,
                Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
            ]),
            interpolation: Interpolation::Linear,
        };
        match track.sample(0.5) {
            Some(Sample::Rotation(q)) => {
                assert!((q.length() - 1.0).abs() < 1e-5);
                let expected = Quat::from_rotation_y(std::f32::consts::FRAC_PI_4);
                assert!(q.dot(expected).abs() > 0.9999);
            }
            other => panic!("unexpected sample {:?}", other),
        }
    }

    #[test]
    fn once_mode_finishes_exactly_once_and_holds() {
        let (mut scene, node) = scene_with_node();
        let mut mixer = AnimationMixer::new();
        mixer.play(slide_clip(1.0, Interpolation::Linear), vec![Some(node)], LoopMode::Once);

        assert_eq!(mixer.update(0.5, &mut scene), None);
        assert_eq!(mixer.update(0.6, &mut scene), Some(MixerEvent::Finished));
        assert_eq!(mixer.update(0.5, &mut scene), None);
        assert!(mixer.is_finished());
        let position = scene.node(node).unwrap().transform.translation;
        assert_eq!(position, Vec3::new(10.0, 0.0, 0.0));
    }

    #[test]
    fn repeat_mode_wraps() {
        let (mut scene, node) = scene_with_node();
        let mut mixer = AnimationMixer::new();
        mixer.play(slide_clip(1.0, Interpolation::Linear), vec![Some(node)], LoopMode::Repeat);
        for _ in 0..5 {
            assert_eq!(mixer.update(0.3, &mut scene), None);
        }
        assert!((mixer.time() - 0.5).abs() < 1e-4);
    }

    #[test]
    fn zero_time_scale_pauses() {
        let (mut scene, node) = scene_with_node();
        let mut mixer = AnimationMixer::new();
        mixer.play(slide_clip(1.0, Interpolation::Linear), vec![Some(node)], LoopMode::Once);
        mixer.set_time_scale(0.0);
        assert_eq!(mixer.update(5.0, &mut scene), None);
        assert_eq!(mixer.time(), 0.0);
    }

    #[test]
    fn zero_duration_once_clip_finishes_immediately() {
        let (mut scene, _) = scene_with_node();
        let mut mixer = AnimationMixer::new();
        mixer.play(AnimationClip::new("empty", Vec::new()), Vec::new(), LoopMode::Once);
        assert_eq!(mixer.update(0.016, &mut scene), Some(MixerEvent::Finished));
    }

    #[test]
    fn stale_bindings_are_skipped() {
        let (mut scene, node) = scene_with_node();
        scene.dispose_subtree(node);
        let mut mixer = AnimationMixer::new();
        mixer.play(slide_clip(1.0, Interpolation::Linear), vec![Some(node)], LoopMode::Repeat);
        assert_eq!(mixer.update(0.1, &mut scene), None);
    }
}
