mod host;
pub mod input;
pub mod timing;


pub use host::Host;

use crate::animation::{
    AnimationMixer, ClipPlayer, LoopMode, MixerEvent, PlayerState, QueueStep, StepRequest,
};
use crate::assets::{
    add_ground, add_skeleton_marker, instantiate, stage, AssetLoader, AssetSource, ClipCatalog,
    DracoCliDecoder, FetchError, FsSource, GeometryDecoder, HttpSource, LoadOutcome, ParsedAsset,
    Staged,
};
use crate::config::BadgerConfig;
use crate::render::{
    AsciiEffect, AsciiOutput, FrameRenderer, LightRig, OrbitControls, PerspectiveCamera,
    RenderError, SoftwareRenderer,
};
use crate::scene::{NodeId, SceneGraph};
use crate::ui;
use glam::{Quat, Vec3};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Turntable yaw added per rendered frame while it is spinning.
pub const TURNTABLE_STEP: f32 = 0.01;
const CAMERA_FOV_DEG: f32 = 45.0;

pub type StatusCallback = Box<dyn FnMut(&str)>;

#[derive(Debug, thiserror::Error)]
pub enum BadgerError {
    #[error("failed to set up asset source: {0}")]
    Source(#[from] FetchError),
}

/// Construction-time collaborators. Anything left `None` is built from the config.
#[derive(Default)]
pub struct BadgerOptions {
    pub config: BadgerConfig,
    pub renderer: Option<Box<dyn FrameRenderer>>,
    pub source: Option<Arc<dyn AssetSource>>,
    pub decoder: Option<Arc<dyn GeometryDecoder>>,
    pub status: Option<StatusCallback>,
}

enum LoadInput<'a> {
    Path(&'a str),
    Buffer(Vec<u8>, &'a str),
}

struct PendingLoad {
    seq: u64,
    mode: LoopMode,
}

/// The currently attached subject. Everything it added to the scene hangs off
/// `holder`, so one disposal frees the asset, its ground and its marker.
struct LoadedClip {
    holder: NodeId,
    seq: u64,
    label: String,
    clip_names: Vec<String>,
    marker: Option<NodeId>,
}

/// Real-time 3D-to-ASCII engine bound to one host surface.
///
/// The host drives it: `frame(dt)` once per display refresh and `on_resize`
/// whenever its size changes. Loads run in the background and are attached
/// during a later frame; nothing here returns an error or panics out after
/// construction.
pub struct AsciiBadger<H: Host> {
    host: H,
    config: BadgerConfig,
    scene: SceneGraph,
    camera: PerspectiveCamera,
    controls: OrbitControls,
    lights: LightRig,
    turntable: NodeId,
    turntable_yaw: f32,
    turntable_spin: bool,
    model_offset_y: f32,
    effect: AsciiEffect,
    loader: AssetLoader,
    mixer: AnimationMixer,
    player: ClipPlayer,
    clip: Option<LoadedClip>,
    pending: Option<PendingLoad>,
    status: Option<StatusCallback>,
    playing: bool,
    clock_ms: f64,
    frames: u64,
    resize_active: bool,
    disposed: bool,
}

impl<H: Host> AsciiBadger<H> {
    pub fn new(host: H, config: BadgerConfig) -> Result<Self, BadgerError> {
        Self::with_options(
            host,
            BadgerOptions {
                config,
                ..BadgerOptions::default()
            },
        )
    }

    pub fn with_options(mut host: H, options: BadgerOptions) -> Result<Self, BadgerError> {
        let config = options.config.normalized();
        let source: Arc<dyn AssetSource> = match (options.source, &config.asset_base_url) {
            (Some(source), _) => source,
            (None, Some(base_url)) => Arc::new(HttpSource::new(base_url)?),
            (None, None) => Arc::new(FsSource::default()),
        };
        let decoder = options.decoder.or_else(|| {
            config.decoder.enabled.then(|| {
                Arc::new(DracoCliDecoder::new(&config.decoder.path)) as Arc<dyn GeometryDecoder>
            })
        });
        let renderer = options
            .renderer
            .unwrap_or_else(|| Box::new(SoftwareRenderer::new()));

        let mut scene = SceneGraph::new();
        let lights = LightRig::new(&mut scene);
        let root = scene.root();
        let turntable = scene.add_group(root, "Turntable");
        let effect = AsciiEffect::new(renderer, &config.char_ramp, config.ascii);
        let loader = AssetLoader::new(source, decoder, config.anim_dir.clone());

        host.mount();
        let mut badger = Self {
            host,
            scene,
            camera: PerspectiveCamera::new(CAMERA_FOV_DEG, 1.0),
            controls: OrbitControls::default(),
            lights,
            turntable,
            turntable_yaw: 0.0,
            turntable_spin: false,
            model_offset_y: 0.0,
            effect,
            loader,
            mixer: AnimationMixer::new(),
            player: ClipPlayer::new(),
            clip: None,
            pending: None,
            status: options.status,
            playing: true,
            clock_ms: 0.0,
            frames: 0,
            resize_active: true,
            disposed: false,
            config,
        };
        let (width, height) = badger.host.size();
        badger.apply_size(width, height);
        log::info!(
            "AsciiBadger ready: {}x{} px, {}x{} cells, clips from '{}'",
            width,
            height,
            badger.effect.grid_size().0,
            badger.effect.grid_size().1,
            badger.config.anim_dir
        );
        Ok(badger)
    }

    // ---- host plumbing ----

    /// Resize notification from the host; applied before the next frame renders.
    pub fn on_resize(&mut self, width: u32, height: u32) {
        if self.disposed || !self.resize_active {
            return;
        }
        self.apply_size(width, height);
    }

    fn apply_size(&mut self, width: u32, height: u32) {
        self.camera
            .set_viewport(width, height, self.effect.options().cell_aspect);
        self.effect.set_size(width, height);
    }

    /// One tick of the render loop. Errors and panics are logged, never propagated.
    pub fn frame(&mut self, dt: f32) {
        if self.disposed {
            return;
        }
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.step(dt))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::warn!("frame {}: {}", self.frames, err),
            Err(_) => log::error!("frame {} panicked; continuing", self.frames),
        }
    }

    fn step(&mut self, dt: f32) -> Result<(), RenderError> {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.clock_ms += f64::from(dt) * 1000.0;
        self.frames += 1;

        for outcome in self.loader.drain() {
            self.apply_outcome(outcome);
        }
        let now = self.now_ms();
        if let Some(request) = self.player.poll(now) {
            self.issue_step(request);
        }

        if self.turntable_spin {
            self.turntable_yaw =
                (self.turntable_yaw + TURNTABLE_STEP).rem_euclid(std::f32::consts::TAU);
            self.apply_turntable();
        }
        self.lights.tick(&mut self.scene);

        if self.mixer.update(dt, &mut self.scene) == Some(MixerEvent::Finished) {
            let finished = self.clip.as_ref().map(|clip| clip.seq);
            if let Some(request) = finished.and_then(|seq| self.player.clip_finished(seq, now)) {
                self.issue_step(request);
            }
        }

        self.effect.render(&self.scene, &self.camera)?;
        self.host.present(self.effect.output());
        Ok(())
    }

    /// Blocks until every in-flight load has reported or `timeout` elapses,
    /// attaching the newest result. Returns `false` on timeout.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.loader.in_flight() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            if let Some(outcome) = self.loader.wait(remaining) {
                self.apply_outcome(outcome);
            }
        }
        true
    }

    fn now_ms(&self) -> u64 {
        self.clock_ms as u64
    }

    fn report(&mut self, message: String) {
        log::info!("{}", message);
        if let Some(status) = self.status.as_mut() {
            status(&message);
        }
    }

    // ---- loading ----

    /// Loads `anim_dir/file_name` and loops its first clip, replacing any queue.
    pub fn load_clip_path(&mut self, file_name: &str) {
        if self.disposed {
            return;
        }
        self.player.play_single();
        self.start_load(LoadInput::Path(file_name), LoopMode::Repeat, None);
    }

    /// Same as `load_clip_path` for bytes already in memory.
    pub fn load_clip_buffer(&mut self, bytes: Vec<u8>, label: &str) {
        if self.disposed {
            return;
        }
        self.player.play_single();
        self.start_load(LoadInput::Buffer(bytes, label), LoopMode::Repeat, None);
    }

    /// Replaces current playback with `steps`, preempting any earlier queue.
    pub fn play_queue(&mut self, steps: Vec<QueueStep>) {
        if self.disposed {
            return;
        }
        let now = self.now_ms();
        if let Some(request) = self.player.play_queue(steps, now) {
            self.issue_step(request);
        }
    }

    fn issue_step(&mut self, request: StepRequest) {
        log::debug!(
            "queue: step {} -> {} ({:?})",
            request.index,
            request.file,
            request.mode
        );
        self.start_load(
            LoadInput::Path(&request.file),
            request.mode,
            Some(request.generation),
        );
    }

    fn start_load(&mut self, input: LoadInput<'_>, mode: LoopMode, generation: Option<u64>) {
        let (label, started) = match input {
            LoadInput::Path(file_name) => (file_name.to_string(), self.loader.load_path(file_name)),
            LoadInput::Buffer(bytes, label) => (label.to_string(), self.loader.load_buffer(bytes, label)),
        };
        match started {
            Ok(seq) => {
                self.pending = Some(PendingLoad { seq, mode });
                if let Some(generation) = generation {
                    self.player.bind_load(generation, seq);
                }
                self.report(format!("Loading: {}", label));
            }
            Err(err) => {
                log::warn!("could not start load of {}: {}", label, err);
                self.report(format!("Failed: {} ({})", label, err));
            }
        }
    }

    fn apply_outcome(&mut self, outcome: LoadOutcome) {
        if !self.loader.is_current(outcome.seq) {
            log::debug!(
                "discarding stale load #{} ({}); newest is #{}",
                outcome.seq,
                outcome.label,
                self.loader.latest()
            );
            return;
        }
        let mode = match self.pending.take() {
            Some(pending) if pending.seq == outcome.seq => pending.mode,
            _ => LoopMode::Repeat,
        };
        match outcome.result {
            Ok(asset) => self.attach(outcome.seq, asset, mode),
            Err(err) => {
                log::warn!("load #{} of {} failed: {}", outcome.seq, outcome.label, err);
                self.report(format!("Failed: {} ({})", outcome.label, err));
            }
        }
    }

    fn attach(&mut self, seq: u64, asset: ParsedAsset, mode: LoopMode) {
        self.clear_clip();

        let holder = self.scene.add_group(self.turntable, "LoadedClip");
        let instance = instantiate(&asset, &mut self.scene, holder);
        let has_mesh = self.scene.contains_mesh(instance.root);
        let staged = stage(&mut self.scene, instance.root, self.turntable);
        let marker = if has_mesh {
            None
        } else {
            add_skeleton_marker(&mut self.scene, holder, instance.root)
        };
        if !has_mesh && marker.is_none() {
            log::warn!("{} has neither mesh nor skeleton; nothing to show", asset.label);
        }
        if let Some(staged) = staged {
            add_ground(&mut self.scene, holder, &staged);
            self.frame_subject(&staged);
        }

        let clip_names = asset.clip_names();
        self.mixer = AnimationMixer::new();
        self.playing = true;
        if let Some(clip) = asset.clips.first() {
            if asset.clips.len() > 1 {
                log::info!(
                    "{} carries {} clips; playing '{}'",
                    asset.label,
                    asset.clips.len(),
                    clip.name
                );
            }
            let bindings = instance.bindings_for(clip);
            self.mixer.play(clip.clone(), bindings, mode);
        }

        log::info!(
            "attached #{} {}: {} triangles, {} clips{}",
            seq,
            asset.label,
            asset.triangle_count(),
            clip_names.len(),
            if marker.is_some() { ", skeleton marker" } else { "" }
        );
        let label = asset.label;
        self.clip = Some(LoadedClip {
            holder,
            seq,
            label: label.clone(),
            clip_names,
            marker,
        });
        self.report(format!("Loaded: {}", label));
    }

    fn frame_subject(&mut self, staged: &Staged) {
        let to_world = self.scene.world_matrix(self.turntable);
        let focus = to_world.transform_point3(staged.focus());
        let radius = staged.radius();
        self.camera.frame_sphere(focus, radius);
        self.controls.fit_radius(focus, radius);
    }

    /// Disposes the attached subject and its mixer. Safe on an empty state.
    fn clear_clip(&mut self) {
        self.mixer = AnimationMixer::new();
        if let Some(clip) = self.clip.take() {
            let report = self.scene.dispose_subtree(clip.holder);
            log::info!(
                "released {}: {} nodes, {} geometries, {} materials",
                clip.label,
                report.nodes,
                report.geometries,
                report.materials
            );
        }
    }

    // ---- controls ----

    /// Flips playback of the current clip; no effect without one.
    pub fn toggle_play(&mut self) -> bool {
        self.set_playing(!self.playing);
        self.playing
    }

    pub fn set_playing(&mut self, playing: bool) {
        if !self.mixer.has_action() {
            return;
        }
        self.playing = playing;
        self.mixer.set_time_scale(if playing { 1.0 } else { 0.0 });
    }

    pub fn toggle_turntable(&mut self) -> bool {
        self.turntable_spin = !self.turntable_spin;
        self.turntable_spin
    }

    pub fn toggle_light_spin(&mut self) -> bool {
        self.lights.toggle_spin()
    }

    pub fn set_model_offset_y(&mut self, offset: f32) {
        if !offset.is_finite() {
            return;
        }
        self.model_offset_y = offset;
        self.apply_turntable();
    }

    pub fn set_light_yaw_degrees(&mut self, degrees: f32) {
        self.lights.set_yaw_degrees(&mut self.scene, degrees);
    }

    pub fn set_light_height(&mut self, height: f32) {
        self.lights.set_height(&mut self.scene, height);
    }

    pub fn set_light_distance(&mut self, distance: f32) {
        self.lights.set_distance(&mut self.scene, distance);
    }

    pub fn orbit(&mut self, yaw_delta: f32, pitch_delta: f32) {
        self.controls.orbit(&mut self.camera, yaw_delta, pitch_delta);
    }

    pub fn zoom(&mut self, delta: f32) {
        self.controls.zoom(&mut self.camera, delta);
    }

    fn apply_turntable(&mut self) {
        if let Some(node) = self.scene.node_mut(self.turntable) {
            node.transform.rotation = Quat::from_rotation_y(self.turntable_yaw);
            node.transform.translation = Vec3::new(0.0, self.model_offset_y, 0.0);
        }
    }

    /// Clip file names from the catalog chain. Blocks on the asset source.
    pub fn list_animations(&self) -> Vec<String> {
        ClipCatalog::new(self.loader.source(), &self.config)
            .resolve()
            .files
    }

    // ---- labels and state ----

    pub fn play_label(&self) -> &'static str {
        ui::play_label(self.playing)
    }

    pub fn turntable_label(&self) -> &'static str {
        ui::turntable_label(self.turntable_spin)
    }

    pub fn light_spin_label(&self) -> &'static str {
        ui::light_spin_label(self.lights.is_spinning())
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_turntable_spinning(&self) -> bool {
        self.turntable_spin
    }

    pub fn is_light_spinning(&self) -> bool {
        self.lights.is_spinning()
    }

    pub fn light_yaw_degrees(&self) -> f32 {
        self.lights.yaw_degrees()
    }

    pub fn light_height(&self) -> f32 {
        self.lights.height()
    }

    pub fn light_distance(&self) -> f32 {
        self.lights.distance()
    }

    pub fn model_offset_y(&self) -> f32 {
        self.model_offset_y
    }

    pub fn turntable_yaw(&self) -> f32 {
        self.turntable_yaw
    }

    /// Label of the attached subject, if any.
    pub fn current_clip(&self) -> Option<&str> {
        self.clip.as_ref().map(|clip| clip.label.as_str())
    }

    /// Names of every animation in the attached asset; only the first one plays.
    pub fn clip_names(&self) -> &[String] {
        self.clip
            .as_ref()
            .map(|clip| clip.clip_names.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_skeleton_marker(&self) -> bool {
        self.clip.as_ref().is_some_and(|clip| clip.marker.is_some())
    }

    pub fn animation_time(&self) -> f32 {
        self.mixer.time()
    }

    pub fn player_state(&self) -> PlayerState {
        self.player.state()
    }

    /// Loaded subjects currently under the turntable (zero or one).
    pub fn attached_clip_count(&self) -> usize {
        self.scene
            .node(self.turntable)
            .map_or(0, |node| node.children.len())
    }

    pub fn output(&self) -> &AsciiOutput {
        self.effect.output()
    }

    pub fn grid_size(&self) -> (u32, u32) {
        self.effect.grid_size()
    }

    pub fn config(&self) -> &BadgerConfig {
        &self.config
    }

    pub fn scene(&self) -> &SceneGraph {
        &self.scene
    }

    pub fn camera(&self) -> &PerspectiveCamera {
        &self.camera
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    // ---- teardown ----

    /// Tears everything down in dependency order. Later calls are no-ops.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.resize_active = false;
        self.clear_clip();
        self.controls.dispose();
        self.loader.dispose();
        self.effect.renderer_mut().dispose();
        self.effect.dispose();
        self.host.unmount();
        log::info!("AsciiBadger disposed after {} frames", self.frames);
    }
}

impl<H: Host> Drop for AsciiBadger<H> {
    fn drop(&mut self) {
        self.dispose();
    }
}
