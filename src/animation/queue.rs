use super::LoopMode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepMode {
    LoopOnce,
    LoopForever,
}

impl StepMode {
    pub fn loop_mode(self) -> LoopMode {
        match self {
            StepMode::LoopOnce => LoopMode::Once,
            StepMode::LoopForever => LoopMode::Repeat,
        }
    }
}

/// One entry of a playback queue, as a host would describe it in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStep {
    pub file: String,
    pub mode: StepMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_ms: Option<u64>,
}

impl QueueStep {
    pub fn once(file: impl Into<String>, fallback_ms: Option<u64>) -> Self {
        Self {
            file: file.into(),
            mode: StepMode::LoopOnce,
            fallback_ms,
        }
    }

    pub fn forever(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            mode: StepMode::LoopForever,
            fallback_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    PlayingLoop,
    PlayingOnceAwaitingAdvance,
}

/// A clip the engine must load next on behalf of the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRequest {
    pub file: String,
    pub mode: LoopMode,
    pub generation: u64,
    pub index: usize,
}

/// Queue bookkeeping for single-clip and queued playback.
///
/// Every new request bumps `generation`; completions and timers tied to an
/// older generation or an older load are ignored.
#[derive(Debug)]
pub struct ClipPlayer {
    state: PlayerState,
    steps: Vec<QueueStep>,
    cursor: usize,
    generation: u64,
    deadline_ms: Option<u64>,
    active_load: Option<u64>,
}

impl Default for ClipPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl ClipPlayer {
    pub fn new() -> Self {
        Self {
            state: PlayerState::Idle,
            steps: Vec::new(),
            cursor: 0,
            generation: 0,
            deadline_ms: None,
            active_load: None,
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn current_step(&self) -> Option<&QueueStep> {
        match self.state {
            PlayerState::Idle => None,
            _ => self.steps.get(self.cursor),
        }
    }

    pub fn deadline_ms(&self) -> Option<u64> {
        self.deadline_ms
    }

    /// A direct load request: drops any queue and loops the new clip.
    pub fn play_single(&mut self) -> u64 {
        self.generation += 1;
        self.steps.clear();
        self.cursor = 0;
        self.deadline_ms = None;
        self.active_load = None;
        self.state = PlayerState::PlayingLoop;
        self.generation
    }

    /// Replaces whatever was playing with `steps` and returns the first load to issue.
    pub fn play_queue(&mut self, steps: Vec<QueueStep>, now_ms: u64) -> Option<StepRequest> {
        self.generation += 1;
        self.steps = steps;
        self.cursor = 0;
        self.deadline_ms = None;
        self.active_load = None;
        if self.steps.is_empty() {
            self.state = PlayerState::Idle;
            return None;
        }
        log::debug!(
            "queue: generation {} with {} steps",
            self.generation,
            self.steps.len()
        );
        self.begin_step(now_ms)
    }

    /// Ties the load issued for the current step to it, so only that load's
    /// completion can advance the queue.
    pub fn bind_load(&mut self, generation: u64, load_seq: u64) {
        if generation == self.generation {
            self.active_load = Some(load_seq);
        }
    }

    /// Natural completion of the clip attached by `load_seq`.
    pub fn clip_finished(&mut self, load_seq: u64, now_ms: u64) -> Option<StepRequest> {
        if self.state != PlayerState::PlayingOnceAwaitingAdvance
            || self.active_load != Some(load_seq)
        {
            return None;
        }
        log::debug!("queue: step {} finished", self.cursor);
        self.advance(now_ms)
    }

    /// Fires the fallback timer of the current step once it has expired.
    pub fn poll(&mut self, now_ms: u64) -> Option<StepRequest> {
        if self.state != PlayerState::PlayingOnceAwaitingAdvance {
            return None;
        }
        match self.deadline_ms {
            Some(deadline) if now_ms >= deadline => {
                log::debug!("queue: fallback timer advanced step {}", self.cursor);
                self.advance(now_ms)
            }
            _ => None,
        }
    }

    fn advance(&mut self, now_ms: u64) -> Option<StepRequest> {
        self.deadline_ms = None;
        self.active_load = None;
        if self.cursor + 1 >= self.steps.len() {
            self.state = PlayerState::Idle;
            return None;
        }
        self.cursor += 1;
        self.begin_step(now_ms)
    }

    fn begin_step(&mut self, now_ms: u64) -> Option<StepRequest> {
        let step = self.steps.get(self.cursor)?;
        match step.mode {
            StepMode::LoopForever => {
                self.state = PlayerState::PlayingLoop;
                self.deadline_ms = None;
            }
            StepMode::LoopOnce => {
                self.state = PlayerState::PlayingOnceAwaitingAdvance;
                self.deadline_ms = step.fallback_ms.map(|ms| now_ms.saturating_add(ms));
            }
        }
        Some(StepRequest {
            file: step.file.clone(),
            mode: step.mode.loop_mode(),
            generation: self.generation,
            index: self.cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_deserialize_from_host_json() {
        let steps: Vec<QueueStep> = serde_json::from_str(
            r#"[{"file":"wave.glb","mode":"loopOnce","fallbackMs":500},
                {"file":"idle.glb","mode":"loopForever"}]"#,
        )
        .unwrap();
        assert_eq!(steps[0], QueueStep::once("wave.glb", Some(500)));
        assert_eq!(steps[1], QueueStep::forever("idle.glb"));
    }

    #[test]
    fn fallback_timer_advances_without_completion() {
        let mut player = ClipPlayer::new();
        let first = player
            .play_queue(
                vec![QueueStep::once("a.glb", Some(500)), QueueStep::forever("b.glb")],
                1_000,
            )
            .unwrap();
        assert_eq!(first.file, "a.glb");
        assert_eq!(first.mode, LoopMode::Once);
        assert_eq!(player.state(), PlayerState::PlayingOnceAwaitingAdvance);

        assert_eq!(player.poll(1_499), None);
        let next = player.poll(1_500).unwrap();
        assert_eq!(next.file, "b.glb");
        assert_eq!(next.mode, LoopMode::Repeat);
        assert_eq!(player.state(), PlayerState::PlayingLoop);
        assert_eq!(player.poll(10_000), None);
    }

    #[test]
    fn completion_only_counts_for_the_bound_load() {
        let mut player = ClipPlayer::new();
        let request = player
            .play_queue(vec![QueueStep::once("a.glb", None), QueueStep::forever("b.glb")], 0)
            .unwrap();
        player.bind_load(request.generation, 7);

        assert_eq!(player.clip_finished(6, 10), None);
        let next = player.clip_finished(7, 10).unwrap();
        assert_eq!(next.index, 1);
    }

    #[test]
    fn preemption_invalidates_old_timers_and_completions() {
        let mut player = ClipPlayer::new();
        let old = player
            .play_queue(vec![QueueStep::once("a.glb", Some(100)), QueueStep::forever("b.glb")], 0)
            .unwrap();
        player.bind_load(old.generation, 1);

        let new = player
            .play_queue(vec![QueueStep::once("c.glb", Some(1_000))], 50)
            .unwrap();
        player.bind_load(old.generation, 99);
        player.bind_load(new.generation, 2);

        assert_eq!(player.poll(150), None);
        assert_eq!(player.clip_finished(1, 150), None);
        assert_eq!(player.current_step().map(|s| s.file.as_str()), Some("c.glb"));
    }

    #[test]
    fn last_play_once_step_returns_to_idle() {
        let mut player = ClipPlayer::new();
        player.play_queue(vec![QueueStep::once("a.glb", Some(10))], 0);
        assert_eq!(player.poll(10), None);
        assert_eq!(player.state(), PlayerState::Idle);
        assert!(player.current_step().is_none());
    }

    #[test]
    fn single_clip_and_empty_queue() {
        let mut player = ClipPlayer::new();
        let generation = player.play_single();
        assert_eq!(player.state(), PlayerState::PlayingLoop);
        assert_eq!(player.play_queue(Vec::new(), 0), None);
        assert_eq!(player.state(), PlayerState::Idle);
        assert!(player.generation() > generation);
    }
}
