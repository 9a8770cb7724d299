use std::time::{Duration, Instant};

/// Frame pacing and a twice-per-second fps readout.
pub struct FrameTiming {
    last_frame_time: Option<Instant>,
    last_fps_time: Instant,
    frame_count: u32,
    pub frame_dt: f32,
    render_ms: f32,
    target_frame: Duration,
}

impl FrameTiming {
    pub fn new(target_fps: u32) -> Self {
        Self {
            last_frame_time: None,
            last_fps_time: Instant::now(),
            frame_count: 0,
            frame_dt: 1.0 / 60.0,
            render_ms: 0.0,
            target_frame: Duration::from_secs_f64(1.0 / f64::from(target_fps.max(1))),
        }
    }

    pub fn set_render_ms(&mut self, render_ms: f32) {
        self.render_ms = render_ms;
    }

    pub fn target_frame(&self) -> Duration {
        self.target_frame
    }

    /// Records a frame boundary. Returns the fps measured over the last
    /// window when one has just closed.
    pub fn update(&mut self, now: Instant) -> Option<f32> {
        let dt_duration = if let Some(last) = self.last_frame_time {
            now.saturating_duration_since(last)
        } else {
            Duration::from_millis(16)
        };
        self.last_frame_time = Some(now);
        self.frame_dt = dt_duration.as_secs_f32().max(0.0);

        self.frame_count = self.frame_count.saturating_add(1);
        let elapsed = now.saturating_duration_since(self.last_fps_time);
        if elapsed.as_secs_f32() < 0.5 {
            return None;
        }
        let fps = self.frame_count as f32 / elapsed.as_secs_f32();
        log::debug!(
            "{:.1} fps (cadence {:.2} ms, render {:.2} ms)",
            fps,
            self.frame_dt * 1000.0,
            self.render_ms
        );
        self.frame_count = 0;
        self.last_fps_time = now;
        Some(fps)
    }

    /// Time left in the current frame budget after `spent`.
    pub fn remaining(&self, spent: Duration) -> Duration {
        self.target_frame.saturating_sub(spent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dt_and_fps_window() {
        let mut timing = FrameTiming::new(60);
        let start = Instant::now();
        assert_eq!(timing.update(start), None);
        assert!((timing.frame_dt - 0.016).abs() < 1e-6);

        let later = start + Duration::from_millis(600);
        let fps = timing.update(later);
        assert!(fps.is_some());
        assert!((timing.frame_dt - 0.6).abs() < 1e-4);
    }

    #[test]
    fn remaining_budget_saturates() {
        let timing = FrameTiming::new(50);
        assert_eq!(timing.target_frame(), Duration::from_millis(20));
        assert_eq!(timing.remaining(Duration::from_millis(5)), Duration::from_millis(15));
        assert_eq!(timing.remaining(Duration::from_millis(50)), Duration::ZERO);
    }
}
