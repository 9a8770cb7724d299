//! Text for host-rendered controls and the viewer's status line.

pub fn play_label(playing: bool) -> &'static str {
    if playing {
        "Pause"
    } else {
        "Play"
    }
}

pub fn turntable_label(spinning: bool) -> &'static str {
    if spinning {
        "Turntable: On"
    } else {
        "Turntable: Off"
    }
}

pub fn light_spin_label(spinning: bool) -> &'static str {
    if spinning {
        "Light spin: On"
    } else {
        "Light spin: Off"
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlLabels {
    pub play: &'static str,
    pub turntable: &'static str,
    pub light_spin: &'static str,
}

/// Last status message plus frame-rate readout, rendered as one line.
#[derive(Debug, Default, Clone)]
pub struct StatusBar {
    status: String,
    fps: Option<f32>,
}

impl StatusBar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn set_status(&mut self, status: &str) {
        self.status = status.to_string();
    }

    pub fn set_fps(&mut self, fps: f32) {
        self.fps = Some(fps);
    }

    /// The bar padded or truncated to exactly `width` characters.
    pub fn line(&self, labels: &ControlLabels, width: usize) -> String {
        let mut line = format!(
            " [space] {} | [t] {} | [l] {}",
            labels.play, labels.turntable, labels.light_spin
        );
        if let Some(fps) = self.fps {
            line.push_str(&format!(" | {:.0} fps", fps));
        }
        if !self.status.is_empty() {
            line.push_str(" | ");
            line.push_str(&self.status);
        }
        let mut out: String = line.chars().take(width).collect();
        let len = out.chars().count();
        out.extend(std::iter::repeat(' ').take(width - len));
        out
    }
}
