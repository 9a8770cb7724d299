use super::{AsciiBadger, Host};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

const LIGHT_YAW_STEP_DEG: f32 = 15.0;
const LIGHT_HEIGHT_STEP: f32 = 0.5;
const LIGHT_DISTANCE_STEP: f32 = 0.5;
const MODEL_OFFSET_STEP: f32 = 0.1;
const ORBIT_STEP: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewerCommand {
    TogglePlay,
    ToggleTurntable,
    ToggleLightSpin,
    LightYaw(f32),
    LightHeight(f32),
    LightDistance(f32),
    ModelOffset(f32),
    Orbit { yaw: f32, pitch: f32 },
    Zoom(f32),
    NextClip,
    Quit,
}

pub fn command_for(key: KeyEvent) -> Option<ViewerCommand> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(ViewerCommand::Quit);
    }
    let command = match key.code {
        KeyCode::Char(' ') => ViewerCommand::TogglePlay,
        KeyCode::Char('t') => ViewerCommand::ToggleTurntable,
        KeyCode::Char('l') => ViewerCommand::ToggleLightSpin,
        KeyCode::Left => ViewerCommand::LightYaw(-LIGHT_YAW_STEP_DEG),
        KeyCode::Right => ViewerCommand::LightYaw(LIGHT_YAW_STEP_DEG),
        KeyCode::Up => ViewerCommand::LightHeight(LIGHT_HEIGHT_STEP),
        KeyCode::Down => ViewerCommand::LightHeight(-LIGHT_HEIGHT_STEP),
        KeyCode::Char('+') | KeyCode::Char('=') => ViewerCommand::LightDistance(LIGHT_DISTANCE_STEP),
        KeyCode::Char('-') => ViewerCommand::LightDistance(-LIGHT_DISTANCE_STEP),
        KeyCode::Char(']') => ViewerCommand::ModelOffset(MODEL_OFFSET_STEP),
        KeyCode::Char('[') => ViewerCommand::ModelOffset(-MODEL_OFFSET_STEP),
        KeyCode::Char('a') => ViewerCommand::Orbit { yaw: -ORBIT_STEP, pitch: 0.0 },
        KeyCode::Char('d') => ViewerCommand::Orbit { yaw: ORBIT_STEP, pitch: 0.0 },
        KeyCode::Char('w') => ViewerCommand::Orbit { yaw: 0.0, pitch: ORBIT_STEP },
        KeyCode::Char('s') => ViewerCommand::Orbit { yaw: 0.0, pitch: -ORBIT_STEP },
        KeyCode::Char('z') => ViewerCommand::Zoom(-0.25),
        KeyCode::Char('x') => ViewerCommand::Zoom(0.25),
        KeyCode::Char('n') => ViewerCommand::NextClip,
        KeyCode::Char('q') | KeyCode::Esc => ViewerCommand::Quit,
        _ => return None,
    };
    Some(command)
}

impl ViewerCommand {
    /// Applies engine-level commands. `NextClip` and `Quit` belong to the
    /// caller and are returned unchanged.
    pub fn apply<H: Host>(self, badger: &mut AsciiBadger<H>) -> Option<ViewerCommand> {
        match self {
            ViewerCommand::TogglePlay => {
                badger.toggle_play();
            }
            ViewerCommand::ToggleTurntable => {
                badger.toggle_turntable();
            }
            ViewerCommand::ToggleLightSpin => {
                badger.toggle_light_spin();
            }
            ViewerCommand::LightYaw(delta) => {
                let yaw = badger.light_yaw_degrees() + delta;
                badger.set_light_yaw_degrees(yaw);
            }
            ViewerCommand::LightHeight(delta) => {
                let height = badger.light_height() + delta;
                badger.set_light_height(height);
            }
            ViewerCommand::LightDistance(delta) => {
                let distance = badger.light_distance() + delta;
                badger.set_light_distance(distance);
            }
            ViewerCommand::ModelOffset(delta) => {
                let offset = badger.model_offset_y() + delta;
                badger.set_model_offset_y(offset);
            }
            ViewerCommand::Orbit { yaw, pitch } => badger.orbit(yaw, pitch),
            ViewerCommand::Zoom(delta) => badger.zoom(delta),
            ViewerCommand::NextClip | ViewerCommand::Quit => return Some(self),
        }
        None
    }
}
