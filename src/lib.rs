//! AsciiBadger - real-time glTF to ASCII-art rendering.
//!
//! A host surface drives [`AsciiBadger`] once per frame; the engine loads
//! clips in the background, stages them on a turntable, plays their
//! animation (optionally as a queue of steps) and converts every rendered
//! frame into a character grid.

pub mod animation;
pub mod app;
pub mod assets;
pub mod config;
pub mod render;
pub mod scene;
pub mod ui;

pub use animation::{PlayerState, QueueStep, StepMode};
pub use app::{AsciiBadger, BadgerError, BadgerOptions, Host, StatusCallback};
pub use config::{BadgerConfig, DecoderConfig};
pub use render::{AsciiOptions, AsciiOutput, FrameRenderer};
