//! Terminal viewer for AsciiBadger.
//!
//! Usage: `ascii-badger [--config <file.json>] [clip.glb ...]`
//!
//! With several clips, each one plays once (4 s fallback) and the last one
//! loops. With none, the first clip from the catalog loops. Logs go to the
//! file named by `BADGER_LOG_FILE`; stderr is unusable under the alternate
//! screen, so only errors are written there otherwise.

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::{cursor, event, execute, queue, style, terminal};

use ascii_badger::app::input::{command_for, ViewerCommand};
use ascii_badger::app::timing::FrameTiming;
use ascii_badger::config::load_config_from_file;
use ascii_badger::render::AsciiOutput;
use ascii_badger::ui::{ControlLabels, StatusBar};
use ascii_badger::{AsciiBadger, BadgerConfig, BadgerOptions, Host, QueueStep};

const TARGET_FPS: u32 = 30;
const QUEUE_FALLBACK_MS: u64 = 4_000;
const FIRST_LOAD_WAIT: Duration = Duration::from_secs(5);
/// Terminal cells are roughly twice as tall as they are wide.
const TERMINAL_CELL_ASPECT: f32 = 2.0;

/// Draws the character grid into the terminal, leaving the bottom row for the status bar.
struct TerminalHost {
    out: io::Stdout,
    columns: u16,
    rows: u16,
    resolution: f32,
}

impl TerminalHost {
    fn new(resolution: f32) -> Result<Self> {
        let (columns, rows) = terminal::size()?;
        Ok(Self {
            out: io::stdout(),
            columns,
            rows,
            resolution,
        })
    }

    fn resize(&mut self, columns: u16, rows: u16) {
        self.columns = columns;
        self.rows = rows;
        let _ = queue!(self.out, terminal::Clear(terminal::ClearType::All));
    }

    fn grid_rows(&self) -> u16 {
        self.rows.saturating_sub(1)
    }

    fn draw_status(&mut self, line: &str) -> io::Result<()> {
        let row = self.grid_rows();
        queue!(
            self.out,
            cursor::MoveTo(0, row),
            style::SetAttribute(style::Attribute::Reverse),
            style::Print(line),
            style::SetAttribute(style::Attribute::Reset),
        )?;
        self.out.flush()
    }

    fn draw_grid(&mut self, output: &AsciiOutput) -> io::Result<()> {
        match output {
            AsciiOutput::Empty => {}
            AsciiOutput::Text(text) => {
                for (y, line) in text.lines().enumerate().take(self.grid_rows() as usize) {
                    queue!(self.out, cursor::MoveTo(0, y as u16), style::Print(line))?;
                }
            }
            AsciiOutput::Colored(rows) => {
                for (y, row) in rows.iter().enumerate().take(self.grid_rows() as usize) {
                    queue!(self.out, cursor::MoveTo(0, y as u16))?;
                    for cell in row {
                        let [r, g, b] = cell.rgb;
                        queue!(
                            self.out,
                            style::SetForegroundColor(style::Color::Rgb { r, g, b }),
                            style::Print(cell.ch)
                        )?;
                    }
                }
                queue!(self.out, style::ResetColor)?;
            }
        }
        Ok(())
    }
}

impl Host for TerminalHost {
    /// Pixel size whose downsampled grid matches the terminal exactly.
    fn size(&self) -> (u32, u32) {
        let to_px = |cells: u16| ((f32::from(cells) + 0.5) / self.resolution) as u32;
        (to_px(self.columns), to_px(self.grid_rows()))
    }

    fn present(&mut self, output: &AsciiOutput) {
        if let Err(err) = self.draw_grid(output) {
            log::warn!("terminal write failed: {}", err);
        }
    }

    fn unmount(&mut self) {
        let _ = execute!(
            self.out,
            style::ResetColor,
            terminal::Clear(terminal::ClearType::All)
        );
    }
}

struct Args {
    config: Option<String>,
    clips: Vec<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut parsed = Args {
        config: None,
        clips: Vec::new(),
    };
    while let Some(arg) = args.next() {
        if arg == "--config" {
            parsed.config = Some(args.next().context("--config needs a file path")?);
        } else {
            parsed.clips.push(arg);
        }
    }
    Ok(parsed)
}

fn init_logging() -> Result<()> {
    let mut builder = match std::env::var_os("BADGER_LOG_FILE") {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("Failed to create log file {:?}", path))?;
            let mut builder =
                env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
            builder.target(env_logger::Target::Pipe(Box::new(file)));
            builder
        }
        None => env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("error")),
    };
    builder.format_timestamp_millis().init();
    Ok(())
}

fn load_config(args: &Args) -> Result<BadgerConfig> {
    match &args.config {
        Some(path) => load_config_from_file(Path::new(path))
            .with_context(|| format!("Failed to load config {}", path)),
        None => {
            let mut config = BadgerConfig::from_env();
            if std::env::var_os("BADGER_CELL_ASPECT").is_none() {
                config.ascii.cell_aspect = TERMINAL_CELL_ASPECT;
            }
            Ok(config)
        }
    }
}

fn queue_for(clips: &[String]) -> Vec<QueueStep> {
    let last = clips.len().saturating_sub(1);
    clips
        .iter()
        .enumerate()
        .map(|(i, clip)| {
            if i == last {
                QueueStep::forever(clip.as_str())
            } else {
                QueueStep::once(clip.as_str(), Some(QUEUE_FALLBACK_MS))
            }
        })
        .collect()
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = parse_args()?;
    init_logging()?;
    let config = load_config(&args)?;

    log::info!("AsciiBadger terminal viewer");
    log::info!("   clips from '{}'", config.anim_dir);

    let status = Rc::new(RefCell::new(StatusBar::new()));
    let sink = Rc::clone(&status);
    let host = TerminalHost::new(config.ascii.normalized().resolution)?;
    let mut badger = AsciiBadger::with_options(
        host,
        BadgerOptions {
            config,
            status: Some(Box::new(move |message: &str| sink.borrow_mut().set_status(message))),
            ..BadgerOptions::default()
        },
    )?;

    let mut stdout = io::stdout();
    terminal::enable_raw_mode()?;
    execute!(
        stdout,
        terminal::EnterAlternateScreen,
        cursor::Hide,
        terminal::Clear(terminal::ClearType::All),
    )?;

    let result = run_loop(&mut badger, &status, &args.clips);

    badger.dispose();
    let _ = execute!(stdout, cursor::Show, terminal::LeaveAlternateScreen);
    let _ = terminal::disable_raw_mode();

    log::info!("Goodbye!");
    result
}

fn run_loop(
    badger: &mut AsciiBadger<TerminalHost>,
    status: &Rc<RefCell<StatusBar>>,
    clips: &[String],
) -> Result<()> {
    let catalog = badger.list_animations();
    let mut next_clip = 0;
    match clips {
        [] => match catalog.first() {
            Some(first) => {
                badger.load_clip_path(first);
                next_clip = 1;
            }
            None => status.borrow_mut().set_status("No clips found"),
        },
        [single] => badger.load_clip_path(single),
        _ => badger.play_queue(queue_for(clips)),
    }
    if !badger.settle(FIRST_LOAD_WAIT) {
        log::warn!("first clip still loading after {:?}", FIRST_LOAD_WAIT);
    }

    let mut timing = FrameTiming::new(TARGET_FPS);
    loop {
        let started = Instant::now();
        if let Some(fps) = timing.update(started) {
            status.borrow_mut().set_fps(fps);
        }
        badger.frame(timing.frame_dt);

        let labels = ControlLabels {
            play: badger.play_label(),
            turntable: badger.turntable_label(),
            light_spin: badger.light_spin_label(),
        };
        let width = badger.host().columns as usize;
        let line = status.borrow().line(&labels, width);
        badger.host_mut().draw_status(&line)?;
        timing.set_render_ms(started.elapsed().as_secs_f32() * 1000.0);

        loop {
            let budget = timing.remaining(started.elapsed());
            if !event::poll(budget)? {
                break;
            }
            match event::read()? {
                event::Event::Key(key) => {
                    let Some(command) = command_for(key) else {
                        continue;
                    };
                    match command.apply(badger) {
                        Some(ViewerCommand::Quit) => return Ok(()),
                        Some(ViewerCommand::NextClip) if !catalog.is_empty() => {
                            let file = &catalog[next_clip % catalog.len()];
                            next_clip += 1;
                            badger.load_clip_path(file);
                        }
                        _ => {}
                    }
                }
                event::Event::Resize(columns, rows) => {
                    badger.host_mut().resize(columns, rows);
                    let (width, height) = badger.host().size();
                    badger.on_resize(width, height);
                }
                _ => {}
            }
        }
    }
}
