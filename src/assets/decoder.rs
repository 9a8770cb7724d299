use crate::scene::Geometry;
use glam::Vec3;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("decoder has been disposed")]
    Disposed,
    #[error("decoder tool not found at {0}")]
    ToolMissing(String),
    #[error("decoder IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decoder exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("malformed decoder output: {0}")]
    Malformed(String),
}

/// Shared decoder for compressed geometry streams.
///
/// One instance is installed per engine and used by every load; `dispose`
/// releases its resources and later calls fail with `Disposed`.
pub trait GeometryDecoder: Send + Sync {
    fn name(&self) -> &str;
    fn decode(&self, compressed: &[u8]) -> Result<Geometry, DecodeError>;
    fn dispose(&self);
}

const TOOL_NAME: &str = if cfg!(windows) {
    "draco_decoder.exe"
} else {
    "draco_decoder"
};

/// Decodes Draco streams with the `draco_decoder` tool found in the
/// decoder-files directory.
pub struct DracoCliDecoder {
    tool: PathBuf,
    scratch: PathBuf,
    counter: AtomicU64,
    disposed: AtomicBool,
}

impl DracoCliDecoder {
    pub fn new(decoder_dir: impl AsRef<Path>) -> Self {
        let tool = decoder_dir.as_ref().join(TOOL_NAME);
        if !tool.is_file() {
            log::warn!(
                "draco: {} not found; compressed primitives will fail to load",
                tool.display()
            );
        }
        static INSTANCES: AtomicU64 = AtomicU64::new(0);
        let scratch = std::env::temp_dir().join(format!(
            "ascii-badger-draco-{}-{}",
            std::process::id(),
            INSTANCES.fetch_add(1, Ordering::Relaxed)
        ));
        Self {
            tool,
            scratch,
            counter: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn tool_path(&self) -> &Path {
        &self.tool
    }
}

impl GeometryDecoder for DracoCliDecoder {
    fn name(&self) -> &str {
        "draco"
    }

    fn decode(&self, compressed: &[u8]) -> Result<Geometry, DecodeError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(DecodeError::Disposed);
        }
        if !self.tool.is_file() {
            return Err(DecodeError::ToolMissing(self.tool.display().to_string()));
        }
        std::fs::create_dir_all(&self.scratch)?;
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        let files = ScratchFiles {
            input: self.scratch.join(format!("{}.drc", id)),
            output: self.scratch.join(format!("{}.obj", id)),
        };
        std::fs::write(&files.input, compressed)?;

        let run = Command::new(&self.tool)
            .arg("-i")
            .arg(&files.input)
            .arg("-o")
            .arg(&files.output)
            .output()?;
        if !run.status.success() {
            return Err(DecodeError::Failed {
                status: run.status.to_string(),
                stderr: String::from_utf8_lossy(&run.stderr).trim().to_string(),
            });
        }
        let text = std::fs::read_to_string(&files.output)?;
        parse_obj(&text)
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.scratch.is_dir() {
            if let Err(err) = std::fs::remove_dir_all(&self.scratch) {
                log::warn!("draco: failed to remove {}: {}", self.scratch.display(), err);
            }
        }
        log::info!("draco: decoder disposed");
    }
}

/// One decode call's input and output files, removed on drop.
struct ScratchFiles {
    input: PathBuf,
    output: PathBuf,
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.input);
        let _ = std::fs::remove_file(&self.output);
    }
}

/// Positions and faces of a Wavefront OBJ document; faces are fan-triangulated.
fn parse_obj(text: &str) -> Result<Geometry, DecodeError> {
    let mut geometry = Geometry::default();
    for (line_no, line) in text.lines().enumerate() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("v") => {
                let coords: Vec<f32> = parts.take(3).filter_map(|p| p.parse().ok()).collect();
                if coords.len() != 3 {
                    return Err(DecodeError::Malformed(format!("vertex on line {}", line_no + 1)));
                }
                geometry.positions.push(Vec3::new(coords[0], coords[1], coords[2]));
            }
            Some("f") => {
                let count = geometry.positions.len() as i64;
                let mut face = Vec::new();
                for token in parts {
                    let index: i64 = token
                        .split('/')
                        .next()
                        .and_then(|i| i.parse().ok())
                        .ok_or_else(|| DecodeError::Malformed(format!("face on line {}", line_no + 1)))?;
                    let resolved = if index < 0 { count + index } else { index - 1 };
                    if resolved < 0 || resolved >= count {
                        return Err(DecodeError::Malformed(format!(
                            "face index {} out of range on line {}",
                            index,
                            line_no + 1
                        )));
                    }
                    face.push(resolved as u32);
                }
                for i in 1..face.len().saturating_sub(1) {
                    geometry.indices.extend_from_slice(&[face[0], face[i], face[i + 1]]);
                }
            }
            _ => {}
        }
    }
    Ok(geometry)
}
