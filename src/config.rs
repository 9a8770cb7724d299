use crate::render::AsciiOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_CHAR_RAMP: &str = " .:-=+*#%@";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Compressed-geometry decoder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub enabled: bool,
    /// Location of the decoder files, handed to the decoder once at startup.
    pub path: String,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "decoders/draco/".to_string(),
        }
    }
}

/// Host-supplied engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BadgerConfig {
    pub anim_dir: String,
    /// When set, clips are fetched over HTTP relative to this URL instead of the filesystem.
    pub asset_base_url: Option<String>,
    /// `None` skips the manifest stage of catalog resolution.
    pub manifest_name: Option<String>,
    pub scrape_directory: bool,
    pub decoder: DecoderConfig,
    pub allowed_extensions: Vec<String>,
    pub fallback_clips: Vec<String>,
    pub char_ramp: String,
    pub ascii: AsciiOptions,
}

impl Default for BadgerConfig {
    fn default() -> Self {
        Self {
            anim_dir: "assets/animations".to_string(),
            asset_base_url: None,
            manifest_name: Some("manifest.json".to_string()),
            scrape_directory: false,
            decoder: DecoderConfig::default(),
            allowed_extensions: vec!["glb".to_string(), "gltf".to_string()],
            fallback_clips: Vec::new(),
            char_ramp: DEFAULT_CHAR_RAMP.to_string(),
            ascii: AsciiOptions::default(),
        }
    }
}

impl BadgerConfig {
    /// Defaults overlaid with `BADGER_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup("BADGER_ANIM_DIR") {
            self.anim_dir = value;
        }
        if let Some(value) = lookup("BADGER_BASE_URL") {
            self.asset_base_url = Some(value).filter(|url| !url.trim().is_empty());
        }
        if let Some(value) = lookup("BADGER_MANIFEST") {
            self.manifest_name = Some(value).filter(|name| !name.trim().is_empty());
        }
        if let Some(value) = lookup("BADGER_SCRAPE_DIR") {
            set_flag(&mut self.scrape_directory, "BADGER_SCRAPE_DIR", &value);
        }
        if let Some(value) = lookup("BADGER_DECODER") {
            set_flag(&mut self.decoder.enabled, "BADGER_DECODER", &value);
        }
        if let Some(value) = lookup("BADGER_DECODER_PATH") {
            self.decoder.path = value;
        }
        if let Some(value) = lookup("BADGER_EXTENSIONS") {
            self.allowed_extensions = split_list(&value)
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect();
        }
        if let Some(value) = lookup("BADGER_FALLBACK_CLIPS") {
            self.fallback_clips = split_list(&value);
        }
        if let Some(value) = lookup("BADGER_CHAR_RAMP") {
            self.char_ramp = value;
        }
        if let Some(value) = lookup("BADGER_RESOLUTION") {
            set_number(&mut self.ascii.resolution, "BADGER_RESOLUTION", &value);
        }
        if let Some(value) = lookup("BADGER_INVERT") {
            set_flag(&mut self.ascii.invert, "BADGER_INVERT", &value);
        }
        if let Some(value) = lookup("BADGER_COLORIZE") {
            set_flag(&mut self.ascii.colorize, "BADGER_COLORIZE", &value);
        }
        if let Some(value) = lookup("BADGER_CELL_ASPECT") {
            set_number(&mut self.ascii.cell_aspect, "BADGER_CELL_ASPECT", &value);
        }
        self.normalized()
    }

    /// Clamps values the engine cannot work with back into range.
    pub fn normalized(mut self) -> Self {
        if self.char_ramp.is_empty() {
            log::warn!("empty character ramp; using default '{}'", DEFAULT_CHAR_RAMP);
            self.char_ramp = DEFAULT_CHAR_RAMP.to_string();
        }
        self.ascii = self.ascii.normalized();
        self
    }

    pub fn is_allowed(&self, file_name: &str) -> bool {
        let Some((_, ext)) = file_name.rsplit_once('.') else {
            return false;
        };
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    /// Request path for a clip: `anim_dir` joined with `file_name`.
    pub fn clip_path(&self, file_name: &str) -> String {
        join_path(&self.anim_dir, file_name)
    }
}

pub fn join_path(dir: &str, file_name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    let file_name = file_name.trim_start_matches('/');
    if dir.is_empty() {
        file_name.to_string()
    } else {
        format!("{}/{}", dir, file_name)
    }
}

pub fn save_config_to_file(config: &BadgerConfig, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn load_config_from_file(path: &Path) -> Result<BadgerConfig> {
    let json = std::fs::read_to_string(path)?;
    let config: BadgerConfig = serde_json::from_str(&json)?;
    Ok(config.normalized())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn set_flag(target: &mut bool, key: &str, value: &str) {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => *target = true,
        "0" | "false" | "no" | "off" => *target = false,
        other => log::warn!("ignoring {}={:?}: expected a boolean", key, other),
    }
}

fn set_number(target: &mut f32, key: &str, value: &str) {
    match value.trim().parse::<f32>() {
        Ok(parsed) if parsed.is_finite() => *target = parsed,
        _ => log::warn!("ignoring {}={:?}: expected a number", key, value),
    }
}
