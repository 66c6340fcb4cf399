// src/config.rs
use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::info;
use serde::Deserialize;

const CONFIG_DIR_NAME: &str = "field_logger";
const CONFIG_FILE_NAME: &str = "config.toml";

// Crosshair alpha has always been kept within this band.
const MIN_OVERLAY_ALPHA: u8 = 30;
const MAX_OVERLAY_ALPHA: u8 = 64;

/// Application configuration, read once at startup.
///
/// Every field has a default so a partial (or absent) file is fine:
///
/// ```toml
/// camera_index = 0
/// resolution = [1280, 720]
/// framerate = 30
/// overlay_alpha = 64
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera_index: u32,
    /// Requested capture size as `[width, height]`.
    pub resolution: [u32; 2],
    pub framerate: u32,
    pub overlay_alpha: u8,
    pub overlay_layer: u8,
    /// Preview height is the available height divided by this.
    pub preview_height_ratio: f32,
    /// Appended to a log path saved without an extension.
    pub log_extension: String,
    /// JPEG quality for recorded frames.
    pub jpeg_quality: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_index: 0,
            resolution: [1280, 720],
            framerate: 30,
            overlay_alpha: MAX_OVERLAY_ALPHA,
            overlay_layer: 3,
            preview_height_ratio: 1.5,
            log_extension: "txt".to_string(),
            jpeg_quality: 85,
        }
    }
}

impl Config {
    /// Loads `<config_dir>/field_logger/config.toml`, falling back to defaults
    /// when the file (or the platform config dir) does not exist.
    pub fn load() -> Result<Self> {
        match default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                info!("No config file found, using defaults.");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::parse(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        Ok(config.normalized())
    }

    fn normalized(mut self) -> Self {
        self.overlay_alpha = self.overlay_alpha.clamp(MIN_OVERLAY_ALPHA, MAX_OVERLAY_ALPHA);
        if !(self.preview_height_ratio.is_finite() && self.preview_height_ratio >= 1.0) {
            self.preview_height_ratio = Self::default().preview_height_ratio;
        }
        self.jpeg_quality = self.jpeg_quality.clamp(1, 100);
        self
    }
}

fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}
