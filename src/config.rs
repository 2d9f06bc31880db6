use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Compute device for the ONNX runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Try CUDA, fall back to CPU
    #[default]
    Auto,
    Cpu,
    Cuda,
    Tensorrt,
}

/// Model configuration file, `-C/--config`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prompt encoder + mask decoder graph. Defaults to `decoder.onnx` next to the encoder.
    pub decoder: Option<PathBuf>,
    /// Square side of the encoder input
    pub image_size: u32,
    /// Mask logits above this value are foreground
    pub mask_threshold: f32,
    pub intra_threads: usize,
    pub device: Device,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            decoder: None,
            image_size: 1024,
            mask_threshold: 0.0,
            intra_threads: 4,
            device: Device::Auto,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// RGBA of rendered frame masks
    pub fill: [u8; 4],
    /// RGBA of preview masks
    pub preview_fill: [u8; 4],
    pub outline: [u8; 4],
    /// Outline thickness in pixels, 0 disables outlining
    pub outline_width: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            fill: [255, 255, 255, 255],
            preview_fill: [255, 255, 255, 255],
            outline: [200, 0, 0, 100],
            outline_width: 0,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
