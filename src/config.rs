// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Everything the setup phase needs is read once into an immutable Config
// and handed down by reference. Missing file or missing keys fall back to
// the defaults below.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scene::DemoVersion;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub assets: AssetConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "VulkanTest".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub demo: DemoVersion,
    pub present_mode: String,
    pub clear_color: [f32; 4],
    /// Pause between frames, in milliseconds
    pub frame_delay_ms: u64,
    /// 0 waits forever
    pub acquire_timeout_ms: u64,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            demo: DemoVersion::LayeredQuads,
            present_mode: "fifo_relaxed".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            frame_delay_ms: 100,
            acquire_timeout_ms: 0,
        }
    }
}

/// Shader blobs and texture read at startup
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub texture: PathBuf,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            vertex_shader: PathBuf::from("shaders/quad.vert.spv"),
            fragment_shader: PathBuf::from("shaders/quad.frag.spv"),
            texture: PathBuf::from("assets/vulkan.tga"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "vulkan_debug.log".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get the preferred present mode as Vulkan enum
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::FIFO
            }
        }
    }

    /// Acquire timeout in nanoseconds, as vkAcquireNextImageKHR wants it
    pub fn acquire_timeout_ns(&self) -> u64 {
        match self.graphics.acquire_timeout_ms {
            0 => u64::MAX,
            ms => Duration::from_millis(ms).as_nanos().min(u64::MAX as u128) as u64,
        }
    }

    pub fn frame_delay(&self) -> Duration {
        Duration::from_millis(self.graphics.frame_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_demo() {
        let config = Config::default();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.graphics.demo, DemoVersion::LayeredQuads);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO_RELAXED);
        assert_eq!(config.frame_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            [window]
            width = 800

            [graphics]
            demo = "quad"
            present_mode = "Mailbox"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.graphics.demo, DemoVersion::Quad);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.assets.vertex_shader, PathBuf::from("shaders/quad.vert.spv"));
    }

    #[test]
    fn test_unknown_present_mode_falls_back_to_fifo() {
        let config = Config::from_toml("[graphics]\npresent_mode = \"vsync-ish\"").unwrap();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_unknown_demo_is_rejected() {
        assert!(Config::from_toml("[graphics]\ndemo = \"cube\"").is_err());
    }

    #[test]
    fn test_acquire_timeout() {
        let mut config = Config::default();
        assert_eq!(config.acquire_timeout_ns(), u64::MAX);

        config.graphics.acquire_timeout_ms = 250;
        assert_eq!(config.acquire_timeout_ns(), 250_000_000);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load_from_path("definitely/not/here/config.toml").unwrap();
        assert_eq!(config.window.title, "VulkanTest");
    }
}
