//! Engine configuration, loaded from TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::logging::LoggingConfig;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "triframe".to_owned(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Require the Khronos validation layer and install the debug messenger.
    pub enable_validation: bool,
    /// Number of frame slots `F`; independent of the swapchain image count.
    pub frames_in_flight: usize,
    pub clear_color: [f32; 4],
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    /// Upper bound for fence and acquire waits. `None` waits forever.
    pub frame_timeout_ns: Option<u64>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(debug_assertions),
            frames_in_flight: 2,
            clear_color: [0.01, 0.01, 0.01, 1.0],
            vertex_shader: PathBuf::from("shaders/simple.vert"),
            fragment_shader: PathBuf::from("shaders/simple.frag"),
            frame_timeout_ns: None,
        }
    }
}

impl RendererConfig {
    /// Timeout handed to `vkWaitForFences` / `vkAcquireNextImageKHR`.
    pub fn wait_timeout(&self) -> u64 {
        self.frame_timeout_ns.unwrap_or(u64::MAX)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub window: WindowConfig,
    pub renderer: RendererConfig,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.renderer.frames_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "renderer.frames_in_flight must be at least 1".to_owned(),
            ));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.renderer.frames_in_flight, 2);
        assert_eq!(config.renderer.wait_timeout(), u64::MAX);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            [renderer]
            enable_validation = false
            frames_in_flight = 3
            frame_timeout_ns = 1000

            [logging]
            filter = "triframe=debug"
            "#,
        )
        .unwrap();

        assert!(!config.renderer.enable_validation);
        assert_eq!(config.renderer.frames_in_flight, 3);
        assert_eq!(config.renderer.wait_timeout(), 1000);
        assert_eq!(config.logging.filter.as_deref(), Some("triframe=debug"));
        assert_eq!(config.window, WindowConfig::default());
    }

    #[test]
    fn zero_frames_in_flight_is_rejected() {
        let err = EngineConfig::from_toml("[renderer]\nframes_in_flight = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_window_size_is_rejected() {
        let err = EngineConfig::from_toml("[window]\nwidth = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = EngineConfig::from_toml("[renderer\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
