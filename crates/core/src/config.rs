//! Startup configuration (`presto.toml`).
//!
//! Every section and field has a default, so an empty or partial file is
//! valid. The file is read once at startup and the resulting [`Config`] is
//! passed by reference to whatever needs it.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "presto.toml";

/// Environment variable overriding [`DEFAULT_CONFIG_FILE`].
pub const CONFIG_ENV_VAR: &str = "PRESTO_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub graphics: GraphicsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphicsConfig {
    /// Enables the Khronos validation layer and debug messenger.
    #[serde(default = "default_validation")]
    pub validation: bool,
    /// RGBA clear color of the render pass.
    #[serde(default = "default_clear_color")]
    pub clear_color: [f32; 4],
    #[serde(default = "default_vertex_shader")]
    pub vertex_shader: PathBuf,
    #[serde(default = "default_fragment_shader")]
    pub fragment_shader: PathBuf,
    /// Upper bound on any single fence wait. Unset waits forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fence_timeout_ms: Option<u64>,
}

fn default_title() -> String {
    "Vulkan".to_string()
}
fn default_width() -> u32 {
    1024
}
fn default_height() -> u32 {
    768
}
fn default_validation() -> bool {
    cfg!(debug_assertions)
}
fn default_clear_color() -> [f32; 4] {
    [1.0, 1.0, 1.0, 1.0]
}
fn default_vertex_shader() -> PathBuf {
    PathBuf::from("build/vertex.spv")
}
fn default_fragment_shader() -> PathBuf {
    PathBuf::from("build/fragment.spv")
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            width: default_width(),
            height: default_height(),
        }
    }
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            validation: default_validation(),
            clear_color: default_clear_color(),
            vertex_shader: default_vertex_shader(),
            fragment_shader: default_fragment_shader(),
            fence_timeout_ms: None,
        }
    }
}

impl Config {
    /// Loads the config from `$PRESTO_CONFIG`, or `presto.toml` in the
    /// working directory.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file exists but is malformed, and
    /// [`Error::Io`] if it cannot be read.
    pub fn load() -> Result<Self> {
        let path = config_path(std::env::var_os(CONFIG_ENV_VAR));
        if !path.exists() {
            warn!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from_path(&path)
    }

    /// Loads and validates the config at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and [`Error::Config`]
    /// if it does not parse or fails validation.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::parse(&text, path)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the text does not parse or fails
    /// validation.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Self::parse(text, Path::new("<inline>"))
    }

    fn parse(text: &str, path: &Path) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate().map_err(|reason| Error::Config {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(config)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(format!(
                "window size must be nonzero, got {}x{}",
                self.window.width, self.window.height
            ));
        }
        if let Some(component) = self
            .graphics
            .clear_color
            .iter()
            .find(|c| !(0.0..=1.0).contains(*c))
        {
            return Err(format!("clear_color component {} outside [0, 1]", component));
        }
        if self.graphics.fence_timeout_ms == Some(0) {
            return Err("fence_timeout_ms must be positive when set".to_string());
        }
        Ok(())
    }
}

/// Resolves the config path from the value of `PRESTO_CONFIG`.
pub fn config_path(env_value: Option<OsString>) -> PathBuf {
    match env_value {
        Some(value) if !value.is_empty() => PathBuf::from(value),
        _ => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}
