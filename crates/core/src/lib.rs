//! Core utilities for the presto engine.
//!
//! This crate provides foundational types used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing
//! - Configuration loading

mod config;
mod error;
mod logging;
mod timer;

pub use config::{CONFIG_ENV_VAR, Config, DEFAULT_CONFIG_FILE, GraphicsConfig, WindowConfig, config_path};
pub use error::{Error, Result};
pub use logging::{DEFAULT_FILTER, init_logging};
pub use timer::{FrameTick, Timer};
