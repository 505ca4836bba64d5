//! Platform layer for the presto engine.
//!
//! This crate provides:
//! - Window management via winit
//! - Resize and close signals polled by the frame loop
//! - Vulkan surface creation and the matching instance extensions

mod window;

pub use window::{Surface, Window, WindowSignals, get_required_extensions};
