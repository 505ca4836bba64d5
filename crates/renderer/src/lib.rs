//! Frame presentation engine.
//!
//! This crate drives rendering to a resizable window:
//! - [`frame_sync`]: the per-frame submit/present protocol
//! - [`presentation`]: the swapchain and its dependent objects, rebuilt on demand
//! - [`recorder`]: per-image command recording
//! - [`engine`]: the top-level [`Engine`] tying them to a Vulkan device

pub mod engine;
pub mod frame_sync;
pub mod geometry;
pub mod presentation;
pub mod recorder;
pub mod ubo;

pub use engine::Engine;
pub use frame_sync::{FrameBackend, FrameStatus, FrameSynchronizer, RebuildOutcome};

/// Maximum number of frames that can be in flight simultaneously.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
