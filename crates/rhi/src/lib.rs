//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides a safe abstraction over Vulkan using the `ash` crate.
//! It handles:
//! - Instance creation and physical device selection
//! - Logical device and memory allocation
//! - Swapchain, render pass and framebuffers
//! - Pipelines, shaders and descriptors
//! - Buffers, images and staging uploads
//! - Command recording and synchronization primitives
//!
//! Every wrapper releases its Vulkan object on drop. Owners are responsible
//! for dropping them in reverse creation order and only after the GPU is done
//! with them.

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod framebuffer;
pub mod image;
pub mod instance;
pub mod memory;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
