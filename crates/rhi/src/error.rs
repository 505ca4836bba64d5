//! RHI-specific error types.
//!
//! Every fallible operation in this crate returns [`RhiResult`]. The variants
//! group into the categories the engine cares about at the top level:
//! initialization, device selection, resource allocation, shader/pipeline
//! creation and device loss. Stale presentation state is *not* an error; it is
//! reported through outcome enums on the swapchain.

use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Failed to load the Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// Instance, surface or device creation failed
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// No physical device satisfies the engine's requirements
    #[error("No capable GPU found")]
    NoCapableDevice,

    /// Host or device memory exhausted
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// No memory type satisfies the resource's filter and property request
    #[error("No memory type matches filter {type_filter:#b} with properties {required:?}")]
    UnsupportedMemoryType {
        type_filter: u32,
        required: vk::MemoryPropertyFlags,
    },

    /// Any other allocator failure
    #[error("Allocator error: {0}")]
    Allocator(String),

    /// A shader blob could not be read or is not valid SPIR-V
    #[error("Failed to load shader {}: {reason}", path.display())]
    ShaderLoad { path: PathBuf, reason: String },

    /// The driver rejected a pipeline or render pass
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// The device was lost or a bounded wait expired
    #[error("Device lost or hung: {0}")]
    DeviceLost(String),

    /// Caller supplied an invalid size, range or handle
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Any other Vulkan failure
    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),
}

impl RhiError {
    /// Returns true for out-of-memory and memory-type failures.
    pub fn is_resource_allocation(&self) -> bool {
        matches!(
            self,
            RhiError::OutOfMemory(_)
                | RhiError::UnsupportedMemoryType { .. }
                | RhiError::Allocator(_)
        )
    }

    /// Returns true if the device can no longer be used.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, RhiError::DeviceLost(_))
    }
}

impl From<vk::Result> for RhiError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => RhiError::DeviceLost("VK_ERROR_DEVICE_LOST".into()),
            vk::Result::TIMEOUT => RhiError::DeviceLost("fence wait timed out".into()),
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                RhiError::OutOfMemory(format!("{result}"))
            }
            other => RhiError::Vulkan(other),
        }
    }
}

impl From<gpu_allocator::AllocationError> for RhiError {
    fn from(error: gpu_allocator::AllocationError) -> Self {
        use gpu_allocator::AllocationError;

        match error {
            AllocationError::OutOfMemory => RhiError::OutOfMemory("gpu-allocator".into()),
            AllocationError::NoCompatibleMemoryTypeFound => RhiError::UnsupportedMemoryType {
                type_filter: 0,
                required: vk::MemoryPropertyFlags::empty(),
            },
            other => RhiError::Allocator(other.to_string()),
        }
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
