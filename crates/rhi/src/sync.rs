//! Synchronization primitives for Vulkan.
//!
//! This module provides wrappers for Vulkan synchronization objects:
//! - [`Semaphore`] - GPU-to-GPU synchronization (between queue operations)
//! - [`Fence`] - GPU-to-CPU synchronization (for host waiting)
//! - [`FrameSync`] - The semaphore pair and fence owned by one in-flight frame
//! - [`FenceTimeout`] - How long host-side fence waits may block
//!
//! # Overview
//!
//! - **Semaphores** order queue operations against each other. Acquire signals
//!   "image available", the draw submission waits on it and signals "render
//!   finished", and presentation waits on that.
//!
//! - **Fences** let the CPU learn that a submission has completed. Waiting on a
//!   fence is one of the few places the frame loop blocks.
//!
//! Waits are unbounded by default. With a bounded [`FenceTimeout`], an expired
//! wait is reported as [`RhiError::DeviceLost`] instead of hanging forever.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use presto_rhi::device::Device;
//! use presto_rhi::sync::{Fence, FenceTimeout, Semaphore};
//!
//! # fn example(device: Arc<Device>) -> Result<(), presto_rhi::RhiError> {
//! let image_available = Semaphore::new(device.clone())?;
//! let in_flight_fence = Fence::new(device.clone(), true)?;
//!
//! in_flight_fence.wait(FenceTimeout::Unbounded)?;
//! in_flight_fence.reset()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Upper bound for host-side fence waits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FenceTimeout {
    /// Block until the fence signals.
    #[default]
    Unbounded,
    /// Give up after the duration and report the device as lost or hung.
    Bounded(Duration),
}

impl FenceTimeout {
    /// Builds a timeout from an optional millisecond count.
    pub fn from_millis(millis: Option<u64>) -> Self {
        match millis {
            Some(ms) => FenceTimeout::Bounded(Duration::from_millis(ms)),
            None => FenceTimeout::Unbounded,
        }
    }

    /// Returns the timeout in nanoseconds as Vulkan expects it.
    pub fn as_nanos(self) -> u64 {
        match self {
            FenceTimeout::Unbounded => u64::MAX,
            FenceTimeout::Bounded(duration) => {
                u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
            }
        }
    }
}

/// Waits for all `fences` to signal.
///
/// # Errors
///
/// Returns [`RhiError::DeviceLost`] if the device is lost or the bounded
/// timeout expires.
pub fn wait_for_fences(device: &Device, fences: &[vk::Fence], timeout: FenceTimeout) -> RhiResult<()> {
    let result = unsafe {
        device
            .handle()
            .wait_for_fences(fences, true, timeout.as_nanos())
    };

    match result {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(RhiError::DeviceLost(format!(
            "fence wait exceeded {:?}",
            timeout
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Vulkan semaphore wrapper.
///
/// # Thread Safety
///
/// The semaphore is immutable after creation and can be safely shared between
/// threads.
pub struct Semaphore {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan semaphore handle.
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates a new semaphore in the unsignaled state.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();

        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };

        debug!("Created semaphore");

        Ok(Self { device, semaphore })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        debug!("Destroyed semaphore");
    }
}

/// Vulkan fence wrapper.
///
/// # Thread Safety
///
/// The fence is immutable after creation. Wait and reset operations can be
/// called from any thread, but the caller is responsible for not resetting a
/// fence that a pending submission will signal.
pub struct Fence {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan fence handle.
    fence: vk::Fence,
}

impl Fence {
    /// Creates a new fence.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `signaled` - If true, creates the fence in the signaled state so the
    ///   first wait returns immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);

        let fence = unsafe { device.handle().create_fence(&create_info, None)? };

        debug!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );

        Ok(Self { device, fence })
    }

    /// Returns the Vulkan fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Waits for the fence to become signaled.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::DeviceLost`] if a bounded `timeout` expires or the
    /// device is lost while waiting.
    pub fn wait(&self, timeout: FenceTimeout) -> RhiResult<()> {
        wait_for_fences(&self.device, &[self.fence], timeout)
    }

    /// Resets the fence to the unsignaled state.
    ///
    /// The fence must not be in use by any queue operation when this is called.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe { self.device.handle().reset_fences(&[self.fence])? };
        Ok(())
    }

    /// Checks if the fence is currently signaled without blocking.
    pub fn is_signaled(&self) -> bool {
        let result = unsafe { self.device.handle().get_fence_status(self.fence) };
        matches!(result, Ok(true))
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
        debug!("Destroyed fence");
    }
}

/// Synchronization objects owned by one in-flight frame slot.
///
/// # Usage Pattern
///
/// ```text
/// 1. Wait for in_flight_fence (CPU waits for the slot's previous submission)
/// 2. Acquire swapchain image (signals image_available)
/// 3. Reset in_flight_fence, then submit:
///    - wait on image_available at COLOR_ATTACHMENT_OUTPUT
///    - signal render_finished
///    - signal in_flight_fence on completion
/// 4. Present (waits on render_finished)
/// ```
pub struct FrameSync {
    device: Arc<Device>,
    image_available_semaphore: Semaphore,
    render_finished_semaphore: Semaphore,
    in_flight_fence: Fence,
}

impl FrameSync {
    /// Creates a new set of frame synchronization primitives.
    ///
    /// The in-flight fence starts signaled so the first wait does not block.
    ///
    /// # Errors
    ///
    /// Returns an error if any synchronization object creation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let image_available_semaphore = Semaphore::new(device.clone())?;
        let render_finished_semaphore = Semaphore::new(device.clone())?;
        let in_flight_fence = Fence::new(device.clone(), true)?;

        Ok(Self {
            device,
            image_available_semaphore,
            render_finished_semaphore,
            in_flight_fence,
        })
    }

    /// Replaces both semaphores with fresh unsignaled ones.
    ///
    /// An acquire or present abandoned during a rebuild can leave a semaphore
    /// with a pending signal. Call only after the device has gone idle.
    pub fn recreate_semaphores(&mut self) -> RhiResult<()> {
        self.image_available_semaphore = Semaphore::new(self.device.clone())?;
        self.render_finished_semaphore = Semaphore::new(self.device.clone())?;
        Ok(())
    }

    /// Returns a reference to the in-flight fence.
    #[inline]
    pub fn in_flight_fence(&self) -> &Fence {
        &self.in_flight_fence
    }

    /// Returns the raw Vulkan handle for the image available semaphore.
    #[inline]
    pub fn image_available_handle(&self) -> vk::Semaphore {
        self.image_available_semaphore.handle()
    }

    /// Returns the raw Vulkan handle for the render finished semaphore.
    #[inline]
    pub fn render_finished_handle(&self) -> vk::Semaphore {
        self.render_finished_semaphore.handle()
    }

    /// Returns the raw Vulkan handle for the in-flight fence.
    #[inline]
    pub fn in_flight_fence_handle(&self) -> vk::Fence {
        self.in_flight_fence.handle()
    }
}
