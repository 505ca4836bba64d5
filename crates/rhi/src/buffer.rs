//! GPU buffer management.
//!
//! This module handles vertex, index, uniform and staging buffers.
//! It uses gpu-allocator for memory management and provides safe abstractions
//! for buffer creation and data transfer.
//!
//! # Overview
//!
//! - [`BufferUsage`] defines how a buffer will be used (vertex, index, uniform, staging)
//! - [`Buffer`] wraps VkBuffer with gpu-allocator managed memory
//! - [`stage_and_copy`] fills a device-local buffer through a temporary staging buffer
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use presto_rhi::device::Device;
//! use presto_rhi::buffer::{Buffer, BufferUsage};
//! use presto_rhi::memory::MemoryKind;
//!
//! # fn example(device: Arc<Device>) -> Result<(), presto_rhi::RhiError> {
//! let uniform = Buffer::new(device, BufferUsage::Uniform, MemoryKind::HostVisible, 192)?;
//! uniform.write_data(0, &[0u8; 192])?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::command::{CommandPool, submit_one_time};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::memory::{MemoryKind, require_memory_type};

/// Buffer usage type.
///
/// Defines the intended use of the buffer, which determines its Vulkan usage
/// flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Vertex buffer - stores vertex data
    Vertex,
    /// Index buffer - stores index data
    Index,
    /// Uniform buffer - stores shader uniform data
    Uniform,
    /// Staging buffer - source of a transfer
    Staging,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Staging => "staging",
        }
    }
}

/// GPU buffer wrapper with managed memory.
///
/// This struct wraps a Vulkan buffer and its associated memory allocation.
/// Memory is managed by gpu-allocator after the memory type check in
/// [`crate::memory`] passes.
pub struct Buffer {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan buffer handle.
    buffer: vk::Buffer,
    /// GPU memory allocation.
    allocation: Option<Allocation>,
    /// Buffer size in bytes.
    size: vk::DeviceSize,
    /// Buffer usage type.
    usage: BufferUsage,
    /// Memory kind backing the buffer.
    kind: MemoryKind,
}

impl Buffer {
    /// Creates a new buffer with the specified size.
    ///
    /// The memory type is only checked for existence here; gpu-allocator then
    /// places the allocation in a compatible type of its choosing, which need
    /// not be the first match [`find_memory_type`](crate::memory::find_memory_type)
    /// reports.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] for a zero size,
    /// [`RhiError::UnsupportedMemoryType`] if the device has no memory type
    /// for `kind`, and an out-of-memory error if allocation fails.
    pub fn new(
        device: Arc<Device>,
        usage: BufferUsage,
        kind: MemoryKind,
        size: vk::DeviceSize,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidArgument(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };

        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = require_memory_type(
            device.memory_properties(),
            requirements.memory_type_bits,
            kind,
        )
        .and_then(|_| {
            let mut allocator = device.lock_allocator()?;
            Ok(allocator.allocate(&AllocationCreateDesc {
                name: usage.name(),
                requirements,
                location: kind.location(),
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?)
        });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };

        let created = Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
            kind,
        };
        // On failure, dropping `created` releases the allocation and the handle.
        bound.map_err(RhiError::from)?;

        debug!(
            "Created {} buffer ({}): {} bytes",
            usage.name(),
            kind.name(),
            size
        );

        Ok(created)
    }

    /// Creates a host-visible buffer and fills it with `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if buffer creation or the write fails.
    pub fn new_with_data(
        device: Arc<Device>,
        usage: BufferUsage,
        kind: MemoryKind,
        data: &[u8],
    ) -> RhiResult<Self> {
        let buffer = Self::new(device, usage, kind, data.len() as vk::DeviceSize)?;
        buffer.write_data(0, data)?;
        Ok(buffer)
    }

    /// Writes data to the buffer at the specified offset.
    ///
    /// The memory is host-coherent, so no flush is needed.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] if the buffer is not
    /// host-visible or the write would exceed the buffer size.
    pub fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset.checked_add(data.len() as vk::DeviceSize);
        if end.is_none_or(|end| end > self.size) {
            return Err(RhiError::InvalidArgument(format!(
                "Write exceeds buffer size: offset {} + data {} > buffer {}",
                offset,
                data.len(),
                self.size
            )));
        }

        if !self.kind.is_host_visible() {
            return Err(RhiError::InvalidArgument(format!(
                "{} buffer is not host-visible",
                self.usage.name()
            )));
        }

        let mapped_ptr = self
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_ptr())
            .ok_or_else(|| RhiError::InvalidArgument("Buffer memory is not mapped".to_string()))?;

        unsafe {
            let dst = mapped_ptr.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Returns the buffer usage type.
    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Returns the memory kind backing the buffer.
    #[inline]
    pub fn kind(&self) -> MemoryKind {
        self.kind
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // Free allocation first, then destroy buffer
        if let Some(allocation) = self.allocation.take() {
            match self.device.lock_allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free buffer allocation: {:?}", e);
                    }
                }
                Err(e) => error!("Leaking buffer allocation: {}", e),
            }
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }

        debug!("Destroyed {} buffer", self.usage.name());
    }
}

/// Creates a device-local buffer holding `data`.
///
/// The bytes go into a staging buffer, a copy command moves them into the
/// destination and the staging buffer is released once the queue is idle.
///
/// # Errors
///
/// Returns an error if either allocation, the upload or the copy fails.
pub fn stage_and_copy(
    device: &Arc<Device>,
    pool: &CommandPool,
    usage: BufferUsage,
    data: &[u8],
) -> RhiResult<Buffer> {
    let staging = Buffer::new_with_data(
        device.clone(),
        BufferUsage::Staging,
        MemoryKind::Staging,
        data,
    )?;

    let destination = Buffer::new(
        device.clone(),
        usage,
        MemoryKind::DeviceLocal,
        staging.size(),
    )?;

    submit_one_time(pool, |cmd| {
        let region = vk::BufferCopy::default().size(staging.size());
        cmd.copy_buffer(staging.handle(), destination.handle(), &[region]);
        Ok(())
    })?;

    debug!(
        "Staged {} bytes into device-local {} buffer",
        data.len(),
        usage.name()
    );

    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_to_vk_usage() {
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
        );
        assert!(
            BufferUsage::Uniform
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
        );
        assert_eq!(
            BufferUsage::Staging.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
    }

    #[test]
    fn test_buffer_usage_name() {
        assert_eq!(BufferUsage::Vertex.name(), "vertex");
        assert_eq!(BufferUsage::Index.name(), "index");
        assert_eq!(BufferUsage::Uniform.name(), "uniform");
        assert_eq!(BufferUsage::Staging.name(), "staging");
    }

    #[test]
    fn test_buffer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Buffer>();
    }
}
