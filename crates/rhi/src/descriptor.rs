//! Descriptor set management for shader resource binding.
//!
//! This module provides abstractions for Vulkan descriptor management:
//! - [`DescriptorSetLayout`] defines the layout of shader bindings
//! - [`DescriptorPool`] manages allocation of descriptor sets
//! - [`write_uniform_buffers`] points each set at its uniform buffer
//!
//! Sets are never freed individually; they go away with their pool, which the
//! presentation chain rebuilds along with the uniform buffers it describes.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use presto_rhi::device::Device;
//! use presto_rhi::descriptor::{DescriptorPool, DescriptorSetLayout};
//!
//! # fn example(device: Arc<Device>) -> Result<(), presto_rhi::RhiError> {
//! let layout = DescriptorSetLayout::uniform_buffer(device.clone(), 0, vk::ShaderStageFlags::VERTEX)?;
//!
//! let pool = DescriptorPool::for_uniform_buffers(device.clone(), 3)?;
//! let sets = pool.allocate(&[layout.handle(); 3])?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Descriptor set layout wrapper.
///
/// A descriptor set layout defines the binding points, descriptor types and
/// shader stages of a set. It does not depend on the swapchain.
pub struct DescriptorSetLayout {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan descriptor set layout handle.
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Creates a new descriptor set layout.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self { device, layout })
    }

    /// Creates a layout with a single uniform buffer at `binding`.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn uniform_buffer(
        device: Arc<Device>,
        binding: u32,
        stages: vk::ShaderStageFlags,
    ) -> RhiResult<Self> {
        Self::new(device, &[uniform_buffer_binding(binding, stages)])
    }

    /// Returns the Vulkan descriptor set layout handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// Descriptor pool wrapper.
///
/// Destroying the pool releases every set allocated from it.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    /// Creates a new descriptor pool.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!(
            "Created descriptor pool: max_sets={}, pool_sizes={}",
            max_sets,
            pool_sizes.len()
        );

        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    /// Creates a pool holding `count` sets of one uniform buffer each.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] for a zero count, or an error if
    /// pool creation fails.
    pub fn for_uniform_buffers(device: Arc<Device>, count: u32) -> RhiResult<Self> {
        if count == 0 {
            return Err(RhiError::InvalidArgument(
                "descriptor pool needs at least one set".to_string(),
            ));
        }
        Self::new(device, count, &uniform_pool_sizes(count))
    }

    /// Allocates one descriptor set per entry in `layouts`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool is exhausted.
    pub fn allocate(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };

        debug!("Allocated {} descriptor set(s)", sets.len());

        Ok(sets)
    }

    /// Returns the Vulkan descriptor pool handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Returns the maximum number of sets.
    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool");
    }
}

/// Layout binding for one uniform buffer visible to `stages`.
pub fn uniform_buffer_binding(
    binding: u32,
    stages: vk::ShaderStageFlags,
) -> vk::DescriptorSetLayoutBinding<'static> {
    vk::DescriptorSetLayoutBinding::default()
        .binding(binding)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(1)
        .stage_flags(stages)
}

/// Pool sizes for `count` single-uniform-buffer sets.
pub fn uniform_pool_sizes(count: u32) -> [vk::DescriptorPoolSize; 1] {
    [vk::DescriptorPoolSize::default()
        .ty(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(count)]
}

/// Points binding 0 of `sets[i]` at the whole of `buffers[i]`.
///
/// # Errors
///
/// Returns [`RhiError::InvalidArgument`] if the slices differ in length.
pub fn write_uniform_buffers(
    device: &Device,
    sets: &[vk::DescriptorSet],
    buffers: &[(vk::Buffer, vk::DeviceSize)],
) -> RhiResult<()> {
    if sets.len() != buffers.len() {
        return Err(RhiError::InvalidArgument(format!(
            "{} descriptor set(s) for {} uniform buffer(s)",
            sets.len(),
            buffers.len()
        )));
    }

    let infos: Vec<[vk::DescriptorBufferInfo; 1]> = buffers
        .iter()
        .map(|&(buffer, range)| {
            [vk::DescriptorBufferInfo::default()
                .buffer(buffer)
                .offset(0)
                .range(range)]
        })
        .collect();

    let writes: Vec<vk::WriteDescriptorSet> = sets
        .iter()
        .zip(&infos)
        .map(|(&set, info)| {
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(0)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(info)
        })
        .collect();

    if !writes.is_empty() {
        unsafe {
            device.handle().update_descriptor_sets(&writes, &[]);
        }
    }

    debug!("Updated {} descriptor set(s)", writes.len());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_buffer_binding() {
        let binding = uniform_buffer_binding(0, vk::ShaderStageFlags::VERTEX);
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(binding.descriptor_count, 1);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn test_uniform_pool_sizes_match_image_count() {
        let sizes = uniform_pool_sizes(3);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 3);
    }
}
