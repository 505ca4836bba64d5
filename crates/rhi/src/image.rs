//! GPU image management.
//!
//! [`Image`] is a 2D, single-mip, optimal-tiling image with gpu-allocator
//! managed memory and a matching image view. The only upload path is
//! [`Image::upload_rgba8`], which takes a raw RGBA8 pixel buffer (as produced
//! by an external decoder), stages it and leaves the image ready for sampling.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use presto_rhi::command::CommandPool;
//! use presto_rhi::device::Device;
//! use presto_rhi::image::Image;
//! use ash::vk;
//!
//! # fn example(device: Arc<Device>, pool: &CommandPool) -> Result<(), presto_rhi::RhiError> {
//! let pixels = vec![255u8; 4 * 4 * 4];
//! let texture = Image::upload_rgba8(device, pool, vk::Extent2D { width: 4, height: 4 }, &pixels)?;
//! let _view = texture.view();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error, info, warn};

use crate::buffer::{Buffer, BufferUsage};
use crate::command::{CommandBuffer, CommandPool, submit_one_time};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::memory::{MemoryKind, require_memory_type};
use crate::swapchain::color_subresource_range;

/// Pixel format used by [`Image::upload_rgba8`].
pub const RGBA8_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Device-local 2D image with a view.
///
/// Resources are destroyed in the following order:
/// 1. Image view
/// 2. Image
/// 3. Memory allocation
pub struct Image {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl Image {
    /// Allocates an optimal-tiling 2D image and creates a color view for it.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] for a zero extent,
    /// [`RhiError::UnsupportedMemoryType`] if no device-local memory type fits
    /// and an out-of-memory error if allocation fails.
    pub fn new(
        device: Arc<Device>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "Image extent must be nonzero, got {}x{}",
                extent.width, extent.height
            )));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };

        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = require_memory_type(
            device.memory_properties(),
            requirements.memory_type_bits,
            MemoryKind::DeviceLocal,
        )
        .and_then(|_| {
            let mut allocator = device.lock_allocator()?;
            Ok(allocator.allocate(&AllocationCreateDesc {
                name: "image",
                requirements,
                location: MemoryKind::DeviceLocal.location(),
                // Optimal tiling is not linear
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?)
        });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e);
            }
        };

        let mut created = Self {
            device,
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            format,
            extent,
        };

        if let Some(allocation) = created.allocation.as_ref() {
            unsafe {
                created.device.handle().bind_image_memory(
                    image,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(color_subresource_range());

        created.view = unsafe { created.device.handle().create_image_view(&view_info, None)? };

        debug!(
            "Created image: {}x{} ({:?})",
            extent.width, extent.height, format
        );

        Ok(created)
    }

    /// Creates a sampled image and fills it from a tightly packed RGBA8 buffer.
    ///
    /// The pixels go through a staging buffer; the image is transitioned
    /// UNDEFINED → TRANSFER_DST_OPTIMAL → SHADER_READ_ONLY_OPTIMAL around the
    /// copy.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] if `pixels` is not exactly
    /// `width * height * 4` bytes, plus any allocation or submission error.
    pub fn upload_rgba8(
        device: Arc<Device>,
        pool: &CommandPool,
        extent: vk::Extent2D,
        pixels: &[u8],
    ) -> RhiResult<Self> {
        let expected = rgba8_byte_len(extent);
        if expected != Some(pixels.len()) {
            return Err(RhiError::InvalidArgument(format!(
                "RGBA8 pixel buffer for {}x{} must be {:?} bytes, got {}",
                extent.width,
                extent.height,
                expected,
                pixels.len()
            )));
        }

        let staging = Buffer::new_with_data(
            device.clone(),
            BufferUsage::Staging,
            MemoryKind::Staging,
            pixels,
        )?;

        let image = Self::new(
            device,
            extent,
            RGBA8_FORMAT,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        )?;

        submit_one_time(pool, |cmd| {
            image.transition(
                cmd,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );

            let region = vk::BufferImageCopy::default()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .mip_level(0)
                        .base_array_layer(0)
                        .layer_count(1),
                )
                .image_offset(vk::Offset3D::default())
                .image_extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                });
            cmd.copy_buffer_to_image(
                staging.handle(),
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            image.transition(
                cmd,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
            Ok(())
        })?;

        info!(
            "Uploaded {}x{} RGBA8 image ({} bytes)",
            extent.width,
            extent.height,
            pixels.len()
        );

        Ok(image)
    }

    fn transition(
        &self,
        cmd: &CommandBuffer,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        let (src_stage, src_access, dst_stage, dst_access) =
            transition_masks(old_layout, new_layout);

        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(color_subresource_range())
            .src_access_mask(src_access)
            .dst_access_mask(dst_access);

        cmd.pipeline_barrier(src_stage, dst_stage, &[barrier]);
    }

    /// Returns the Vulkan image handle.
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Returns the image view.
    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Returns the image format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the image extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
            self.device.handle().destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            match self.device.lock_allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free image allocation: {:?}", e);
                    }
                }
                Err(e) => error!("Leaking image allocation: {}", e),
            }
        }

        debug!(
            "Destroyed image {}x{}",
            self.extent.width, self.extent.height
        );
    }
}

/// Byte length of a tightly packed RGBA8 buffer, or `None` on overflow.
pub fn rgba8_byte_len(extent: vk::Extent2D) -> Option<usize> {
    (extent.width as usize)
        .checked_mul(extent.height as usize)?
        .checked_mul(4)
}

/// Stage and access masks for the layout transitions the upload path uses.
fn transition_masks(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> (
    vk::PipelineStageFlags,
    vk::AccessFlags,
    vk::PipelineStageFlags,
    vk::AccessFlags,
) {
    match (old_layout, new_layout) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::SHADER_READ,
        ),
        _ => {
            warn!(
                "Unhandled layout transition: {:?} -> {:?}",
                old_layout, new_layout
            );
            (
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            )
        }
    }
}
