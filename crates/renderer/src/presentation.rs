//! Presentation chain: the swapchain and everything sized by it.
//!
//! [`PresentationChain`] owns the swapchain together with the render pass,
//! pipeline, framebuffers, per-image uniform buffers, descriptor sets and
//! recorded command buffers. All of these depend on the swapchain's format,
//! extent or image count, so a rebuild replaces them as one generation.
//!
//! # Rebuild Order
//!
//! ```text
//! wait idle
//!   -> drop command buffers, descriptors, uniform buffers, framebuffers,
//!      pipeline, render pass (reverse of creation)
//!   -> recreate swapchain and image views
//!   -> render pass -> pipeline -> framebuffers -> uniform buffers
//!      -> descriptor pool/sets -> command buffers (recorded)
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use presto_rhi::buffer::{Buffer, BufferUsage};
use presto_rhi::command::{CommandBufferSet, CommandPool};
use presto_rhi::descriptor::{DescriptorPool, DescriptorSetLayout, write_uniform_buffers};
use presto_rhi::device::Device;
use presto_rhi::framebuffer::Framebuffers;
use presto_rhi::instance::Instance;
use presto_rhi::memory::MemoryKind;
use presto_rhi::pipeline::{CullMode, FrontFace, GraphicsPipelineBuilder, Pipeline, PipelineLayout};
use presto_rhi::render_pass::RenderPass;
use presto_rhi::shader::Shader;
use presto_rhi::swapchain::{AcquireOutcome, PresentOutcome, Swapchain};
use presto_rhi::vertex::Vertex;
use presto_rhi::{RhiError, RhiResult};

use crate::geometry::Mesh;
use crate::recorder::{DrawState, record_all};
use crate::ubo::UniformBufferObject;

/// Long-lived objects a chain generation is built from.
///
/// None of these depend on the swapchain, so they survive rebuilds.
pub struct ChainContext<'a> {
    pub instance: &'a Instance,
    pub device: &'a Arc<Device>,
    pub surface: vk::SurfaceKHR,
    pub command_pool: &'a CommandPool,
    pub pipeline_layout: &'a PipelineLayout,
    pub descriptor_set_layout: &'a DescriptorSetLayout,
    pub vertex_shader: &'a Shader,
    pub fragment_shader: &'a Shader,
    pub mesh: &'a Mesh,
    pub clear_color: [f32; 4],
}

/// Swapchain-dependent objects of one generation.
///
/// Fields drop top to bottom, which is the reverse of creation order.
struct ChainTargets {
    command_buffers: CommandBufferSet,
    _descriptor_pool: DescriptorPool,
    uniform_buffers: Vec<Buffer>,
    _framebuffers: Framebuffers,
    _pipeline: Pipeline,
    _render_pass: RenderPass,
}

impl ChainTargets {
    fn build(ctx: &ChainContext<'_>, swapchain: &Swapchain) -> RhiResult<Self> {
        let device = ctx.device;
        let image_count = swapchain.image_count();

        let render_pass = RenderPass::new(device.clone(), swapchain.format())?;

        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(ctx.vertex_shader)
            .fragment_shader(ctx.fragment_shader)
            .vertex_binding(Vertex::binding_description())
            .vertex_attributes(&Vertex::attribute_descriptions())
            .cull_mode(CullMode::Back)
            .front_face(FrontFace::CounterClockwise)
            .render_pass(render_pass.handle(), 0)
            .build(device.clone(), ctx.pipeline_layout)?;

        let framebuffers = Framebuffers::new(
            device.clone(),
            render_pass.handle(),
            swapchain.image_views(),
            swapchain.extent(),
        )?;

        let uniform_buffers = (0..image_count)
            .map(|_| {
                Buffer::new(
                    device.clone(),
                    BufferUsage::Uniform,
                    MemoryKind::HostVisible,
                    UniformBufferObject::SIZE as vk::DeviceSize,
                )
            })
            .collect::<RhiResult<Vec<_>>>()?;

        let descriptor_pool = DescriptorPool::for_uniform_buffers(device.clone(), image_count as u32)?;
        let layouts = vec![ctx.descriptor_set_layout.handle(); image_count];
        let descriptor_sets = descriptor_pool.allocate(&layouts)?;
        let buffer_ranges: Vec<(vk::Buffer, vk::DeviceSize)> = uniform_buffers
            .iter()
            .map(|buffer| (buffer.handle(), buffer.size()))
            .collect();
        write_uniform_buffers(device, &descriptor_sets, &buffer_ranges)?;

        let command_buffers = ctx.command_pool.allocate_set(image_count as u32)?;
        let state = DrawState {
            render_pass: render_pass.handle(),
            pipeline: pipeline.handle(),
            pipeline_layout: ctx.pipeline_layout.handle(),
            mesh: ctx.mesh,
            clear_color: ctx.clear_color,
        };
        record_all(&command_buffers, &state, &framebuffers, &descriptor_sets)?;

        Ok(Self {
            command_buffers,
            _descriptor_pool: descriptor_pool,
            uniform_buffers,
            _framebuffers: framebuffers,
            _pipeline: pipeline,
            _render_pass: render_pass,
        })
    }
}

/// The swapchain plus its current generation of render targets.
pub struct PresentationChain {
    // Declared before the swapchain so the targets are dropped first.
    targets: Option<ChainTargets>,
    swapchain: Swapchain,
    generation: u64,
}

impl PresentationChain {
    /// Builds the first generation for a window of `window_extent`.
    ///
    /// # Errors
    ///
    /// Returns an error if the swapchain or any dependent object cannot be
    /// created.
    pub fn new(ctx: &ChainContext<'_>, window_extent: vk::Extent2D) -> RhiResult<Self> {
        let swapchain = Swapchain::new(ctx.instance, ctx.device.clone(), ctx.surface, window_extent)?;
        let targets = ChainTargets::build(ctx, &swapchain)?;

        info!(
            "Presentation chain ready: {} image(s) at {}x{}",
            swapchain.image_count(),
            swapchain.extent().width,
            swapchain.extent().height
        );

        Ok(Self {
            targets: Some(targets),
            swapchain,
            generation: 0,
        })
    }

    /// Tears down and rebuilds every swapchain-dependent object.
    ///
    /// The device is drained before anything is destroyed. If rebuilding
    /// fails the chain is left without targets and further frames error out.
    ///
    /// # Errors
    ///
    /// Returns an error if the drain or any recreation step fails.
    pub fn rebuild(&mut self, ctx: &ChainContext<'_>, window_extent: vk::Extent2D) -> RhiResult<()> {
        ctx.device.wait_idle()?;

        self.targets = None;
        self.swapchain.recreate(ctx.instance, ctx.surface, window_extent)?;
        self.targets = Some(ChainTargets::build(ctx, &self.swapchain)?);
        self.generation += 1;

        debug!(
            "Presentation chain generation {}: {} image(s) at {}x{}",
            self.generation,
            self.swapchain.image_count(),
            self.swapchain.extent().width,
            self.swapchain.extent().height
        );

        Ok(())
    }

    fn targets(&self) -> RhiResult<&ChainTargets> {
        self.targets.as_ref().ok_or_else(|| {
            RhiError::Initialization("presentation chain has no render targets".to_string())
        })
    }

    /// Acquires the next image, signaling `semaphore`.
    pub fn acquire(&self, semaphore: vk::Semaphore) -> RhiResult<AcquireOutcome> {
        self.swapchain.acquire_next_image(semaphore)
    }

    /// Presents `image_index` after `wait_semaphore`.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<PresentOutcome> {
        self.swapchain.present(queue, image_index, wait_semaphore)
    }

    /// Writes `ubo` into the uniform buffer of `image_index`.
    ///
    /// The caller must know no in-flight submission reads this image's buffer.
    pub fn write_uniforms(&self, image_index: u32, ubo: &UniformBufferObject) -> RhiResult<()> {
        let buffer = self
            .targets()?
            .uniform_buffers
            .get(image_index as usize)
            .ok_or_else(|| image_out_of_range(image_index))?;
        buffer.write_data(0, bytemuck::bytes_of(ubo))
    }

    /// Command buffer recorded for `image_index`.
    pub fn command_buffer(&self, image_index: u32) -> RhiResult<vk::CommandBuffer> {
        self.targets()?
            .command_buffers
            .handle(image_index as usize)
            .ok_or_else(|| image_out_of_range(image_index))
    }

    /// Current chain extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Number of presentation images.
    #[inline]
    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    /// Chain image format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.swapchain.format()
    }

    /// Number of completed rebuilds.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

fn image_out_of_range(image_index: u32) -> RhiError {
    RhiError::InvalidArgument(format!("no presentation image {}", image_index))
}
