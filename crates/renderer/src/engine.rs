//! Top-level frame presentation engine.
//!
//! [`Engine`] creates every GPU object in dependency order, runs one frame of
//! the presentation protocol per [`Engine::render_frame`] call and tears
//! everything down in reverse once the device is idle.

use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info};

use presto_core::{Config, Timer};
use presto_platform::{Surface, Window, get_required_extensions};
use presto_rhi::command::CommandPool;
use presto_rhi::descriptor::DescriptorSetLayout;
use presto_rhi::device::Device;
use presto_rhi::instance::Instance;
use presto_rhi::physical_device::select_physical_device;
use presto_rhi::pipeline::PipelineLayout;
use presto_rhi::shader::{Shader, ShaderStage};
use presto_rhi::swapchain::{AcquireOutcome, PresentOutcome};
use presto_rhi::sync::{FenceTimeout, FrameSync, wait_for_fences};
use presto_rhi::{RhiError, RhiResult};

use crate::MAX_FRAMES_IN_FLIGHT;
use crate::frame_sync::{FrameBackend, FrameStatus, FrameSynchronizer, RebuildOutcome};
use crate::geometry::Mesh;
use crate::presentation::{ChainContext, PresentationChain};
use crate::ubo::UniformBufferObject;

/// Frames between progress log lines.
const FRAME_LOG_INTERVAL: u64 = 90;

/// Shader entry point for both stages.
const SHADER_ENTRY_POINT: &str = "main";

/// Vulkan frame presentation engine.
///
/// # Resource Destruction Order
///
/// Vulkan objects are released in reverse creation order after the device
/// has gone idle:
/// 1. Per-slot sync objects
/// 2. Presentation chain (command buffers .. render pass, then swapchain)
/// 3. Mesh buffers and shader modules
/// 4. Pipeline layout, descriptor set layout and command pool
/// 5. Device (and its allocator)
/// 6. Surface
/// 7. Instance
pub struct Engine {
    /// Vulkan instance (destroyed last).
    instance: ManuallyDrop<Instance>,
    /// Window surface (destroyed after the swapchain, before the instance).
    surface: ManuallyDrop<Surface>,
    /// Logical device.
    device: ManuallyDrop<Arc<Device>>,

    /// Command pool for per-image and one-shot command buffers.
    command_pool: ManuallyDrop<CommandPool>,
    /// Layout of the per-image uniform buffer set.
    descriptor_set_layout: ManuallyDrop<DescriptorSetLayout>,
    /// Pipeline layout shared by every chain generation.
    pipeline_layout: ManuallyDrop<PipelineLayout>,
    vertex_shader: ManuallyDrop<Shader>,
    fragment_shader: ManuallyDrop<Shader>,
    /// Quad geometry.
    mesh: ManuallyDrop<Mesh>,

    /// Swapchain and swapchain-dependent objects.
    chain: ManuallyDrop<PresentationChain>,
    /// Per-slot semaphores and fences.
    frames: ManuallyDrop<Vec<FrameSync>>,

    /// Frame protocol bookkeeping.
    synchronizer: FrameSynchronizer<vk::Fence>,
    fence_timeout: FenceTimeout,
    clear_color: [f32; 4],
    timer: Timer,
}

impl Engine {
    /// Creates the engine for `window`.
    ///
    /// # Errors
    ///
    /// Returns an error if any part of initialization fails. Objects created
    /// before the failure are released in reverse order.
    pub fn new(window: &Window, config: &Config) -> RhiResult<Self> {
        let window_extent = window.framebuffer_extent();
        info!(
            "Initializing engine ({}x{}, {} frames in flight)",
            window_extent.width, window_extent.height, MAX_FRAMES_IN_FLIGHT
        );

        let display_handle = window
            .raw_display_handle()
            .map_err(|e| RhiError::Initialization(e.to_string()))?;
        let surface_extensions = get_required_extensions(display_handle)
            .map_err(|e| RhiError::Initialization(e.to_string()))?;
        let instance = Instance::new(config.graphics.validation, &surface_extensions)?;

        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(|e| RhiError::Initialization(e.to_string()))?;

        let candidate = select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &candidate)?;

        let graphics_family = device.queue_families().graphics_family.ok_or_else(|| {
            RhiError::Initialization("selected device has no graphics queue".to_string())
        })?;
        let command_pool = CommandPool::new(device.clone(), graphics_family)?;

        let descriptor_set_layout =
            DescriptorSetLayout::uniform_buffer(device.clone(), 0, vk::ShaderStageFlags::VERTEX)?;
        let pipeline_layout = PipelineLayout::new(device.clone(), &[descriptor_set_layout.handle()])?;

        let vertex_shader = Shader::from_spirv_file(
            device.clone(),
            &config.graphics.vertex_shader,
            ShaderStage::Vertex,
            SHADER_ENTRY_POINT,
        )?;
        let fragment_shader = Shader::from_spirv_file(
            device.clone(),
            &config.graphics.fragment_shader,
            ShaderStage::Fragment,
            SHADER_ENTRY_POINT,
        )?;

        let mesh = Mesh::quad(&device, &command_pool)?;

        let clear_color = config.graphics.clear_color;
        let chain = {
            let ctx = ChainContext {
                instance: &instance,
                device: &device,
                surface: surface.handle(),
                command_pool: &command_pool,
                pipeline_layout: &pipeline_layout,
                descriptor_set_layout: &descriptor_set_layout,
                vertex_shader: &vertex_shader,
                fragment_shader: &fragment_shader,
                mesh: &mesh,
                clear_color,
            };
            PresentationChain::new(&ctx, window_extent)?
        };

        let frames = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| FrameSync::new(device.clone()))
            .collect::<RhiResult<Vec<_>>>()?;

        let synchronizer = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT, chain.image_count())?;

        let fence_timeout = FenceTimeout::from_millis(config.graphics.fence_timeout_ms);
        info!(
            "Engine initialized: {} presentation image(s), fence timeout {:?}",
            chain.image_count(),
            fence_timeout
        );

        Ok(Self {
            instance: ManuallyDrop::new(instance),
            surface: ManuallyDrop::new(surface),
            device: ManuallyDrop::new(device),
            command_pool: ManuallyDrop::new(command_pool),
            descriptor_set_layout: ManuallyDrop::new(descriptor_set_layout),
            pipeline_layout: ManuallyDrop::new(pipeline_layout),
            vertex_shader: ManuallyDrop::new(vertex_shader),
            fragment_shader: ManuallyDrop::new(fragment_shader),
            mesh: ManuallyDrop::new(mesh),
            chain: ManuallyDrop::new(chain),
            frames: ManuallyDrop::new(frames),
            synchronizer,
            fence_timeout,
            clear_color,
            timer: Timer::new(),
        })
    }

    /// Runs one iteration of the frame protocol.
    ///
    /// Consumes the window's resize flag.
    ///
    /// # Errors
    ///
    /// Every error returned is fatal. Stale presentation state is handled
    /// internally and reported through [`FrameStatus`].
    pub fn render_frame(&mut self, window: &mut Window) -> RhiResult<FrameStatus> {
        let resize_requested = window.take_resized();
        let tick = self.timer.begin_frame();

        let mut backend = VulkanFrame {
            ctx: ChainContext {
                instance: &self.instance,
                device: &self.device,
                surface: self.surface.handle(),
                command_pool: &self.command_pool,
                pipeline_layout: &self.pipeline_layout,
                descriptor_set_layout: &self.descriptor_set_layout,
                vertex_shader: &self.vertex_shader,
                fragment_shader: &self.fragment_shader,
                mesh: &self.mesh,
                clear_color: self.clear_color,
            },
            chain: &mut self.chain,
            frames: &mut self.frames,
            fence_timeout: self.fence_timeout,
            window_extent: window.framebuffer_extent(),
            elapsed_secs: tick.elapsed.as_secs_f32(),
        };

        let status = self.synchronizer.draw_frame(&mut backend, resize_requested)?;

        if tick.every(FRAME_LOG_INTERVAL) {
            info!("Render frame {:05}", tick.index());
        }

        Ok(status)
    }

    /// Drains the device and releases everything.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be drained. Resources are
    /// released regardless.
    pub fn shutdown(self) -> RhiResult<()> {
        let drained = self.device.wait_idle();
        info!(
            "Shutting down after {} frame(s) and {} rebuild(s)",
            self.synchronizer.frames_submitted(),
            self.synchronizer.rebuilds()
        );
        drop(self);
        drained
    }

    /// Current presentation extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.chain.extent()
    }

    /// Frame protocol state.
    pub fn synchronizer(&self) -> &FrameSynchronizer<vk::Fence> {
        &self.synchronizer
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Nothing below may be destroyed while the GPU still references it.
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during engine drop: {:?}", e);
        }

        // SAFETY: each field is dropped exactly once, here, and never used after.
        unsafe {
            ManuallyDrop::drop(&mut self.frames);
            ManuallyDrop::drop(&mut self.chain);
            ManuallyDrop::drop(&mut self.mesh);
            ManuallyDrop::drop(&mut self.fragment_shader);
            ManuallyDrop::drop(&mut self.vertex_shader);
            ManuallyDrop::drop(&mut self.pipeline_layout);
            ManuallyDrop::drop(&mut self.descriptor_set_layout);
            ManuallyDrop::drop(&mut self.command_pool);
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.instance);
        }

        info!("Engine destroyed");
    }
}

/// Borrowed view of the engine that the frame protocol runs against.
struct VulkanFrame<'a> {
    ctx: ChainContext<'a>,
    chain: &'a mut PresentationChain,
    frames: &'a mut [FrameSync],
    fence_timeout: FenceTimeout,
    window_extent: vk::Extent2D,
    elapsed_secs: f32,
}

impl VulkanFrame<'_> {
    fn frame(&self, slot: usize) -> RhiResult<&FrameSync> {
        self.frames
            .get(slot)
            .ok_or_else(|| RhiError::InvalidArgument(format!("no frame slot {}", slot)))
    }
}

impl FrameBackend for VulkanFrame<'_> {
    type Fence = vk::Fence;

    fn slot_fence(&self, slot: usize) -> vk::Fence {
        self.frames[slot % self.frames.len()].in_flight_fence_handle()
    }

    fn wait_fence(&mut self, fence: vk::Fence) -> RhiResult<()> {
        wait_for_fences(self.ctx.device, &[fence], self.fence_timeout)
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> RhiResult<()> {
        unsafe { self.ctx.device.handle().reset_fences(&[fence])? };
        Ok(())
    }

    fn acquire(&mut self, slot: usize) -> RhiResult<AcquireOutcome> {
        let semaphore = self.frame(slot)?.image_available_handle();
        self.chain.acquire(semaphore)
    }

    fn update_image(&mut self, image_index: u32) -> RhiResult<()> {
        let extent = self.chain.extent();
        let ubo = UniformBufferObject::at(self.elapsed_secs, extent.width, extent.height);
        self.chain.write_uniforms(image_index, &ubo)
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> RhiResult<()> {
        let frame = self.frame(slot)?;
        let command_buffers = [self.chain.command_buffer(image_index)?];
        let wait_semaphores = [frame.image_available_handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [frame.render_finished_handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: the command buffer was recorded for the current chain
        // generation and the slot fence was reset by the caller.
        unsafe {
            self.ctx
                .device
                .submit_graphics(&[submit_info], frame.in_flight_fence_handle())
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome> {
        let semaphore = self.frame(slot)?.render_finished_handle();
        self.chain
            .present(self.ctx.device.present_queue(), image_index, semaphore)
    }

    fn rebuild(&mut self) -> RhiResult<RebuildOutcome> {
        let extent = self.window_extent;
        if extent.width == 0 || extent.height == 0 {
            return Ok(RebuildOutcome::Deferred);
        }

        self.chain.rebuild(&self.ctx, extent)?;

        // The device is idle after the rebuild, so no semaphore is in use.
        for frame in self.frames.iter_mut() {
            frame.recreate_semaphores()?;
        }
        debug!("Recreated semaphores for {} frame slot(s)", self.frames.len());

        Ok(RebuildOutcome::Rebuilt {
            image_count: self.chain.image_count(),
        })
    }

    fn wait_idle(&mut self) -> RhiResult<()> {
        self.ctx.device.wait_idle()
    }
}
