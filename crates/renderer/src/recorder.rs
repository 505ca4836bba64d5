//! Per-image command recording.
//!
//! Each presentation image gets one command buffer, recorded once per chain
//! generation and resubmitted every frame that acquires the image:
//!
//! ```text
//! begin render pass (clear) -> bind pipeline -> bind vertex/index buffers
//!   -> bind descriptor set -> set viewport/scissor -> draw indexed -> end
//! ```

use ash::vk;
use tracing::debug;

use presto_rhi::command::{CommandBuffer, CommandBufferSet};
use presto_rhi::framebuffer::Framebuffers;
use presto_rhi::{RhiError, RhiResult};

use crate::geometry::Mesh;

/// State shared by every image's recording.
pub struct DrawState<'a> {
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub mesh: &'a Mesh,
    pub clear_color: [f32; 4],
}

/// Viewport covering `extent` with the full depth range.
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Scissor covering `extent`.
pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Clear value for the color attachment.
pub fn clear_value(color: [f32; 4]) -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue { float32: color },
    }
}

/// Records the draw for a single image into `cmd`.
pub fn record_image(
    cmd: &CommandBuffer,
    state: &DrawState<'_>,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
    descriptor_set: vk::DescriptorSet,
) -> RhiResult<()> {
    cmd.begin_reusable()?;

    let clear_values = [clear_value(state.clear_color)];
    let begin_info = vk::RenderPassBeginInfo::default()
        .render_pass(state.render_pass)
        .framebuffer(framebuffer)
        .render_area(full_scissor(extent))
        .clear_values(&clear_values);

    cmd.begin_render_pass(&begin_info);
    cmd.bind_graphics_pipeline(state.pipeline);
    state.mesh.bind(cmd);
    cmd.bind_descriptor_sets(state.pipeline_layout, 0, &[descriptor_set]);
    cmd.set_viewport(&full_viewport(extent));
    cmd.set_scissor(&full_scissor(extent));
    cmd.draw_indexed(state.mesh.index_count(), 1);
    cmd.end_render_pass();

    cmd.end()
}

/// Records every buffer in `commands`, one per framebuffer and descriptor set.
///
/// # Errors
///
/// Returns [`RhiError::InvalidArgument`] if the three counts differ, or an
/// error if recording fails.
pub fn record_all(
    commands: &CommandBufferSet,
    state: &DrawState<'_>,
    framebuffers: &Framebuffers,
    descriptor_sets: &[vk::DescriptorSet],
) -> RhiResult<()> {
    check_counts(commands.len(), framebuffers.len(), descriptor_sets.len())?;

    for (index, &set) in descriptor_sets.iter().enumerate() {
        let (cmd, framebuffer) =
            recording_target(index, commands.get(index), framebuffers.get(index))?;
        record_image(&cmd, state, framebuffer, framebuffers.extent(), set)?;
    }

    debug!(
        "Recorded {} command buffer(s) at {}x{}",
        commands.len(),
        framebuffers.extent().width,
        framebuffers.extent().height
    );

    Ok(())
}

fn check_counts(commands: usize, framebuffers: usize, descriptor_sets: usize) -> RhiResult<()> {
    if commands != framebuffers || commands != descriptor_sets {
        return Err(RhiError::InvalidArgument(format!(
            "{} command buffer(s), {} framebuffer(s), {} descriptor set(s)",
            commands, framebuffers, descriptor_sets
        )));
    }
    Ok(())
}

/// Pairs image `index`'s command buffer with its framebuffer.
///
/// A missing half is an error: leaving the buffer unrecorded would let a
/// later frame submit it.
fn recording_target<C, B>(index: usize, cmd: Option<C>, framebuffer: Option<B>) -> RhiResult<(C, B)> {
    match (cmd, framebuffer) {
        (Some(cmd), Some(framebuffer)) => Ok((cmd, framebuffer)),
        (None, _) => Err(RhiError::InvalidArgument(format!(
            "image {} has no command buffer",
            index
        ))),
        (_, None) => Err(RhiError::InvalidArgument(format!(
            "image {} has no framebuffer",
            index
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_viewport() {
        let viewport = full_viewport(vk::Extent2D {
            width: 800,
            height: 600,
        });
        assert_eq!(viewport.x, 0.0);
        assert_eq!(viewport.width, 800.0);
        assert_eq!(viewport.height, 600.0);
        assert_eq!(viewport.min_depth, 0.0);
        assert_eq!(viewport.max_depth, 1.0);
    }

    #[test]
    fn test_full_scissor() {
        let extent = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        let scissor = full_scissor(extent);
        assert_eq!(scissor.offset.x, 0);
        assert_eq!(scissor.offset.y, 0);
        assert_eq!(scissor.extent, extent);
    }

    #[test]
    fn test_clear_value_color() {
        let value = clear_value([1.0, 1.0, 1.0, 1.0]);
        let color = unsafe { value.color.float32 };
        assert_eq!(color, [1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_check_counts() {
        assert!(check_counts(3, 3, 3).is_ok());
        assert!(matches!(check_counts(3, 2, 3), Err(RhiError::InvalidArgument(_))));
        assert!(matches!(check_counts(3, 3, 4), Err(RhiError::InvalidArgument(_))));
    }

    #[test]
    fn test_recording_target_requires_both_halves() {
        assert_eq!(recording_target(0, Some(1u8), Some(2u8)).unwrap(), (1, 2));

        let err = recording_target::<u8, u8>(1, None, Some(2)).unwrap_err();
        assert!(matches!(err, RhiError::InvalidArgument(ref msg) if msg.contains("command buffer")));

        let err = recording_target::<u8, u8>(2, Some(1), None).unwrap_err();
        assert!(matches!(err, RhiError::InvalidArgument(ref msg) if msg.contains("framebuffer")));
    }
}
