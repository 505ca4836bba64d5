//! Framebuffers for the presentation chain.
//!
//! [`Framebuffers`] holds one framebuffer per swapchain image view, all sized
//! to the chain extent and bound to the same render pass. They are rebuilt
//! whenever the chain is.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// One framebuffer per presentation image.
pub struct Framebuffers {
    device: Arc<Device>,
    framebuffers: Vec<vk::Framebuffer>,
    extent: vk::Extent2D,
}

impl Framebuffers {
    /// Creates a framebuffer for every view in `image_views`.
    ///
    /// Framebuffers already created are destroyed if a later one fails.
    ///
    /// # Errors
    ///
    /// Returns an error if any framebuffer creation fails.
    pub fn new(
        device: Arc<Device>,
        render_pass: vk::RenderPass,
        image_views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let mut created = Self {
            device,
            framebuffers: Vec::with_capacity(image_views.len()),
            extent,
        };

        for &view in image_views {
            let attachments = [view];
            let create_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            let framebuffer = unsafe { created.device.handle().create_framebuffer(&create_info, None)? };
            created.framebuffers.push(framebuffer);
        }

        debug!(
            "Created {} framebuffer(s) at {}x{}",
            created.framebuffers.len(),
            extent.width,
            extent.height
        );

        Ok(created)
    }

    /// Returns the framebuffer for image `index`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<vk::Framebuffer> {
        self.framebuffers.get(index).copied()
    }

    /// Number of framebuffers.
    #[inline]
    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    /// Returns true if there are no framebuffers.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }

    /// Extent every framebuffer was created with.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in self.framebuffers.iter().rev() {
                self.device.handle().destroy_framebuffer(framebuffer, None);
            }
        }
        debug!("Destroyed {} framebuffer(s)", self.framebuffers.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framebuffers_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Framebuffers>();
    }
}
