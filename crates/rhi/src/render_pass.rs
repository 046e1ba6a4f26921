//! Render pass objects.
//!
//! Render passes are consumed by the render graph as opaque shared handles;
//! this module provides the wrapper type plus one constructor for the common
//! case of a single color attachment that is cleared, rendered and presented
//! (the pass used for swapchain framebuffers).

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Vulkan render pass wrapper.
///
/// Immutable after creation; share it with `Arc`.
pub struct RenderPass {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan render pass handle.
    render_pass: vk::RenderPass,
}

impl RenderPass {
    /// Creates a render pass with a single color attachment.
    ///
    /// The attachment is cleared on load, stored on completion, and left in
    /// `final_layout` (pass `PRESENT_SRC_KHR` for swapchain targets,
    /// `SHADER_READ_ONLY_OPTIMAL` for render-to-texture).
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `color_format` - Format of the color attachment
    /// * `final_layout` - Layout the attachment is transitioned to at the end
    ///
    /// # Errors
    ///
    /// Returns an error if render pass creation fails.
    pub fn single_color(
        device: Arc<Device>,
        color_format: vk::Format,
        final_layout: vk::ImageLayout,
    ) -> RhiResult<Self> {
        let attachment = vk::AttachmentDescription::default()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(final_layout);

        let color_ref = vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let color_refs = [color_ref];
        let subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);

        // The external dependency orders the attachment clear against the
        // semaphore wait at COLOR_ATTACHMENT_OUTPUT in the frame submit.
        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

        let attachments = [attachment];
        let subpasses = [subpass];
        let dependencies = [dependency];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.handle().create_render_pass(&create_info, None)? };

        debug!(
            "Created render pass: color {:?}, final layout {:?}",
            color_format, final_layout
        );

        Ok(Self {
            device,
            render_pass,
        })
    }

    /// Returns the Vulkan render pass handle.
    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_render_pass(self.render_pass, None);
        }
        debug!("Destroyed render pass");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_pass_is_send_sync() {
        // Compile-time check that RenderPass is Send + Sync
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RenderPass>();
    }
}
