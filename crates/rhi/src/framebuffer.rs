//! Framebuffer objects.
//!
//! A [`Framebuffer`] is an immutable binding of a fixed set of image views
//! (plus their shared extent) to a render pass: one per swapchain image for
//! presentation, or standalone for render-to-texture. Resizing means
//! replacing the object, never mutating it in place; when the swapchain is
//! recreated, its owner rebuilds the framebuffers from the new views.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::ImageView;
use crate::render_pass::RenderPass;

/// Vulkan framebuffer wrapper.
///
/// Holds shared references to its image views and render pass so the
/// underlying objects outlive every recorded use of the framebuffer.
pub struct Framebuffer {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan framebuffer handle.
    framebuffer: vk::Framebuffer,
    /// The bound image views, in attachment order.
    views: Vec<Arc<ImageView>>,
    /// The render pass this framebuffer is compatible with.
    render_pass: Arc<RenderPass>,
    /// Extent shared by all bound views.
    extent: vk::Extent2D,
}

impl Framebuffer {
    /// Creates a framebuffer binding the given views to a render pass.
    ///
    /// The framebuffer extent is derived from the first view; every view
    /// must share that extent.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `views` - Image views in attachment order (at least one)
    /// * `render_pass` - The render pass the framebuffer will be used with
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `views` is empty
    /// - the views do not all share one extent
    /// - framebuffer creation fails
    ///
    /// No partially-constructed framebuffer is ever returned.
    pub fn new(
        device: Arc<Device>,
        views: Vec<Arc<ImageView>>,
        render_pass: Arc<RenderPass>,
    ) -> RhiResult<Self> {
        let extents: Vec<vk::Extent2D> = views.iter().map(|v| v.extent()).collect();
        let extent = shared_extent(&extents)?;

        let attachments: Vec<vk::ImageView> = views.iter().map(|v| v.handle()).collect();

        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle())
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { device.handle().create_framebuffer(&create_info, None)? };

        debug!(
            "Created framebuffer: {}x{}, {} attachment(s)",
            extent.width,
            extent.height,
            views.len()
        );

        Ok(Self {
            device,
            framebuffer,
            views,
            render_pass,
            extent,
        })
    }

    /// Returns the Vulkan framebuffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    /// Returns the extent shared by all bound views.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Returns the bound image views, in attachment order.
    #[inline]
    pub fn views(&self) -> &[Arc<ImageView>] {
        &self.views
    }

    /// Returns the render pass this framebuffer is compatible with.
    #[inline]
    pub fn render_pass(&self) -> &Arc<RenderPass> {
        &self.render_pass
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_framebuffer(self.framebuffer, None);
        }
    }
}

/// Derives the extent shared by all attachments.
///
/// The extent comes from the first entry; any mismatch is a construction
/// error.
fn shared_extent(extents: &[vk::Extent2D]) -> RhiResult<vk::Extent2D> {
    let first = extents.first().ok_or_else(|| {
        RhiError::FramebufferError("Framebuffer requires at least one image view".to_string())
    })?;

    for (i, extent) in extents.iter().enumerate().skip(1) {
        if extent.width != first.width || extent.height != first.height {
            return Err(RhiError::FramebufferError(format!(
                "Attachment {} extent {}x{} does not match attachment 0 extent {}x{}",
                i, extent.width, extent.height, first.width, first.height
            )));
        }
    }

    Ok(*first)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_shared_extent_accepts_matching_views() {
        let result = shared_extent(&[extent(800, 600), extent(800, 600)]);
        let shared = result.expect("matching extents should succeed");
        assert_eq!(shared.width, 800);
        assert_eq!(shared.height, 600);
    }

    #[test]
    fn test_shared_extent_rejects_mismatched_views() {
        let result = shared_extent(&[extent(800, 600), extent(1024, 768)]);
        assert!(matches!(result, Err(RhiError::FramebufferError(_))));
    }

    #[test]
    fn test_shared_extent_rejects_empty() {
        let result = shared_extent(&[]);
        assert!(matches!(result, Err(RhiError::FramebufferError(_))));
    }

    #[test]
    fn test_shared_extent_single_view() {
        let shared = shared_extent(&[extent(64, 64)]).expect("single view should succeed");
        assert_eq!(shared.width, 64);
        assert_eq!(shared.height, 64);
    }
}
