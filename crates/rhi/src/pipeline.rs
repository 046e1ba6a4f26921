//! Pipeline and pipeline layout handles.
//!
//! Shader compilation and graphics-pipeline assembly live in the layers
//! above this crate; the render graph only consumes pipelines as opaque
//! shared handles. What this module does own is the [`PipelineLayout`],
//! because descriptor-set acquisition needs access to the layout's
//! descriptor set layouts.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::descriptor::DescriptorSetLayout;
use crate::device::Device;
use crate::error::RhiResult;

/// Pipeline layout wrapper.
///
/// Owns the `vk::PipelineLayout` and keeps the descriptor set layouts it
/// was built from, so sets can be allocated for any of its slots later.
pub struct PipelineLayout {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan pipeline layout handle.
    layout: vk::PipelineLayout,
    /// Descriptor set layouts, by set index.
    set_layouts: Vec<Arc<DescriptorSetLayout>>,
}

impl PipelineLayout {
    /// Creates a new pipeline layout from descriptor set layouts.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `set_layouts` - Descriptor set layouts, in set-index order
    /// * `push_constant_ranges` - Push constant ranges, if any
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(
        device: Arc<Device>,
        set_layouts: Vec<Arc<DescriptorSetLayout>>,
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let vk_set_layouts: Vec<vk::DescriptorSetLayout> =
            set_layouts.iter().map(|l| l.handle()).collect();

        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&vk_set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };

        debug!(
            "Created pipeline layout with {} set layout(s)",
            set_layouts.len()
        );

        Ok(Self {
            device,
            layout,
            set_layouts,
        })
    }

    /// Returns the Vulkan pipeline layout handle.
    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Returns the descriptor set layouts, by set index.
    #[inline]
    pub fn set_layouts(&self) -> &[Arc<DescriptorSetLayout>] {
        &self.set_layouts
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        debug!("Destroyed pipeline layout");
    }
}

/// Opaque pipeline handle.
///
/// Wraps a `vk::Pipeline` created by the shader/pipeline subsystem layered
/// above this crate, taking ownership of its destruction. The bind point is
/// carried with the handle so replay can bind it without extra context.
pub struct Pipeline {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan pipeline handle.
    pipeline: vk::Pipeline,
    /// Whether this is a graphics or compute pipeline.
    bind_point: vk::PipelineBindPoint,
    /// The layout the pipeline was created with.
    layout: Arc<PipelineLayout>,
}

impl Pipeline {
    /// Takes ownership of an externally created pipeline.
    ///
    /// # Safety-adjacent contract
    ///
    /// The handle must have been created on this device and must not be
    /// destroyed elsewhere; this wrapper destroys it on drop.
    pub fn from_raw(
        device: Arc<Device>,
        pipeline: vk::Pipeline,
        bind_point: vk::PipelineBindPoint,
        layout: Arc<PipelineLayout>,
    ) -> Self {
        Self {
            device,
            pipeline,
            bind_point,
            layout,
        }
    }

    /// Returns the Vulkan pipeline handle.
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Returns the pipeline's bind point.
    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    /// Returns the layout the pipeline was created with.
    #[inline]
    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        debug!("Destroyed pipeline");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_types_are_send_sync() {
        // Compile-time check that pipeline types are Send + Sync
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PipelineLayout>();
        assert_send_sync::<Pipeline>();
    }
}
