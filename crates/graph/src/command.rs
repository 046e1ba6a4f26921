//! The deferred command model.
//!
//! Commands are enqueued as plain data and only touch the device when the
//! render graph replays them into the active frame's command buffer. Every
//! variant holds shared (`Arc`) references to the resources it touches; the
//! command list owns no device objects itself. Keeping those references
//! alive until replay, and through the retire queue until the frame's
//! fence, is what makes deferred recording safe.
//!
//! Operations outside this fixed set (viewport/scissor, one-off barriers)
//! are recorded directly through
//! [`RenderGraph::current_command_buffer`](crate::RenderGraph::current_command_buffer).

use std::sync::Arc;

use ash::vk;

use framegraph_rhi::RhiResult;
use framegraph_rhi::buffer::Buffer;
use framegraph_rhi::framebuffer::Framebuffer;
use framegraph_rhi::image::Image;
use framegraph_rhi::pipeline::{Pipeline, PipelineLayout};
use framegraph_rhi::render_pass::RenderPass;

/// A deferred command.
///
/// The set is closed: replay dispatches over it with an exhaustive `match`,
/// so adding a variant forces every consumer to handle it.
pub enum Command {
    /// Buffer-to-buffer copy (the replayed form of a staged upload or a
    /// download into a readback buffer).
    Copy {
        /// Source buffer (often a transient staging buffer).
        src: Arc<Buffer>,
        /// Destination buffer.
        dst: Arc<Buffer>,
        /// Copy regions.
        regions: Vec<vk::BufferCopy>,
    },
    /// Buffer-to-image copy covering the whole image, with the layout
    /// transitions the destination needs.
    CopyImage {
        /// Source buffer holding tightly packed pixel data.
        src: Arc<Buffer>,
        /// Destination image.
        dst: Arc<Image>,
        /// Layout to leave the image in; defaults to shader-read-only.
        final_layout: Option<vk::ImageLayout>,
    },
    /// Bind a descriptor set at the given set index.
    BindDescriptorSet {
        /// Descriptor set index within the pipeline layout.
        index: u32,
        /// The pipeline layout the set belongs to.
        layout: Arc<PipelineLayout>,
        /// The set to bind.
        set: vk::DescriptorSet,
        /// Graphics or compute binding.
        bind_point: vk::PipelineBindPoint,
    },
    /// Bind vertex buffers starting at a binding slot.
    BindVertexBuffers {
        /// First vertex input binding to update.
        first_binding: u32,
        /// Buffers to bind, in binding order.
        buffers: Vec<Arc<Buffer>>,
        /// Byte offset into each buffer.
        offsets: Vec<vk::DeviceSize>,
    },
    /// Bind an index buffer.
    BindIndexBuffer {
        /// The index buffer.
        buffer: Arc<Buffer>,
        /// Byte offset into the buffer.
        offset: vk::DeviceSize,
        /// Index width (UINT16 or UINT32).
        index_type: vk::IndexType,
    },
    /// Bind a pipeline at its own bind point.
    BindPipeline(Arc<Pipeline>),
    /// Non-indexed draw.
    Draw {
        /// Offset to the first vertex.
        first_vertex: u32,
        /// Offset to the first instance.
        first_instance: u32,
        /// Number of vertices.
        vertex_count: u32,
        /// Number of instances.
        instance_count: u32,
    },
    /// Indexed draw.
    DrawIndexed {
        /// Offset to the first index.
        first_index: u32,
        /// Offset to the first instance.
        first_instance: u32,
        /// Number of indices.
        index_count: u32,
        /// Number of instances.
        instance_count: u32,
        /// Constant added to each index.
        vertex_offset: i32,
    },
    /// Begin a render pass on a framebuffer.
    BeginRenderPass {
        /// The render pass to begin.
        render_pass: Arc<RenderPass>,
        /// The framebuffer to render into.
        framebuffer: Arc<Framebuffer>,
        /// Render area; defaults to the framebuffer's full extent.
        render_area: Option<vk::Rect2D>,
        /// One clear value per attachment that is cleared on load.
        clear_values: Vec<vk::ClearValue>,
    },
    /// End the current render pass.
    EndRenderPass,
}

impl Command {
    /// Short name of the command variant, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Copy { .. } => "copy",
            Command::CopyImage { .. } => "copy_image",
            Command::BindDescriptorSet { .. } => "bind_descriptor_set",
            Command::BindVertexBuffers { .. } => "bind_vertex_buffers",
            Command::BindIndexBuffer { .. } => "bind_index_buffer",
            Command::BindPipeline(_) => "bind_pipeline",
            Command::Draw { .. } => "draw",
            Command::DrawIndexed { .. } => "draw_indexed",
            Command::BeginRenderPass { .. } => "begin_render_pass",
            Command::EndRenderPass => "end_render_pass",
        }
    }
}

/// Payload of a staged upload.
///
/// Either bytes that already exist, or a fill callback invoked once against
/// the mapped staging memory, for data that is cheaper to produce directly
/// in place (e.g. generated or decoded at staging time).
pub enum UploadSource {
    /// Raw bytes, copied into the staging buffer.
    Bytes(Vec<u8>),
    /// Deferred fill: the callback receives the mapped staging region and
    /// must fill all of it.
    Fill {
        /// Number of bytes the callback will produce.
        size: usize,
        /// The fill callback.
        fill: Box<dyn FnOnce(&mut [u8]) + Send>,
    },
}

impl UploadSource {
    /// Builds a byte-copy source from a slice.
    pub fn from_slice(data: &[u8]) -> Self {
        UploadSource::Bytes(data.to_vec())
    }

    /// Size of the payload in bytes.
    pub fn len(&self) -> usize {
        match self {
            UploadSource::Bytes(data) => data.len(),
            UploadSource::Fill { size, .. } => *size,
        }
    }

    /// True if there is nothing to upload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the payload into a host-visible buffer at `offset`.
    ///
    /// Used by the render graph for both the direct (mappable destination)
    /// and staged upload paths.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is not mapped or the payload does not
    /// fit.
    pub fn write_into(self, buffer: &Buffer, offset: vk::DeviceSize) -> RhiResult<()> {
        match self {
            UploadSource::Bytes(data) => buffer.write_data(offset, &data),
            UploadSource::Fill { size, fill } => buffer.write_with(offset, size, fill),
        }
    }

    /// Materializes the payload as bytes.
    ///
    /// For a fill callback this allocates a zeroed vector and runs the
    /// callback against it.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            UploadSource::Bytes(data) => data,
            UploadSource::Fill { size, fill } => {
                let mut data = vec![0u8; size];
                fill(&mut data);
                data
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_source_len() {
        let bytes = UploadSource::Bytes(vec![1, 2, 3, 4]);
        assert_eq!(bytes.len(), 4);
        assert!(!bytes.is_empty());

        let fill = UploadSource::Fill {
            size: 64,
            fill: Box::new(|dst| dst.fill(0xAB)),
        };
        assert_eq!(fill.len(), 64);

        let empty = UploadSource::Bytes(Vec::new());
        assert!(empty.is_empty());
    }

    #[test]
    fn test_fill_callback_materializes() {
        let source = UploadSource::Fill {
            size: 8,
            fill: Box::new(|dst| {
                for (i, byte) in dst.iter_mut().enumerate() {
                    *byte = i as u8;
                }
            }),
        };

        let bytes = source.into_bytes();
        assert_eq!(bytes, vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_command_list_preserves_enqueue_order() {
        // The pending list is FIFO: replay walks it front to back.
        let mut commands: Vec<Command> = Vec::new();
        commands.push(Command::Draw {
            first_vertex: 0,
            first_instance: 0,
            vertex_count: 3,
            instance_count: 1,
        });
        commands.push(Command::DrawIndexed {
            first_index: 0,
            first_instance: 0,
            index_count: 6,
            instance_count: 1,
            vertex_offset: 0,
        });
        commands.push(Command::EndRenderPass);

        let names: Vec<&str> = commands.iter().map(|c| c.name()).collect();
        assert_eq!(names, ["draw", "draw_indexed", "end_render_pass"]);
    }
}
