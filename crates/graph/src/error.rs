//! Render graph error types.

use thiserror::Error;

use framegraph_rhi::RhiError;

/// Render graph error type.
///
/// Contract violations (flushing outside a running frame, binding without a
/// pipeline layout) are usage bugs and panic instead of surfacing here;
/// these variants cover runtime conditions only. Errors from queue submit
/// or present after a frame has begun are unrecoverable: there is no safe
/// rollback of GPU work that has already been submitted.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Error from the RHI layer (resource creation, device loss, ...)
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// Raw Vulkan error from swapchain acquire/present
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),
}

/// Result type alias for render graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;
