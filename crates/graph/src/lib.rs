//! Deferred command recording, frame pacing and presentation.
//!
//! This crate implements the per-frame command-submission subsystem:
//! commands are enqueued as data, staged uploads are prepared immediately,
//! and everything is replayed into the active frame's command buffer at
//! flush time. Frame pacing overlaps CPU recording with GPU execution,
//! bounded by [`MAX_FRAMES_IN_FLIGHT`] fence slots.

mod arena;
mod command;
mod error;
mod graph;
mod retire;

pub use arena::DescriptorArena;
pub use command::{Command, UploadSource};
pub use error::{GraphError, GraphResult};
pub use graph::{DownloadId, FrameAcquire, FrameStatus, RenderGraph};
pub use retire::RetireQueue;

/// Maximum number of frames that can be in flight simultaneously.
///
/// While the GPU works on up to this many submitted frames, the CPU records
/// the next one; the per-slot fence wait in `begin_frame` is the only
/// backpressure point.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
