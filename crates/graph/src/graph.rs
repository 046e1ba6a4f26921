//! The render graph: frame state machine, deferred replay, and presentation.
//!
//! # Overview
//!
//! [`RenderGraph`] owns the frame-pacing machinery for one window surface:
//!
//! - N frame slots ([`MAX_FRAMES_IN_FLIGHT`]), each with a command buffer,
//!   an image-available semaphore, a render-finished semaphore and an
//!   in-flight fence
//! - the pending [`Command`] list, replayed FIFO at flush time
//! - the swapchain and one default framebuffer per swapchain image
//! - per-slot deferred release of resources and descriptor pools
//!
//! # Frame loop
//!
//! ```text
//! loop {
//!     match graph.begin_frame()? {
//!         FrameAcquire::OutOfDate => { graph.recreate_swapchain(...)?; continue; }
//!         FrameAcquire::Ready => {}
//!     }
//!     // enqueue commands, uploads, descriptor binds ...
//!     graph.flush_commands();
//!     let needs_recreate = graph.finish_frame()?;
//!     if needs_recreate { graph.recreate_swapchain(...)?; }
//! }
//! ```
//!
//! The fence wait inside `begin_frame` is the only blocking point: it
//! bounds the CPU to at most N recorded-but-unfinished frames.
//!
//! # Contract
//!
//! All methods must be called from one logical thread in program order;
//! there is no internal locking. Calling an operation in a state where it
//! is not legal (see each method) is a usage bug and panics. Once
//! `begin_frame` returns `Ready`, the frame must be driven to
//! `finish_frame`; abandoning it leaves the slot's synchronization objects
//! in an undefined state.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, trace};

use framegraph_rhi::buffer::{Buffer, BufferUsage};
use framegraph_rhi::command::{CommandBuffer, CommandPool};
use framegraph_rhi::device::Device;
use framegraph_rhi::framebuffer::Framebuffer;
use framegraph_rhi::image::Image;
use framegraph_rhi::instance::Instance;
use framegraph_rhi::pipeline::PipelineLayout;
use framegraph_rhi::render_pass::RenderPass;
use framegraph_rhi::swapchain::Swapchain;
use framegraph_rhi::sync::{Fence, Semaphore};

use crate::MAX_FRAMES_IN_FLIGHT;
use crate::arena::DescriptorArena;
use crate::command::{Command, UploadSource};
use crate::error::GraphResult;
use crate::retire::RetireQueue;

/// Where the frame state machine currently is.
///
/// `Init` only exists before the first `begin_frame`; afterwards the
/// status cycles `FrameRunning -> FrameFinished -> FrameRunning -> ...`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// No frame has been started yet.
    Init,
    /// Between `begin_frame` and `finish_frame`; recording is legal.
    FrameRunning,
    /// After `finish_frame`; waiting for the next `begin_frame`.
    FrameFinished,
}

/// Outcome of `begin_frame`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use = "an OutOfDate surface requires swapchain recreation before the next frame"]
pub enum FrameAcquire {
    /// A swapchain image was acquired; the frame is running.
    Ready,
    /// The surface is stale. No frame was started and no per-slot state
    /// was consumed; recreate the swapchain and call `begin_frame` again.
    OutOfDate,
}

/// Handle for an enqueued buffer download.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DownloadId(u64);

/// A pending readback.
struct Download {
    /// Host-visible buffer the copy lands in.
    buffer: Arc<Buffer>,
    /// Absolute frame number the copy was recorded in.
    frame: u64,
    /// Set once that frame's completion has been observed.
    ready: bool,
}

/// Synchronization and recording state for one frame slot.
struct FrameSlot {
    command_buffer: CommandBuffer,
    image_available: Semaphore,
    render_finished: Semaphore,
    in_flight: Fence,
}

impl FrameSlot {
    fn new(device: Arc<Device>, pool: &CommandPool) -> GraphResult<Self> {
        let command_buffer = CommandBuffer::new(device.clone(), pool)?;
        let image_available = Semaphore::new(device.clone())?;
        let render_finished = Semaphore::new(device.clone())?;
        // Signaled so the first wait on this slot does not block
        let in_flight = Fence::new(device, true)?;

        Ok(Self {
            command_buffer,
            image_available,
            render_finished,
            in_flight,
        })
    }
}

/// Per-frame GPU command submission and presentation.
///
/// See the [module documentation](self) for the frame loop and threading
/// contract.
pub struct RenderGraph {
    device: Arc<Device>,
    swapchain: Swapchain,
    default_render_pass: Arc<RenderPass>,
    /// One framebuffer per swapchain image, rebuilt on recreation.
    default_framebuffers: Vec<Arc<Framebuffer>>,
    command_pool: CommandPool,
    frames: Vec<FrameSlot>,
    commands: Vec<Command>,
    retire: RetireQueue,
    arena: DescriptorArena,
    downloads: HashMap<DownloadId, Download>,
    next_download_id: u64,
    /// Layout subsequent descriptor binds target.
    bound_layout: Option<Arc<PipelineLayout>>,
    bound_bind_point: vk::PipelineBindPoint,
    /// Frame slot in [0, MAX_FRAMES_IN_FLIGHT).
    frame_slot: usize,
    /// Absolute frame counter, incremented in `finish_frame`.
    frame_counter: u64,
    /// Swapchain image index from the last acquire.
    image_index: u32,
    status: FrameStatus,
}

impl RenderGraph {
    /// Creates a render graph over a swapchain.
    ///
    /// Builds the frame slots, a default framebuffer per swapchain image
    /// (bound to `render_pass`), and the per-slot descriptor arena. The
    /// graph takes ownership of the swapchain; the device and render pass
    /// are shared.
    ///
    /// # Errors
    ///
    /// Returns an error if any resource creation fails; no partially
    /// constructed graph is returned.
    pub fn new(
        device: Arc<Device>,
        swapchain: Swapchain,
        render_pass: Arc<RenderPass>,
    ) -> GraphResult<Self> {
        let graphics_family = device
            .queue_families()
            .graphics_family
            .expect("physical device selection guarantees a graphics family");
        let command_pool = CommandPool::new(device.clone(), graphics_family)?;

        let mut frames = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for i in 0..MAX_FRAMES_IN_FLIGHT {
            frames.push(FrameSlot::new(device.clone(), &command_pool)?);
            debug!("Created frame slot {}", i);
        }

        let default_framebuffers =
            build_default_framebuffers(&device, &swapchain, &render_pass)?;

        let arena = DescriptorArena::new(device.clone(), MAX_FRAMES_IN_FLIGHT)?;

        info!(
            "Render graph created: {} frames in flight, {} swapchain images",
            MAX_FRAMES_IN_FLIGHT,
            swapchain.image_count()
        );

        Ok(Self {
            device,
            swapchain,
            default_render_pass: render_pass,
            default_framebuffers,
            command_pool,
            frames,
            commands: Vec::new(),
            retire: RetireQueue::new(MAX_FRAMES_IN_FLIGHT),
            arena,
            downloads: HashMap::new(),
            next_download_id: 0,
            bound_layout: None,
            bound_bind_point: vk::PipelineBindPoint::GRAPHICS,
            frame_slot: 0,
            frame_counter: 0,
            image_index: 0,
            status: FrameStatus::Init,
        })
    }

    // =========================================================================
    // Enqueueing
    // =========================================================================

    /// Appends a command to the pending list.
    ///
    /// Pure bookkeeping: no device calls happen until `flush_commands`.
    /// Enqueue order is replay order.
    ///
    /// # Panics
    ///
    /// Panics if called after `finish_frame` (status `FrameFinished`).
    pub fn enqueue(&mut self, command: Command) {
        assert_ne!(
            self.status,
            FrameStatus::FrameFinished,
            "enqueue is not legal after finish_frame; wait for the next begin_frame"
        );
        self.commands.push(command);
    }

    /// Stages a buffer upload.
    ///
    /// Side-effecting immediately: if the destination is host-visible the
    /// payload is written straight into it; otherwise a staging buffer is
    /// allocated and filled now, and a matching `Copy` is enqueued for the
    /// next flush. On error nothing is enqueued and no staging buffer is
    /// left behind.
    ///
    /// # Errors
    ///
    /// Returns an error if staging allocation or the payload write fails.
    ///
    /// # Panics
    ///
    /// Panics if called after `finish_frame`.
    pub fn upload_buffer(
        &mut self,
        dst: Arc<Buffer>,
        offset: vk::DeviceSize,
        source: UploadSource,
    ) -> GraphResult<()> {
        assert_ne!(
            self.status,
            FrameStatus::FrameFinished,
            "upload_buffer is not legal after finish_frame"
        );

        if source.is_empty() {
            return Ok(());
        }

        if dst.is_host_visible() {
            source.write_into(&dst, offset)?;
            return Ok(());
        }

        let size = source.len() as vk::DeviceSize;
        let staging = Buffer::new(self.device.clone(), BufferUsage::Staging, size)?;
        source.write_into(&staging, 0)?;

        trace!("Staged {} byte buffer upload", size);

        self.commands.push(Command::Copy {
            src: Arc::new(staging),
            dst,
            regions: vec![vk::BufferCopy {
                src_offset: 0,
                dst_offset: offset,
                size,
            }],
        });

        Ok(())
    }

    /// Stages an image upload.
    ///
    /// The payload must hold the whole image, tightly packed. A staging
    /// buffer is allocated and filled now; the buffer-to-image copy (with
    /// its layout transitions) is enqueued for the next flush.
    ///
    /// # Errors
    ///
    /// Returns an error if staging allocation or the payload write fails;
    /// on error nothing is enqueued.
    ///
    /// # Panics
    ///
    /// Panics if called after `finish_frame`.
    pub fn upload_image(
        &mut self,
        dst: Arc<Image>,
        source: UploadSource,
        final_layout: Option<vk::ImageLayout>,
    ) -> GraphResult<()> {
        assert_ne!(
            self.status,
            FrameStatus::FrameFinished,
            "upload_image is not legal after finish_frame"
        );

        if source.is_empty() {
            return Ok(());
        }

        let size = source.len() as vk::DeviceSize;
        let staging = Buffer::new(self.device.clone(), BufferUsage::Staging, size)?;
        source.write_into(&staging, 0)?;

        trace!("Staged {} byte image upload", size);

        self.commands.push(Command::CopyImage {
            src: Arc::new(staging),
            dst,
            final_layout,
        });

        Ok(())
    }

    /// Enqueues a readback of `size` bytes from `src` at `offset`.
    ///
    /// A host-visible readback buffer is allocated and the copy into it is
    /// enqueued; the bytes become retrievable once the submitting frame's
    /// completion has been observed (see [`retrieve`](Self::retrieve)).
    ///
    /// # Errors
    ///
    /// Returns an error if the readback buffer cannot be allocated.
    ///
    /// # Panics
    ///
    /// Panics unless a frame is running (the copy must be recorded into a
    /// submittable frame for completion tracking to mean anything).
    pub fn download_buffer(
        &mut self,
        src: Arc<Buffer>,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> GraphResult<DownloadId> {
        assert_eq!(
            self.status,
            FrameStatus::FrameRunning,
            "download_buffer is only legal while a frame is running"
        );

        let readback = Arc::new(Buffer::new(
            self.device.clone(),
            BufferUsage::Readback,
            size,
        )?);

        self.commands.push(Command::Copy {
            src,
            dst: readback.clone(),
            regions: vec![vk::BufferCopy {
                src_offset: offset,
                dst_offset: 0,
                size,
            }],
        });

        let id = DownloadId(self.next_download_id);
        self.next_download_id += 1;
        self.downloads.insert(
            id,
            Download {
                buffer: readback,
                frame: self.frame_counter,
                ready: false,
            },
        );

        Ok(id)
    }

    /// True once a download's bytes can be retrieved.
    pub fn is_download_ready(&self, id: DownloadId) -> bool {
        self.downloads.get(&id).is_some_and(|d| d.ready)
    }

    /// Takes a finished download's bytes, or `None` while the GPU may
    /// still be writing them (or for an unknown id).
    ///
    /// # Errors
    ///
    /// Returns an error if reading the readback buffer fails.
    pub fn retrieve(&mut self, id: DownloadId) -> GraphResult<Option<Vec<u8>>> {
        let ready = self.downloads.get(&id).is_some_and(|d| d.ready);
        if !ready {
            return Ok(None);
        }

        let download = self.downloads.remove(&id).expect("checked above");
        let bytes = download
            .buffer
            .read_data(0, download.buffer.size() as usize)?;
        Ok(Some(bytes))
    }

    // =========================================================================
    // Binding state
    // =========================================================================

    /// Sets the pipeline layout that subsequent descriptor binds target.
    ///
    /// Must be called before any `bind_descriptor_set` /
    /// `acquire_descriptor_set` targeting that layout.
    pub fn bind(&mut self, layout: Arc<PipelineLayout>, bind_point: vk::PipelineBindPoint) {
        self.bound_layout = Some(layout);
        self.bound_bind_point = bind_point;
    }

    /// Enqueues a bind of an existing descriptor set at `index`.
    ///
    /// # Panics
    ///
    /// Panics if no pipeline layout is bound, or after `finish_frame`.
    pub fn bind_descriptor_set(&mut self, index: u32, set: vk::DescriptorSet) {
        let layout = self
            .bound_layout
            .clone()
            .expect("bind a pipeline layout before binding descriptor sets");
        let bind_point = self.bound_bind_point;
        self.enqueue(Command::BindDescriptorSet {
            index,
            layout,
            set,
            bind_point,
        });
    }

    /// Acquires a fresh descriptor set for `index` of the bound layout and
    /// immediately enqueues its bind, returning the set for population.
    ///
    /// The set comes from the current frame slot's descriptor arena and is
    /// recycled automatically once this slot's fence has been observed
    /// again, giving per-draw binding without manual pool bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns an error if descriptor allocation fails.
    ///
    /// # Panics
    ///
    /// Panics if no frame is running, no pipeline layout is bound, or
    /// `index` is out of range for the bound layout.
    pub fn acquire_descriptor_set(&mut self, index: u32) -> GraphResult<vk::DescriptorSet> {
        assert_eq!(
            self.status,
            FrameStatus::FrameRunning,
            "acquire_descriptor_set is only legal while a frame is running"
        );
        let layout = self
            .bound_layout
            .clone()
            .expect("bind a pipeline layout before acquiring descriptor sets");
        let set_layout = &layout.set_layouts()[index as usize];

        let set = self.arena.acquire(self.frame_slot, set_layout)?;

        let bind_point = self.bound_bind_point;
        self.commands.push(Command::BindDescriptorSet {
            index,
            layout,
            set,
            bind_point,
        });

        Ok(set)
    }

    // =========================================================================
    // Frame loop
    // =========================================================================

    /// Starts a frame.
    ///
    /// Blocks on the current slot's fence (the sole backpressure point),
    /// acquires the next swapchain image, reclaims everything the slot's
    /// previous frame parked (retired resources, descriptor pools,
    /// finished downloads), then begins command buffer recording.
    ///
    /// A stale surface is reported as [`FrameAcquire::OutOfDate`] before
    /// any per-slot state is consumed: the fence stays signaled and no
    /// recording starts, so the caller can recreate the swapchain and call
    /// `begin_frame` again. Any other acquisition failure is an error.
    ///
    /// # Errors
    ///
    /// Returns an error on fence, acquisition (other than out-of-date), or
    /// command buffer failures.
    ///
    /// # Panics
    ///
    /// Panics if a frame is already running.
    pub fn begin_frame(&mut self) -> GraphResult<FrameAcquire> {
        assert_ne!(
            self.status,
            FrameStatus::FrameRunning,
            "begin_frame called while a frame is already running"
        );

        let slot = self.frame_slot;
        self.frames[slot].in_flight.wait(u64::MAX)?;

        // Acquire before consuming any slot state: bailing out here must
        // leave the fence signaled, or the next begin_frame on this slot
        // would wait forever on work that was never submitted.
        match self
            .swapchain
            .acquire_next_image(self.frames[slot].image_available.handle())
        {
            Ok((index, _suboptimal)) => {
                self.image_index = index;
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date during acquire");
                return Ok(FrameAcquire::OutOfDate);
            }
            Err(e) => return Err(e.into()),
        }

        // The slot's fence has been observed: everything its previous
        // frame referenced is reclaimable now.
        let released = self.retire.drain_slot(slot);
        if released > 0 {
            trace!("Released {} retired item(s) for slot {}", released, slot);
        }
        self.arena.reset_slot(slot)?;
        self.resolve_downloads();

        let frame = &self.frames[slot];
        frame.in_flight.reset()?;
        frame.command_buffer.reset()?;
        frame.command_buffer.begin()?;

        self.status = FrameStatus::FrameRunning;
        trace!(
            "Frame {} began (slot {}, image {})",
            self.frame_counter, slot, self.image_index
        );

        Ok(FrameAcquire::Ready)
    }

    /// Replays the pending command list into the current frame's command
    /// buffer, in enqueue order, and clears it.
    ///
    /// Each replayed command is parked in the slot's retire list so the
    /// resources it references outlive the frame on the GPU.
    ///
    /// # Panics
    ///
    /// Panics unless a frame is running.
    pub fn flush_commands(&mut self) {
        assert_eq!(
            self.status,
            FrameStatus::FrameRunning,
            "flush_commands is only legal while a frame is running"
        );

        let slot = self.frame_slot;
        let commands = std::mem::take(&mut self.commands);
        trace!("Flushing {} command(s)", commands.len());

        for command in commands {
            trace!("Replaying {}", command.name());
            replay(&self.frames[slot].command_buffer, &command);
            // The command's Arc references ride along until this slot's
            // fence is next observed.
            self.retire.park(slot, Box::new(command));
        }
    }

    /// Finishes the frame: flushes pending commands, ends recording,
    /// submits, and presents.
    ///
    /// The submit waits on the slot's image-available semaphore at the
    /// color-attachment stage and signals its render-finished semaphore
    /// plus its in-flight fence; the present waits on render-finished.
    ///
    /// Returns `true` when present reported the swapchain out of date or
    /// suboptimal. The frame was still submitted safely, but the
    /// swapchain should be recreated before the next one.
    ///
    /// # Errors
    ///
    /// Submission or presentation failures other than out-of-date are
    /// returned as errors and are unrecoverable: the frame's GPU work may
    /// be partially submitted and cannot be rolled back.
    ///
    /// # Panics
    ///
    /// Panics unless a frame is running.
    pub fn finish_frame(&mut self) -> GraphResult<bool> {
        assert_eq!(
            self.status,
            FrameStatus::FrameRunning,
            "finish_frame called without a running frame"
        );

        self.flush_commands();

        let slot = self.frame_slot;
        let frame = &self.frames[slot];
        frame.command_buffer.end()?;

        let wait_semaphores = [frame.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.command_buffer.handle()];
        let signal_semaphores = [frame.render_finished.handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .submit_graphics(&[submit_info], frame.in_flight.handle())?;
        }

        let present_queue = self
            .device
            .present_queue()
            .expect("render graph requires a present-capable device");

        let needs_recreate = match self.swapchain.present(
            present_queue,
            self.image_index,
            frame.render_finished.handle(),
        ) {
            Ok(suboptimal) => suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date during present");
                true
            }
            Err(vk::Result::SUBOPTIMAL_KHR) => {
                debug!("Swapchain suboptimal during present");
                true
            }
            Err(e) => return Err(e.into()),
        };

        trace!(
            "Frame {} submitted (slot {}, image {})",
            self.frame_counter, slot, self.image_index
        );

        self.frame_counter += 1;
        self.frame_slot = next_slot(self.frame_slot, MAX_FRAMES_IN_FLIGHT);
        self.bound_layout = None;
        self.bound_bind_point = vk::PipelineBindPoint::GRAPHICS;
        self.status = FrameStatus::FrameFinished;

        Ok(needs_recreate)
    }

    // =========================================================================
    // Swapchain recreation
    // =========================================================================

    /// Recreates the swapchain (after a resize or an out-of-date report)
    /// and rebuilds the default framebuffers on the new image views.
    ///
    /// Waits for all in-flight frames first; every retired resource is
    /// released in the process.
    ///
    /// # Errors
    ///
    /// Returns an error if recreation or framebuffer construction fails.
    ///
    /// # Panics
    ///
    /// Panics if a frame is running.
    pub fn recreate_swapchain(
        &mut self,
        instance: &Instance,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> GraphResult<()> {
        assert_ne!(
            self.status,
            FrameStatus::FrameRunning,
            "recreate_swapchain is not legal while a frame is running"
        );

        self.wait_all_frames()?;

        // Framebuffers reference the old image views; drop them before the
        // views go away, then rebuild on the new ones.
        self.default_framebuffers.clear();
        self.swapchain.recreate(instance, surface, width, height)?;
        self.default_framebuffers = build_default_framebuffers(
            &self.device,
            &self.swapchain,
            &self.default_render_pass,
        )?;

        info!(
            "Swapchain recreated: {}x{}, {} framebuffers rebuilt",
            self.swapchain.extent().width,
            self.swapchain.extent().height,
            self.default_framebuffers.len()
        );

        Ok(())
    }

    /// Waits for every in-flight frame, then releases all retired
    /// resources and marks downloads from submitted frames ready.
    ///
    /// Useful before teardown and around swapchain recreation.
    ///
    /// # Errors
    ///
    /// Returns an error if a fence wait fails.
    pub fn wait_all_frames(&mut self) -> GraphResult<()> {
        for frame in &self.frames {
            frame.in_flight.wait(u64::MAX)?;
        }

        let released = self.retire.drain_all();
        if released > 0 {
            debug!("Released {} retired item(s)", released);
        }

        // Only downloads from frames that were actually submitted are
        // complete; one recorded in a still-running frame is not.
        for download in self.downloads.values_mut() {
            if download.frame < self.frame_counter {
                download.ready = true;
            }
        }

        Ok(())
    }

    /// Parks a shared resource until the current slot's fence is next
    /// observed.
    ///
    /// Use this for resources referenced by work recorded through
    /// `current_command_buffer`, which the graph cannot track itself.
    pub fn defer_release(&mut self, resource: Arc<dyn Any + Send + Sync>) {
        self.retire.park(self.frame_slot, Box::new(resource));
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Current frame status.
    #[inline]
    pub fn status(&self) -> FrameStatus {
        self.status
    }

    /// Absolute number of finished frames.
    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_counter
    }

    /// Current frame slot, in `[0, MAX_FRAMES_IN_FLIGHT)`.
    #[inline]
    pub fn swap_frame_index(&self) -> usize {
        self.frame_slot
    }

    /// Swapchain image index from the last acquire.
    ///
    /// # Panics
    ///
    /// Panics before the first `begin_frame` (no image has been acquired).
    pub fn swap_image_index(&self) -> u32 {
        assert_ne!(
            self.status,
            FrameStatus::Init,
            "no swapchain image has been acquired yet"
        );
        self.image_index
    }

    /// The framebuffer for the currently acquired swapchain image.
    ///
    /// # Panics
    ///
    /// Panics before the first `begin_frame`.
    pub fn default_framebuffer(&self) -> &Arc<Framebuffer> {
        assert_ne!(
            self.status,
            FrameStatus::Init,
            "no swapchain image has been acquired yet"
        );
        &self.default_framebuffers[self.image_index as usize]
    }

    /// The render pass default framebuffers are bound to.
    #[inline]
    pub fn default_render_pass(&self) -> &Arc<RenderPass> {
        &self.default_render_pass
    }

    /// Escape hatch: the active frame's command buffer, for recording
    /// operations outside the [`Command`] set. Resources referenced this
    /// way should be parked with [`defer_release`](Self::defer_release).
    ///
    /// # Panics
    ///
    /// Panics unless a frame is running.
    pub fn current_command_buffer(&self) -> &CommandBuffer {
        assert_eq!(
            self.status,
            FrameStatus::FrameRunning,
            "current_command_buffer is only valid between begin_frame and finish_frame"
        );
        &self.frames[self.frame_slot].command_buffer
    }

    /// The owned swapchain.
    #[inline]
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// Number of commands waiting for the next flush.
    #[inline]
    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    /// Marks downloads whose frame is provably complete.
    ///
    /// Called right after a slot fence wait in `begin_frame`: every frame
    /// at least `MAX_FRAMES_IN_FLIGHT` behind the counter has had its
    /// fence observed by now.
    fn resolve_downloads(&mut self) {
        let current = self.frame_counter;
        for download in self.downloads.values_mut() {
            if !download.ready && download_complete(download.frame, current, MAX_FRAMES_IN_FLIGHT) {
                download.ready = true;
            }
        }
    }
}

impl Drop for RenderGraph {
    fn drop(&mut self) {
        // All slots must be idle before their command buffers, retired
        // resources, and the swapchain go away.
        if let Err(e) = self.wait_all_frames() {
            tracing::error!("Failed to wait for in-flight frames during drop: {:?}", e);
        }
        info!("Render graph destroyed after {} frame(s)", self.frame_counter);
    }
}

/// Builds one framebuffer per swapchain image view.
fn build_default_framebuffers(
    device: &Arc<Device>,
    swapchain: &Swapchain,
    render_pass: &Arc<RenderPass>,
) -> GraphResult<Vec<Arc<Framebuffer>>> {
    let mut framebuffers = Vec::with_capacity(swapchain.image_views().len());
    for view in swapchain.image_views() {
        let framebuffer = Framebuffer::new(
            device.clone(),
            vec![view.clone()],
            render_pass.clone(),
        )?;
        framebuffers.push(Arc::new(framebuffer));
    }
    Ok(framebuffers)
}

/// Records one command into a command buffer.
fn replay(cmd: &CommandBuffer, command: &Command) {
    match command {
        Command::Copy { src, dst, regions } => {
            // A readback copy may read what an earlier copy in this same
            // flush wrote; order it after prior transfer writes.
            if dst.usage() == BufferUsage::Readback {
                let barrier = vk::MemoryBarrier::default()
                    .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .dst_access_mask(vk::AccessFlags::TRANSFER_READ);
                cmd.memory_barrier(
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::TRANSFER,
                    &[barrier],
                );
            }
            cmd.copy_buffer(src.handle(), dst.handle(), regions);
        }
        Command::CopyImage {
            src,
            dst,
            final_layout,
        } => {
            let extent = dst.extent();
            let region = vk::BufferImageCopy::default()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .layer_count(1),
                )
                .image_extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                });

            let target_layout = final_layout.unwrap_or(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

            transition_image_layout(
                cmd,
                dst,
                dst.last_layout(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
            cmd.copy_buffer_to_image(
                src.handle(),
                dst.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
            transition_image_layout(
                cmd,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                target_layout,
            );
            dst.set_last_layout(target_layout);
        }
        Command::BindDescriptorSet {
            index,
            layout,
            set,
            bind_point,
        } => {
            cmd.bind_descriptor_sets(*bind_point, layout.handle(), *index, &[*set], &[]);
        }
        Command::BindVertexBuffers {
            first_binding,
            buffers,
            offsets,
        } => {
            let handles: Vec<vk::Buffer> = buffers.iter().map(|b| b.handle()).collect();
            cmd.bind_vertex_buffers(*first_binding, &handles, offsets);
        }
        Command::BindIndexBuffer {
            buffer,
            offset,
            index_type,
        } => {
            cmd.bind_index_buffer(buffer.handle(), *offset, *index_type);
        }
        Command::BindPipeline(pipeline) => {
            cmd.bind_pipeline(pipeline.bind_point(), pipeline.handle());
        }
        Command::Draw {
            first_vertex,
            first_instance,
            vertex_count,
            instance_count,
        } => {
            cmd.draw(*vertex_count, *instance_count, *first_vertex, *first_instance);
        }
        Command::DrawIndexed {
            first_index,
            first_instance,
            index_count,
            instance_count,
            vertex_offset,
        } => {
            cmd.draw_indexed(
                *index_count,
                *instance_count,
                *first_index,
                *vertex_offset,
                *first_instance,
            );
        }
        Command::BeginRenderPass {
            render_pass,
            framebuffer,
            render_area,
            clear_values,
        } => {
            let area = render_area.unwrap_or(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: framebuffer.extent(),
            });

            let begin_info = vk::RenderPassBeginInfo::default()
                .render_pass(render_pass.handle())
                .framebuffer(framebuffer.handle())
                .render_area(area)
                .clear_values(clear_values);

            cmd.begin_render_pass(&begin_info);
        }
        Command::EndRenderPass => {
            cmd.end_render_pass();
        }
    }
}

/// Records the barrier for an image layout transition.
///
/// Only the transitions the upload path produces are supported; anything
/// else is a usage bug.
fn transition_image_layout(
    cmd: &CommandBuffer,
    image: &Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let (src_access, dst_access, src_stage, dst_stage) = match (old_layout, new_layout) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::AccessFlags::SHADER_READ,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        _ => panic!(
            "unsupported image layout transition: {:?} -> {:?}",
            old_layout, new_layout
        ),
    };

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image.handle())
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .level_count(1)
                .layer_count(1),
        );

    cmd.pipeline_barrier(src_stage, dst_stage, &[barrier]);
}

/// Advances a frame slot index, wrapping at `num_slots`.
fn next_slot(slot: usize, num_slots: usize) -> usize {
    (slot + 1) % num_slots
}

/// Whether a frame's completion has been observed, given the current
/// absolute frame counter and the in-flight bound.
fn download_complete(submitted_frame: u64, current_frame: u64, num_slots: usize) -> bool {
    submitted_frame + num_slots as u64 <= current_frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_slot_cycles() {
        let n = MAX_FRAMES_IN_FLIGHT;
        let mut slot = 0;
        let mut seen = Vec::new();
        for _ in 0..(2 * n) {
            seen.push(slot);
            slot = next_slot(slot, n);
        }
        // Two full cycles through 0..n
        for (i, &s) in seen.iter().enumerate() {
            assert_eq!(s, i % n);
        }
        assert_eq!(slot, 0);
    }

    #[test]
    fn test_download_completion_respects_in_flight_bound() {
        let n = MAX_FRAMES_IN_FLIGHT;

        // A download from frame 0 is not complete until the counter has
        // advanced past the in-flight window.
        assert!(!download_complete(0, 0, n));
        assert!(!download_complete(0, n as u64 - 1, n));
        assert!(download_complete(0, n as u64, n));
        assert!(download_complete(0, n as u64 + 5, n));

        // Later frames shift the window accordingly.
        assert!(!download_complete(10, 10 + n as u64 - 1, n));
        assert!(download_complete(10, 10 + n as u64, n));
    }

    #[test]
    fn test_download_ids_are_hashable_and_distinct() {
        let a = DownloadId(0);
        let b = DownloadId(1);
        assert_ne!(a, b);

        let mut map = HashMap::new();
        map.insert(a, "first");
        map.insert(b, "second");
        assert_eq!(map[&a], "first");
        assert_eq!(map[&b], "second");
    }
}
