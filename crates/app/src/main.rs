//! Demo application for the framegraph renderer.
//!
//! Opens a window, brings up the Vulkan stack, and drives the render graph
//! frame loop: an animated clear through the default render pass, plus a
//! one-time buffer upload/download roundtrip as a transfer smoke check.

use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use framegraph_core::{AppConfig, FrameClock};
use framegraph_graph::{Command, DownloadId, FrameAcquire, RenderGraph, UploadSource};
use framegraph_platform::{Surface, Window};
use framegraph_rhi::buffer::{Buffer, BufferUsage};
use framegraph_rhi::device::Device;
use framegraph_rhi::instance::Instance;
use framegraph_rhi::physical_device::select_physical_device;
use framegraph_rhi::render_pass::RenderPass;
use framegraph_rhi::swapchain::{Swapchain, SwapchainSetup};

/// Pattern uploaded once and read back to verify the transfer path.
const SMOKE_PAYLOAD_LEN: usize = 64;

/// The Vulkan stack for one window.
///
/// Field order is destruction order: the graph (which owns the swapchain)
/// goes first, the surface before the instance it was created from.
struct Renderer {
    graph: RenderGraph,
    smoke_buffer: Option<Arc<Buffer>>,
    smoke_download: Option<DownloadId>,
    surface: Surface,
    device: Arc<Device>,
    instance: Instance,
}

impl Renderer {
    fn new(window: &Window, config: &AppConfig) -> Result<Self> {
        let surface_extensions = window.required_extensions()?;
        let instance = Instance::new(config.enable_validation, &surface_extensions)?;

        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let physical_device = select_physical_device(
            instance.handle(),
            Some((surface.loader(), surface.handle())),
        )?;
        let device = Device::new(&instance, &physical_device)?;

        let swapchain = Swapchain::new(
            &instance,
            device.clone(),
            surface.handle(),
            &SwapchainSetup::default(),
            window.width(),
            window.height(),
        )?;

        let render_pass = Arc::new(RenderPass::single_color(
            device.clone(),
            swapchain.format(),
            vk::ImageLayout::PRESENT_SRC_KHR,
        )?);

        let graph = RenderGraph::new(device.clone(), swapchain, render_pass)?;

        Ok(Self {
            graph,
            smoke_buffer: None,
            smoke_download: None,
            surface,
            device,
            instance,
        })
    }

    /// Records and submits one frame. Returns false if the surface went
    /// stale and the frame was skipped after recreation.
    fn render_frame(&mut self, window: &Window, elapsed: f32) -> Result<bool> {
        match self.graph.begin_frame()? {
            FrameAcquire::OutOfDate => {
                self.recreate(window)?;
                return Ok(false);
            }
            FrameAcquire::Ready => {}
        }

        self.run_smoke_check()?;

        // Slow color cycle so motion is visible
        let clear = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [
                    0.5 + 0.5 * (elapsed * 0.7).sin(),
                    0.5 + 0.5 * (elapsed * 0.9).sin(),
                    0.5 + 0.5 * (elapsed * 1.1).sin(),
                    1.0,
                ],
            },
        };

        self.graph.enqueue(Command::BeginRenderPass {
            render_pass: self.graph.default_render_pass().clone(),
            framebuffer: self.graph.default_framebuffer().clone(),
            render_area: None,
            clear_values: vec![clear],
        });
        self.graph.enqueue(Command::EndRenderPass);

        if self.graph.finish_frame()? {
            self.recreate(window)?;
        }

        Ok(true)
    }

    /// One-time upload/download roundtrip through the graph's staging path.
    fn run_smoke_check(&mut self) -> Result<()> {
        if self.smoke_buffer.is_none() {
            let payload: Vec<u8> = (0..SMOKE_PAYLOAD_LEN as u8).collect();
            let buffer = Arc::new(Buffer::new(
                self.device.clone(),
                BufferUsage::Storage,
                SMOKE_PAYLOAD_LEN as vk::DeviceSize,
            )?);

            self.graph
                .upload_buffer(buffer.clone(), 0, UploadSource::Bytes(payload))?;
            self.smoke_download = Some(self.graph.download_buffer(
                buffer.clone(),
                0,
                SMOKE_PAYLOAD_LEN as vk::DeviceSize,
            )?);
            self.smoke_buffer = Some(buffer);
            return Ok(());
        }

        if let Some(id) = self.smoke_download
            && let Some(bytes) = self.graph.retrieve(id)?
        {
            let expected: Vec<u8> = (0..SMOKE_PAYLOAD_LEN as u8).collect();
            if bytes == expected {
                info!("Transfer smoke check passed ({} bytes)", bytes.len());
            } else {
                warn!("Transfer smoke check mismatch");
            }
            self.smoke_download = None;
        }

        Ok(())
    }

    fn recreate(&mut self, window: &Window) -> Result<()> {
        self.graph.recreate_swapchain(
            &self.instance,
            self.surface.handle(),
            window.width(),
            window.height(),
        )?;
        Ok(())
    }
}

struct App {
    config: AppConfig,
    window: Option<Window>,
    renderer: Option<Renderer>,
    clock: FrameClock,
    pending_resize: bool,
}

impl App {
    fn new(config: AppConfig) -> Self {
        Self {
            config,
            window: None,
            renderer: None,
            clock: FrameClock::new(),
            pending_resize: false,
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            match Window::new(
                event_loop,
                self.config.width,
                self.config.height,
                &self.config.title,
            ) {
                Ok(window) => match Renderer::new(&window, &self.config) {
                    Ok(renderer) => {
                        info!("Initialization complete, entering main loop");
                        self.renderer = Some(renderer);
                        self.window = Some(window);
                    }
                    Err(e) => {
                        error!("Failed to create renderer: {:?}", e);
                        event_loop.exit();
                    }
                },
                Err(e) => {
                    error!("Failed to create window: {}", e);
                    event_loop.exit();
                }
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(ref mut window) = self.window {
                    window.resize(size.width, size.height);
                }
                self.pending_resize = true;
            }
            WindowEvent::RedrawRequested => {
                let (Some(window), Some(renderer)) = (&self.window, &mut self.renderer) else {
                    return;
                };

                if self.pending_resize {
                    self.pending_resize = false;
                    if let Err(e) = renderer.recreate(window) {
                        error!("Swapchain recreation failed: {:?}", e);
                        event_loop.exit();
                        return;
                    }
                }

                let elapsed = self.clock.elapsed().as_secs_f32();
                match renderer.render_frame(window, elapsed) {
                    Ok(presented) => {
                        if presented {
                            self.clock.tick();
                            if self.clock.frame_count() % 600 == 0 {
                                info!(
                                    "{} frames, {:.1} fps",
                                    self.clock.frame_count(),
                                    self.clock.fps()
                                );
                            }
                        }
                    }
                    Err(e) => {
                        error!("Render error: {:?}", e);
                        event_loop.exit();
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    framegraph_core::init_logging();
    info!("Starting framegraph demo");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(AppConfig::default());
    event_loop.run_app(&mut app)?;

    Ok(())
}
