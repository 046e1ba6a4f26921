//! Swapchain management.
//!
//! This module handles VkSwapchainKHR creation, image acquisition, and presentation.
//!
//! # Overview
//!
//! The [`Swapchain`] struct provides a safe abstraction over the Vulkan swapchain,
//! including:
//! - Point-in-time surface capability querying via [`SurfaceInfo`]
//! - Preference-driven format and present mode selection via [`SwapchainSetup`]
//! - Image view creation and management
//! - In-place recreation for resize / out-of-date handling
//!
//! Recreation tears down and rebuilds the image views; anything holding
//! references to the old views (framebuffers in particular) must be rebuilt
//! by its owner afterwards.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use framegraph_rhi::instance::Instance;
//! use framegraph_rhi::device::Device;
//! use framegraph_rhi::swapchain::{Swapchain, SwapchainSetup};
//!
//! // Assume instance, device, and surface are already created
//! // let swapchain = Swapchain::new(
//! //     &instance, device.clone(), surface, &SwapchainSetup::default(), 800, 600)?;
//!
//! // In render loop:
//! // let (image_index, suboptimal) = swapchain.acquire_next_image(semaphore)?;
//! // ... render to swapchain.image_view(image_index as usize) ...
//! // let needs_resize = swapchain.present(queue, image_index, render_finished)?;
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::RhiError;
use crate::image::{Image, ImageView};
use crate::instance::Instance;

/// Point-in-time surface support details.
///
/// Contains what the surface currently supports for swapchain creation.
/// Queried fresh on every call; capabilities change with window state, so
/// the result is never cached.
#[derive(Debug, Clone)]
pub struct SurfaceInfo {
    /// Surface capabilities (min/max image count, extents, transforms, etc.)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats (format and color space combinations)
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes (FIFO, MAILBOX, IMMEDIATE, etc.)
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceInfo {
    /// Queries surface support details for a physical device and surface.
    ///
    /// # Arguments
    ///
    /// * `physical_device` - The physical device to query
    /// * `surface` - The surface to query against
    /// * `surface_loader` - The surface extension loader
    ///
    /// # Errors
    ///
    /// Returns an error if any of the queries fail.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> Result<Self, RhiError> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Surface support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Checks if the surface support is adequate for rendering.
    ///
    /// Returns true if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Swapchain creation preferences.
///
/// Preferences are best-effort: the first preferred format found among the
/// surface's formats wins, else the surface's first format; the preferred
/// present mode is used only if supported, else FIFO (which the Vulkan spec
/// guarantees).
#[derive(Debug, Clone)]
pub struct SwapchainSetup {
    /// Formats to look for, in preference order.
    pub preferred_formats: Vec<vk::Format>,
    /// Present mode to use when the surface supports it.
    pub preferred_present_mode: vk::PresentModeKHR,
}

impl Default for SwapchainSetup {
    fn default() -> Self {
        Self {
            preferred_formats: vec![vk::Format::B8G8R8A8_SRGB, vk::Format::B8G8R8A8_UNORM],
            preferred_present_mode: vk::PresentModeKHR::MAILBOX,
        }
    }
}

/// Vulkan swapchain wrapper.
///
/// This struct manages the swapchain and its associated resources:
/// - Swapchain images (owned by the swapchain itself)
/// - Image views (one shared view per image)
///
/// # Thread Safety
///
/// The swapchain is not thread-safe. Only one thread should interact with
/// it at a time.
pub struct Swapchain {
    /// Reference to the logical device
    device: Arc<Device>,
    /// Swapchain extension loader
    swapchain_loader: ash::khr::swapchain::Device,
    /// Swapchain handle
    swapchain: vk::SwapchainKHR,
    /// Image views for the swapchain images
    image_views: Vec<Arc<ImageView>>,
    /// Creation preferences, kept for recreation
    setup: SwapchainSetup,
    /// Swapchain image format
    format: vk::Format,
    /// Swapchain color space
    color_space: vk::ColorSpaceKHR,
    /// Swapchain extent (resolution)
    extent: vk::Extent2D,
    /// Present mode
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Creates a new swapchain.
    ///
    /// Negotiates against the surface's current capabilities:
    /// - Image count of at least two (double buffering), preferring one more
    ///   than the surface minimum
    /// - The first format from `setup.preferred_formats` the surface offers,
    ///   else the surface's first format
    /// - `setup.preferred_present_mode` if supported, else FIFO
    ///
    /// # Arguments
    ///
    /// * `instance` - The Vulkan instance
    /// * `device` - The logical device
    /// * `surface` - The window surface
    /// * `setup` - Format/present-mode preferences
    /// * `width` - Desired swapchain width
    /// * `height` - Desired swapchain height
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Surface queries fail
    /// - No format or present mode is available at all
    /// - Swapchain or image view creation fails
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        setup: &SwapchainSetup,
        width: u32,
        height: u32,
    ) -> Result<Self, RhiError> {
        Self::create_internal(
            instance,
            device,
            surface,
            setup.clone(),
            width,
            height,
            vk::SwapchainKHR::null(),
        )
    }

    /// Creates a new swapchain, optionally reusing resources from an old one.
    ///
    /// This is the internal creation function that supports both initial creation
    /// and recreation for resize operations.
    fn create_internal(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        setup: SwapchainSetup,
        width: u32,
        height: u32,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<Self, RhiError> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        // Query surface support fresh
        let support = SurfaceInfo::query(device.physical_device(), surface, &surface_loader)?;

        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "Inadequate surface support (no formats or present modes)".to_string(),
            ));
        }

        // Select settings from the preferences
        let surface_format = choose_surface_format(&support.formats, &setup.preferred_formats);
        let present_mode = choose_present_mode(&support.present_modes, setup.preferred_present_mode);
        let extent = choose_extent(&support.capabilities, width, height);
        let image_count = determine_image_count(&support.capabilities);

        info!(
            "Creating swapchain: {}x{}, format {:?}, color space {:?}, present mode {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            surface_format.color_space,
            present_mode,
            image_count
        );

        // Handle queue family sharing
        let queue_families = device.queue_families();
        let graphics_family = queue_families.graphics_family.unwrap();
        let present_family = queue_families
            .present_family
            .ok_or_else(|| RhiError::SwapchainError("Device has no present queue".to_string()))?;
        let queue_family_indices = [graphics_family, present_family];

        let (sharing_mode, queue_family_indices_slice) = if graphics_family != present_family {
            debug!(
                "Using CONCURRENT sharing mode between graphics ({}) and present ({}) queues",
                graphics_family, present_family
            );
            (vk::SharingMode::CONCURRENT, queue_family_indices.as_slice())
        } else {
            debug!("Using EXCLUSIVE sharing mode (same queue family for graphics and present)");
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        // Create swapchain
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(queue_family_indices_slice)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None)? };

        // Get swapchain images and wrap each in an external image + view
        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain)? };
        info!("Swapchain created with {} images", images.len());

        let image_views = create_image_views(&device, &images, surface_format.format, extent)?;

        Ok(Self {
            device,
            swapchain_loader,
            swapchain,
            image_views,
            setup,
            format: surface_format.format,
            color_space: surface_format.color_space,
            extent,
            present_mode,
        })
    }

    /// Recreates the swapchain for a new window size.
    ///
    /// Call this when the window is resized or when `acquire_next_image` or
    /// `present` report that the swapchain is out of date. The old image
    /// views are released here; framebuffers built on them must be rebuilt
    /// by their owner after this returns, since they still reference the
    /// old views.
    ///
    /// # Arguments
    ///
    /// * `instance` - The Vulkan instance
    /// * `surface` - The window surface
    /// * `width` - New swapchain width
    /// * `height` - New swapchain height
    ///
    /// # Errors
    ///
    /// Returns an error if swapchain recreation fails.
    pub fn recreate(
        &mut self,
        instance: &Instance,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> Result<(), RhiError> {
        // Wait for device to be idle before recreating
        self.device.wait_idle()?;

        info!("Recreating swapchain for new size: {}x{}", width, height);

        // Drop old image views (images are owned by the swapchain)
        self.image_views.clear();

        // Create new swapchain with old swapchain handle for resource reuse
        let old_swapchain = self.swapchain;
        let mut new_swapchain = Self::create_internal(
            instance,
            self.device.clone(),
            surface,
            self.setup.clone(),
            width,
            height,
            old_swapchain,
        )?;

        // Destroy old swapchain
        unsafe {
            self.swapchain_loader.destroy_swapchain(old_swapchain, None);
        }

        // Move the new swapchain's state into self
        self.swapchain = new_swapchain.swapchain;
        self.image_views = std::mem::take(&mut new_swapchain.image_views);
        self.format = new_swapchain.format;
        self.color_space = new_swapchain.color_space;
        self.extent = new_swapchain.extent;
        self.present_mode = new_swapchain.present_mode;

        // Clear the new_swapchain's handle to prevent double-free in its Drop impl
        new_swapchain.swapchain = vk::SwapchainKHR::null();

        Ok(())
    }

    /// Acquires the next swapchain image for rendering.
    ///
    /// # Arguments
    ///
    /// * `semaphore` - Semaphore to signal when the image is available
    ///
    /// # Returns
    ///
    /// Returns a tuple of (image_index, suboptimal):
    /// - `image_index`: The index of the acquired image
    /// - `suboptimal`: True if the swapchain is suboptimal and should be recreated
    ///
    /// # Errors
    ///
    /// Returns an error if image acquisition fails. If the swapchain is out
    /// of date, `vk::Result::ERROR_OUT_OF_DATE_KHR` is returned and the
    /// caller should recreate the swapchain.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    /// Presents the rendered image to the screen.
    ///
    /// # Arguments
    ///
    /// * `queue` - The presentation queue
    /// * `image_index` - Index of the image to present (from `acquire_next_image`)
    /// * `wait_semaphore` - Semaphore to wait on before presenting
    ///
    /// # Returns
    ///
    /// Returns true if the swapchain is suboptimal and should be recreated.
    ///
    /// # Errors
    ///
    /// Returns an error if presentation fails. If the swapchain is out of date,
    /// `vk::Result::ERROR_OUT_OF_DATE_KHR` is returned.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
    }

    /// Returns the swapchain handle.
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Returns the swapchain image format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the swapchain color space.
    #[inline]
    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.color_space
    }

    /// Returns the swapchain extent (resolution).
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Returns the present mode.
    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Returns the number of swapchain images.
    #[inline]
    pub fn image_count(&self) -> u32 {
        self.image_views.len() as u32
    }

    /// Returns the image view at the given index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn image_view(&self, index: usize) -> &Arc<ImageView> {
        &self.image_views[index]
    }

    /// Returns all image views.
    #[inline]
    pub fn image_views(&self) -> &[Arc<ImageView>] {
        &self.image_views
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        // Drop image views first
        self.image_views.clear();

        // Destroy swapchain (images are destroyed automatically)
        // Skip if swapchain handle is null (e.g., after recreate moved resources)
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader
                    .destroy_swapchain(self.swapchain, None);
            }

            info!(
                "Swapchain destroyed (was {}x{})",
                self.extent.width, self.extent.height
            );
        }
    }
}

/// Chooses the surface format.
///
/// Picks the first format from the preference list the surface offers,
/// falling back to the surface's first format.
fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: &[vk::Format],
) -> vk::SurfaceFormatKHR {
    for &wanted in preferred {
        if let Some(&format) = formats.iter().find(|f| f.format == wanted) {
            debug!("Selected preferred surface format: {:?}", wanted);
            return format;
        }
    }

    warn!(
        "No preferred surface format available, using first: {:?}",
        formats[0].format
    );
    formats[0]
}

/// Chooses the present mode.
///
/// Uses the preferred mode only if the surface supports it; FIFO is the
/// fallback since the Vulkan spec guarantees its availability.
fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if present_modes.contains(&preferred) {
        debug!("Selected preferred present mode: {:?}", preferred);
        return preferred;
    }

    debug!(
        "Preferred present mode {:?} unsupported, falling back to FIFO",
        preferred
    );
    vk::PresentModeKHR::FIFO
}

/// Chooses the swapchain extent (resolution).
///
/// If the current extent is not set (width/height are u32::MAX),
/// clamps the requested size to the surface's min/max extents.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    // If current extent is defined, use it
    if capabilities.current_extent.width != u32::MAX {
        debug!(
            "Using current surface extent: {}x{}",
            capabilities.current_extent.width, capabilities.current_extent.height
        );
        return capabilities.current_extent;
    }

    // Otherwise, clamp the requested size to the surface's limits
    let extent = vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    };

    debug!(
        "Calculated extent: {}x{} (requested: {}x{})",
        extent.width, extent.height, width, height
    );

    extent
}

/// Determines the number of swapchain images.
///
/// At least double buffered: one more than the surface minimum, clamped to
/// the maximum when one is set.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = (capabilities.min_image_count + 1).max(2);

    // If max_image_count is 0, there's no maximum
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

/// Creates one external image + view per swapchain image.
fn create_image_views(
    device: &Arc<Device>,
    images: &[vk::Image],
    format: vk::Format,
    extent: vk::Extent2D,
) -> Result<Vec<Arc<ImageView>>, RhiError> {
    let mut image_views = Vec::with_capacity(images.len());

    for &image in images {
        let wrapped = Arc::new(Image::external(device.clone(), image, format, extent));
        let view = ImageView::new(device.clone(), wrapped, vk::ImageAspectFlags::COLOR)?;
        image_views.push(Arc::new(view));
    }

    debug!("Created {} swapchain image views", image_views.len());
    Ok(image_views)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_choose_surface_format_prefers_first_match() {
        let formats = vec![
            format(vk::Format::R8G8B8A8_UNORM),
            format(vk::Format::B8G8R8A8_SRGB),
            format(vk::Format::B8G8R8A8_UNORM),
        ];
        let preferred = [vk::Format::B8G8R8A8_SRGB, vk::Format::B8G8R8A8_UNORM];

        let selected = choose_surface_format(&formats, &preferred);
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_choose_surface_format_respects_preference_order() {
        // The second preference is available; the first is not.
        let formats = vec![
            format(vk::Format::R8G8B8A8_UNORM),
            format(vk::Format::B8G8R8A8_UNORM),
        ];
        let preferred = [vk::Format::B8G8R8A8_SRGB, vk::Format::B8G8R8A8_UNORM];

        let selected = choose_surface_format(&formats, &preferred);
        assert_eq!(selected.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn test_choose_surface_format_falls_back_to_first_available() {
        let formats = vec![format(vk::Format::R8G8B8A8_UNORM)];
        let preferred = [vk::Format::B8G8R8A8_SRGB];

        let selected = choose_surface_format(&formats, &preferred);
        assert_eq!(selected.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_choose_present_mode_prefers_requested() {
        let modes = vec![
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];

        let selected = choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX);
        assert_eq!(selected, vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn test_choose_present_mode_falls_back_to_fifo() {
        let modes = vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];

        let selected = choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX);
        assert_eq!(selected, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!(extent.width, 1920);
        assert_eq!(extent.height, 1080);
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        // Test clamping to max
        let extent = choose_extent(&capabilities, 3000, 3000);
        assert_eq!(extent.width, 2000);
        assert_eq!(extent.height, 2000);

        // Test clamping to min
        let extent = choose_extent(&capabilities, 50, 50);
        assert_eq!(extent.width, 100);
        assert_eq!(extent.height, 100);

        // Test within range
        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!(extent.width, 800);
        assert_eq!(extent.height, 600);
    }

    #[test]
    fn test_determine_image_count() {
        // Clamped by max
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 3);

        // Unclamped
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0, // 0 means no limit
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 3);

        // Never fewer than two (double buffering)
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 1,
            max_image_count: 0,
            ..Default::default()
        };
        assert!(determine_image_count(&capabilities) >= 2);
    }

    #[test]
    fn test_surface_info_is_adequate() {
        let adequate = SurfaceInfo {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(adequate.is_adequate());

        let no_formats = SurfaceInfo {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(!no_formats.is_adequate());

        let no_modes = SurfaceInfo {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![],
        };
        assert!(!no_modes.is_adequate());
    }
}
