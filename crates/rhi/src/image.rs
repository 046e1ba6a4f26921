//! GPU image and image view management.
//!
//! This module handles 2D images and their views. Images either own their
//! memory (gpu-allocator backed, e.g. textures filled through the render
//! graph's upload path) or wrap external images whose memory belongs to
//! someone else (swapchain images).
//!
//! Each image tracks the layout it was last left in; the render graph's
//! image-copy replay uses this to emit the right layout transitions.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// GPU image wrapper.
///
/// Owns a `vk::Image` plus its allocation, or wraps an external image
/// (e.g. a swapchain image) that must not be destroyed here.
///
/// # Thread Safety
///
/// The layout tracking uses a relaxed atomic so images can be shared via
/// `Arc`; command recording itself is single-threaded.
pub struct Image {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan image handle.
    image: vk::Image,
    /// GPU memory allocation (`None` for external images).
    allocation: Option<Allocation>,
    /// Image format.
    format: vk::Format,
    /// Image extent.
    extent: vk::Extent2D,
    /// Whether the handle is owned by someone else (swapchain).
    external: bool,
    /// Layout the image was last transitioned to (raw `vk::ImageLayout`).
    last_layout: AtomicI32,
}

impl Image {
    /// Creates a new 2D device-local image.
    ///
    /// The image starts in `UNDEFINED` layout; the first upload through the
    /// render graph transitions it as needed.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `format` - Pixel format
    /// * `extent` - Image dimensions
    /// * `usage` - Vulkan usage flags (e.g. `SAMPLED | TRANSFER_DST`)
    ///
    /// # Errors
    ///
    /// Returns an error if image or memory allocation fails. No partially
    /// constructed image is ever returned.
    pub fn new(
        device: Arc<Device>,
        format: vk::Format,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
    ) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::InvalidHandle(
                "Image extent must be non-zero".to_string(),
            ));
        }

        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&create_info, None)? };

        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = {
            let mut allocator = device.allocator().lock().unwrap();
            match allocator.allocate(&AllocationCreateDesc {
                name: "image",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            }) {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { device.handle().destroy_image(image, None) };
                    return Err(e.into());
                }
            }
        };

        unsafe {
            device
                .handle()
                .bind_image_memory(image, allocation.memory(), allocation.offset())?;
        }

        debug!(
            "Created image: {}x{}, format {:?}",
            extent.width, extent.height, format
        );

        Ok(Self {
            device,
            image,
            allocation: Some(allocation),
            format,
            extent,
            external: false,
            last_layout: AtomicI32::new(vk::ImageLayout::UNDEFINED.as_raw()),
        })
    }

    /// Wraps an external image (e.g. a swapchain image).
    ///
    /// The handle and its memory remain owned by their creator; dropping
    /// the wrapper does not destroy them.
    pub fn external(
        device: Arc<Device>,
        image: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Self {
        Self {
            device,
            image,
            allocation: None,
            format,
            extent,
            external: true,
            last_layout: AtomicI32::new(vk::ImageLayout::UNDEFINED.as_raw()),
        }
    }

    /// Returns the Vulkan image handle.
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Returns the image format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the image extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Returns the layout the image was last transitioned to.
    #[inline]
    pub fn last_layout(&self) -> vk::ImageLayout {
        vk::ImageLayout::from_raw(self.last_layout.load(Ordering::Relaxed))
    }

    /// Records the layout the image was last transitioned to.
    ///
    /// Called by whoever records the transition; recording is single-threaded.
    #[inline]
    pub fn set_last_layout(&self, layout: vk::ImageLayout) {
        self.last_layout.store(layout.as_raw(), Ordering::Relaxed);
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            let mut allocator = self.device.allocator().lock().unwrap();
            if let Err(e) = allocator.free(allocation) {
                tracing::error!("Failed to free image allocation: {:?}", e);
            }
        }

        if !self.external {
            unsafe {
                self.device.handle().destroy_image(self.image, None);
            }
            debug!("Destroyed image");
        }
    }
}

/// Image view wrapper.
///
/// A view over a shared [`Image`], carrying the format and extent needed by
/// framebuffer construction. The view keeps its image alive.
pub struct ImageView {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan image view handle.
    view: vk::ImageView,
    /// The viewed image.
    image: Arc<Image>,
}

impl ImageView {
    /// Creates a 2D view over the whole image.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `image` - The image to view
    /// * `aspect` - Aspect to view (color or depth)
    ///
    /// # Errors
    ///
    /// Returns an error if view creation fails.
    pub fn new(
        device: Arc<Device>,
        image: Arc<Image>,
        aspect: vk::ImageAspectFlags,
    ) -> RhiResult<Self> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image.handle())
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(image.format())
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        let view = unsafe { device.handle().create_image_view(&create_info, None)? };

        Ok(Self {
            device,
            view,
            image,
        })
    }

    /// Returns the Vulkan image view handle.
    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }

    /// Returns the viewed image.
    #[inline]
    pub fn image(&self) -> &Arc<Image> {
        &self.image
    }

    /// Returns the format of the viewed image.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.image.format()
    }

    /// Returns the extent of the viewed image.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_image_view(self.view, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_is_send_sync() {
        // Compile-time check that Image is Send + Sync
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Image>();
    }

    #[test]
    fn test_image_view_is_send_sync() {
        // Compile-time check that ImageView is Send + Sync
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ImageView>();
    }
}
