//! Tools for creating, re-creating, and checking the capabilities of swapchains.

use super::devices::{PhysicalDeviceSuitabilityError, QueueFamilyIndices};
use crate::app::AppData;
use ash::{extensions::khr as vk_khr, vk, Device, Entry, Instance};
use color_eyre::Result;
use tracing::debug;
use winit::dpi::PhysicalSize;

use super::texture::create_image_view;

/// Create the swapchain for a window of the given size.
#[tracing::instrument(level = "DEBUG", skip(entry, instance, device, data))]
pub(crate) unsafe fn create_swapchain(
    window_size: PhysicalSize<u32>,
    entry: &Entry,
    instance: &Instance,
    device: &Device,
    data: &mut AppData,
) -> Result<()> {
    let indices = QueueFamilyIndices::get(entry, instance, data, data.physical_device)?;
    let swapchain_support = SwapchainSupport::get(entry, instance, data, data.physical_device)?;

    let surface_format = swapchain_support.get_preferred_surface_format();
    let present_mode = preferred_present_mode(&swapchain_support.present_modes);
    let extent = swapchain_support.get_swapchain_extent(window_size);

    // One more than the minimum so we rarely wait on the driver. A maximum of
    // 0 means there is no maximum.
    let mut image_count = swapchain_support.capabilities.min_image_count + 1;
    if swapchain_support.capabilities.max_image_count != 0
        && image_count > swapchain_support.capabilities.max_image_count
    {
        image_count = swapchain_support.capabilities.max_image_count;
    }

    // Sharing between distinct graphics and present queues is left to the
    // driver rather than transferring image ownership by hand.
    let mut queue_family_indices = Vec::new();
    let image_sharing_mode = if indices.graphics != indices.present {
        queue_family_indices.push(indices.graphics);
        queue_family_indices.push(indices.present);
        vk::SharingMode::CONCURRENT
    } else {
        vk::SharingMode::EXCLUSIVE
    };

    debug!(
        image_format = ?surface_format.format,
        image_color_space = ?surface_format.color_space,
        image_extent = ?extent,
        image_count,
        ?present_mode,
        ?image_sharing_mode,
        "Selected swapchain creation properties"
    );

    let info = vk::SwapchainCreateInfoKHR::builder()
        .surface(data.surface)
        .min_image_count(image_count)
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(image_sharing_mode)
        .queue_family_indices(&queue_family_indices)
        .pre_transform(swapchain_support.capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(vk::SwapchainKHR::null());

    let swapchain_ext = vk_khr::Swapchain::new(instance, device);
    data.swapchain = swapchain_ext.create_swapchain(&info, None)?;
    data.swapchain_images = swapchain_ext.get_swapchain_images(data.swapchain)?;
    data.swapchain_format = surface_format.format;
    data.swapchain_extent = extent;

    Ok(())
}

/// Create basic views to access parts of the swapchain images.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_swapchain_image_views(
    device: &Device,
    data: &mut AppData,
) -> Result<()> {
    debug!(
        count = data.swapchain_images.len(),
        "Creating swapchain image views"
    );

    data.swapchain_image_views = data
        .swapchain_images
        .iter()
        .map(|i| {
            create_image_view(
                device,
                *i,
                data.swapchain_format,
                vk::ImageAspectFlags::COLOR,
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(())
}

/// Prefer presenting without waiting for vertical blank, so frame times
/// measure the GPU rather than the display. FIFO is always available.
pub(crate) fn preferred_present_mode(available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX]
        .into_iter()
        .find(|m| available.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Stores the capabilities of a swapchain tied to a physical device. This allows
/// for checking if a swapchain is suitable for this application.
#[derive(Clone, Debug)]
pub(crate) struct SwapchainSupport {
    /// Basic surface capabilities, such as min/max number of images or min/max
    /// width and height of images.
    pub(crate) capabilities: vk::SurfaceCapabilitiesKHR,

    /// Surface formats, such as supported pixel formats or color spaces.
    pub(crate) formats: Vec<vk::SurfaceFormatKHR>,

    /// Available presentation modes
    pub(crate) present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    /// Get supported capabilites, formats, and present modes associated with
    /// swapchains created by a physical device.
    pub(crate) unsafe fn get(
        entry: &Entry,
        instance: &Instance,
        data: &AppData,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self, PhysicalDeviceSuitabilityError> {
        let surface_ext = vk_khr::Surface::new(entry, instance);

        Ok(Self {
            capabilities: surface_ext
                .get_physical_device_surface_capabilities(physical_device, data.surface)?,
            formats: surface_ext
                .get_physical_device_surface_formats(physical_device, data.surface)?,
            present_modes: surface_ext
                .get_physical_device_surface_present_modes(physical_device, data.surface)?,
        })
    }

    /// 8-bit BGRA sRGB if available, otherwise the first reported format.
    /// Callers must have checked that `formats` is non-empty.
    fn get_preferred_surface_format(&self) -> vk::SurfaceFormatKHR {
        self.formats
            .iter()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_SRGB
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| self.formats.first())
            .copied()
            .unwrap_or_default()
    }

    /// The surface's current extent, or the window size clamped to the
    /// supported range when the window manager lets us choose.
    fn get_swapchain_extent(&self, window_size: PhysicalSize<u32>) -> vk::Extent2D {
        let caps = &self.capabilities;
        if caps.current_extent.width != u32::MAX {
            caps.current_extent
        } else {
            vk::Extent2D {
                width: window_size
                    .width
                    .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
                height: window_size
                    .height
                    .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vk::PresentModeKHR as Mode;

    #[test]
    fn present_mode_preference() {
        assert_eq!(
            preferred_present_mode(&[Mode::FIFO, Mode::MAILBOX, Mode::IMMEDIATE]),
            Mode::IMMEDIATE
        );
        assert_eq!(preferred_present_mode(&[Mode::MAILBOX, Mode::FIFO]), Mode::MAILBOX);
        assert_eq!(preferred_present_mode(&[Mode::FIFO_RELAXED]), Mode::FIFO);
    }

    #[test]
    fn window_size_is_clamped_when_extent_is_free() {
        let support = SwapchainSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D {
                    width: 16,
                    height: 16,
                },
                max_image_extent: vk::Extent2D {
                    width: 800,
                    height: 4096,
                },
                ..Default::default()
            },
            formats: Vec::new(),
            present_modes: Vec::new(),
        };

        let extent = support.get_swapchain_extent(PhysicalSize::new(1024, 1024));
        assert_eq!((extent.width, extent.height), (800, 1024));
    }
}
