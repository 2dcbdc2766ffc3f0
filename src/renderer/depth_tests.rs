//! The depth buffer shared by every pass.

use ash::{vk, Device, Instance};
use color_eyre::{eyre::eyre, Result};

use crate::app::AppData;

use super::texture::{create_image, create_image_view};

/// Create the depth image and its view, sized to the swapchain.
///
/// No layout transition is recorded here: the render pass starts the
/// attachment from `UNDEFINED` and clears it.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_depth_objects(device: &Device, data: &mut AppData) -> Result<()> {
    let (depth_image, depth_image_memory) = create_image(
        device,
        data,
        data.swapchain_extent.width,
        data.swapchain_extent.height,
        data.depth_format,
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
    )?;

    data.depth_image = depth_image;
    data.depth_image_memory = depth_image_memory;
    data.depth_image_view = create_image_view(
        device,
        data.depth_image,
        data.depth_format,
        vk::ImageAspectFlags::DEPTH,
    )?;

    Ok(())
}

/// Destroy the objects made by [`create_depth_objects()`].
pub(crate) unsafe fn destroy_depth_objects(device: &Device, data: &AppData) {
    device.destroy_image_view(data.depth_image_view, None);
    device.destroy_image(data.depth_image, None);
    device.free_memory(data.depth_image_memory, None);
}

/// Select a format with a depth component that supports usage as a depth
/// attachment.
pub(crate) unsafe fn get_depth_format(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<vk::Format> {
    const CANDIDATES: [vk::Format; 3] = [
        vk::Format::D32_SFLOAT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D24_UNORM_S8_UINT,
    ];

    CANDIDATES
        .into_iter()
        .find(|f| {
            instance
                .get_physical_device_format_properties(physical_device, *f)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or_else(|| eyre!("Failed to find a supported depth format"))
}
