//! Functions for checking GPUs for support, and selecting from among them.
//!
//! The benchmark needs pipeline statistics queries, and a graphics queue that
//! can write timestamps.

use super::{
    extensions::REQUIRED_DEVICE_EXTENSIONS,
    queries::timestamp_mask,
    swapchain::SwapchainSupport,
    validation::{should_enable_validation_layers, VALIDATION_LAYER},
};
use crate::{
    app::AppData,
    util::{format_vk_version, PhysicalDeviceName, VkExtensionName},
};
use ash::{extensions::khr as vk_khr, vk, Device, Entry, Instance};
use color_eyre::{eyre::eyre, Result};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info};

/// For when a physical device does not satisfy some requirement of the application.
#[derive(Debug, Error)]
pub(crate) enum PhysicalDeviceSuitabilityError {
    #[error("Physical device is unsuitable: {0}")]
    Unsuitable(&'static str),
    #[error("Physical device is missing required extensions: {0}")]
    MissingExtensions(String),
    #[error("Error while querying physical device suitability: {0}")]
    VkError(#[from] vk::Result),
}

/// Picks a physical device to use for rendering.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn pick_physical_device(
    entry: &Entry,
    instance: &Instance,
    data: &mut AppData,
) -> Result<()> {
    let mut best: Option<(vk::PhysicalDevice, u32, PhysicalDeviceName, vk::PhysicalDeviceProperties)> =
        None;

    for physical_device in instance.enumerate_physical_devices()? {
        let properties = instance.get_physical_device_properties(physical_device);
        let device_name = PhysicalDeviceName::from(properties.device_name);

        match check_physical_device(entry, instance, data, physical_device) {
            Ok(score) if best.as_ref().map_or(true, |(_, s, _, _)| score > *s) => {
                best = Some((physical_device, score, device_name, properties));
            }
            Ok(score) => debug!(%device_name, score, "Passing over lower-scoring device"),
            Err(err) => debug!(%device_name, reason = %err, "Skipping physical device"),
        }
    }

    let (physical_device, _, device_name, properties) =
        best.ok_or_else(|| eyre!("Failed to find suitable physical device for rendering."))?;

    data.physical_device = physical_device;
    data.memory_properties = instance.get_physical_device_memory_properties(physical_device);
    data.timestamp_period = properties.limits.timestamp_period;

    info!(
        %device_name,
        device_id = properties.device_id,
        api_version = %format_vk_version(properties.api_version),
        driver_version = %format_vk_version(properties.driver_version),
        timestamp_period_ns = properties.limits.timestamp_period,
        "Selected physical device for rendering"
    );

    Ok(())
}

/// Check if a physical device satisfies all the requirements of this application.
/// Returns a score based on its properties and available features.
unsafe fn check_physical_device(
    entry: &Entry,
    instance: &Instance,
    data: &AppData,
    physical_device: vk::PhysicalDevice,
) -> Result<u32, PhysicalDeviceSuitabilityError> {
    let mut score = 0;

    let properties = instance.get_physical_device_properties(physical_device);
    match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => score += 200,
        vk::PhysicalDeviceType::INTEGRATED_GPU => score += 100,
        _ => {
            return Err(PhysicalDeviceSuitabilityError::Unsuitable(
                "Only discrete and integrated GPUs are supported",
            ))
        }
    }

    let features = instance.get_physical_device_features(physical_device);
    if features.pipeline_statistics_query != vk::TRUE {
        return Err(PhysicalDeviceSuitabilityError::Unsuitable(
            "Missing pipeline statistics query support",
        ));
    }

    if properties.limits.timestamp_period <= 0.0 {
        return Err(PhysicalDeviceSuitabilityError::Unsuitable(
            "Invalid timestamp period",
        ));
    }

    // Fails if there is no timestamp-capable graphics queue, or no queue that
    // can present to our surface.
    QueueFamilyIndices::get(entry, instance, data, physical_device)?;

    check_physical_device_extensions(instance, physical_device)?;

    // Swapchain support can only be queried once VK_KHR_swapchain is known to
    // be available, so this must come after the extension check.
    let swapchain_support = SwapchainSupport::get(entry, instance, data, physical_device)?;
    if swapchain_support.formats.is_empty() || swapchain_support.present_modes.is_empty() {
        return Err(PhysicalDeviceSuitabilityError::Unsuitable(
            "Insufficient swapchain support.",
        ));
    }

    Ok(score)
}

unsafe fn check_physical_device_extensions(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<(), PhysicalDeviceSuitabilityError> {
    let extensions = instance
        .enumerate_device_extension_properties(physical_device)?
        .into_iter()
        .map(|e| VkExtensionName::from(e.extension_name))
        .collect::<HashSet<_>>();

    let missing_extensions = REQUIRED_DEVICE_EXTENSIONS
        .iter()
        .filter(|ext| !extensions.contains(*ext))
        .map(|ext| ext.to_string_lossy())
        .collect::<Vec<_>>();

    if missing_extensions.is_empty() {
        Ok(())
    } else {
        Err(PhysicalDeviceSuitabilityError::MissingExtensions(
            missing_extensions.join(", "),
        ))
    }
}

/// Create a logical device for rendering from a physical device.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_logical_device(
    entry: &Entry,
    instance: &Instance,
    data: &mut AppData,
) -> Result<Device> {
    let qf_indices = QueueFamilyIndices::get(entry, instance, data, data.physical_device)?;

    let mut unique_qf_indices = HashSet::new();
    unique_qf_indices.insert(qf_indices.graphics);
    unique_qf_indices.insert(qf_indices.present);

    let queue_priorities = &[1.0];
    let queue_infos = unique_qf_indices
        .iter()
        .map(|i| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(*i)
                .queue_priorities(queue_priorities)
                .build()
        })
        .collect::<Vec<_>>();

    let layers = if should_enable_validation_layers() {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let features = vk::PhysicalDeviceFeatures::builder().pipeline_statistics_query(true);

    let extension_names = REQUIRED_DEVICE_EXTENSIONS
        .iter()
        .map(|ext| ext.as_ptr())
        .collect::<Vec<_>>();

    let info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_infos)
        .enabled_layer_names(&layers)
        .enabled_features(&features)
        .enabled_extension_names(&extension_names);

    let device = instance.create_device(data.physical_device, &info, None)?;
    data.graphics_queue = device.get_device_queue(qf_indices.graphics, 0);
    data.present_queue = device.get_device_queue(qf_indices.present, 0);
    data.timestamp_mask = timestamp_mask(qf_indices.timestamp_valid_bits);

    debug!(
        graphics_family = qf_indices.graphics,
        present_family = qf_indices.present,
        timestamp_valid_bits = qf_indices.timestamp_valid_bits,
        "Created logical device"
    );

    Ok(device)
}

/// Stores the indices of queue families to be used by this application.
#[derive(Copy, Clone, Debug)]
pub(crate) struct QueueFamilyIndices {
    pub(crate) graphics: u32,
    pub(crate) present: u32,
    /// Meaningful bits in timestamps written on the graphics queue.
    pub(crate) timestamp_valid_bits: u32,
}

impl QueueFamilyIndices {
    pub(crate) unsafe fn get(
        entry: &Entry,
        instance: &Instance,
        data: &AppData,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self, PhysicalDeviceSuitabilityError> {
        let properties = instance.get_physical_device_queue_family_properties(physical_device);

        let surface_ext = vk_khr::Surface::new(entry, instance);

        let mut graphics = None;
        let mut present = None;
        for (i, properties) in properties.iter().enumerate() {
            if graphics.is_none()
                && properties.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && properties.timestamp_valid_bits > 0
            {
                graphics = Some((i as u32, properties.timestamp_valid_bits));
            }

            if present.is_none()
                && surface_ext.get_physical_device_surface_support(
                    physical_device,
                    i as u32,
                    data.surface,
                )?
            {
                present = Some(i as u32);
            }

            if graphics.is_some() && present.is_some() {
                break;
            }
        }

        match (graphics, present) {
            (Some((graphics, timestamp_valid_bits)), Some(present)) => Ok(Self {
                graphics,
                present,
                timestamp_valid_bits,
            }),
            (None, _) => Err(PhysicalDeviceSuitabilityError::Unsuitable(
                "No graphics queue family supports timestamps",
            )),
            (_, None) => Err(PhysicalDeviceSuitabilityError::Unsuitable(
                "No queue family can present to the window surface",
            )),
        }
    }
}
