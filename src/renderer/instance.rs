//! Functions for creating Vulkan instances.

use super::validation::{debug_messenger_info, should_enable_validation_layers, VALIDATION_LAYER};
use crate::{
    app::AppData,
    util::{format_vk_version, VkExtensionName},
};
use ash::{extensions::ext as vk_ext, vk, Entry, Instance};
use color_eyre::{eyre::eyre, Result};
use std::{collections::HashSet, ffi::CStr};
use tracing::{debug, info};
use winit::window::Window;

/// Highest API version requested. Queries and dynamic state used by the
/// benchmark are all core 1.0, so older loaders are fine too.
const MAX_API_VERSION: u32 = vk::API_VERSION_1_2;

/// Create a Vulkan instance able to present to `window`.
///
/// Fails early, naming the missing piece, when the loader lacks a window
/// system extension or the requested validation layer.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_instance(
    window: &Window,
    entry: &Entry,
    data: &mut AppData,
) -> Result<Instance> {
    let validation_enabled = should_enable_validation_layers();

    let api_version = entry
        .try_enumerate_instance_version()?
        .unwrap_or(vk::API_VERSION_1_0)
        .min(MAX_API_VERSION);

    let app_name = CStr::from_bytes_with_nul(concat!(env!("CARGO_PKG_NAME"), "\0").as_bytes())?;
    let app_version = vk::make_api_version(
        0,
        env!("CARGO_PKG_VERSION_MAJOR").parse()?,
        env!("CARGO_PKG_VERSION_MINOR").parse()?,
        env!("CARGO_PKG_VERSION_PATCH").parse()?,
    );

    info!(
        api_version = %format_vk_version(api_version),
        validation_enabled,
        "Creating Vulkan instance"
    );

    let app_info = vk::ApplicationInfo::builder()
        .application_name(app_name)
        .application_version(app_version)
        .api_version(api_version);

    let mut extensions = Vec::from(ash_window::enumerate_required_extensions(&window)?);
    if validation_enabled {
        extensions.push(vk_ext::DebugUtils::name().as_ptr());
    }

    let available_extensions = entry
        .enumerate_instance_extension_properties(None)?
        .iter()
        .map(|e| VkExtensionName::from(e.extension_name))
        .collect::<HashSet<_>>();

    for name in extensions.iter().map(|p| VkExtensionName::from_cstr(CStr::from_ptr(*p))) {
        if !available_extensions.contains(&name) {
            return Err(eyre!("Instance extension {name:?} is not available"));
        }
        debug!(extension = ?name, "Enabling instance extension");
    }

    let layers = if validation_enabled {
        let available_layers = entry
            .enumerate_instance_layer_properties()?
            .iter()
            .map(|l| VkExtensionName::from(l.layer_name))
            .collect::<HashSet<_>>();

        if !available_layers.contains(&VALIDATION_LAYER) {
            return Err(eyre!(
                "Validation layer requested, but not supported by this platform"
            ));
        }

        debug!(layer = ?VALIDATION_LAYER, "Enabling validation layer");
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let mut instance_info = vk::InstanceCreateInfo::builder()
        .application_info(&app_info)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions);

    // Chained so instance creation and destruction are reported too.
    let mut debug_info = debug_messenger_info();
    if validation_enabled {
        instance_info = instance_info.push_next(&mut debug_info);
    }

    let instance = entry.create_instance(&instance_info, None)?;

    if validation_enabled {
        data.messenger = vk_ext::DebugUtils::new(entry, &instance)
            .create_debug_utils_messenger(&debug_info, None)?;
    }

    Ok(instance)
}
