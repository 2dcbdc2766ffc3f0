//! Required Vulkan extensions, and cached extension loaders.

use crate::util::VkExtensionName;
use ash::{
    extensions::{ext as vk_ext, khr as vk_khr},
    Device, Entry, Instance,
};
use lazy_static::lazy_static;

use super::validation::should_enable_validation_layers;

lazy_static! {
    /// Device extensions that are absolutely _required_. Don't put optional
    /// extensions into this list!
    pub(crate) static ref REQUIRED_DEVICE_EXTENSIONS: Vec<VkExtensionName> = [
        vk_khr::Swapchain::name()
    ]
        .into_iter()
        .map(VkExtensionName::from_cstr)
        .collect();
}

/// [`ash`] dynamically links to extensions, on the fly. This can be detrimental
/// to performance if done repeatedly (e.g. in a render loop), so the loaders
/// are created once and kept here.
#[derive(Clone)]
pub(crate) struct Extensions {
    pub(crate) surface: vk_khr::Surface,
    pub(crate) swapchain: vk_khr::Swapchain,
    /// Only loaded when validation layers are enabled.
    pub(crate) debug_utils: Option<vk_ext::DebugUtils>,
}

impl Extensions {
    pub(crate) fn load(entry: &Entry, instance: &Instance, device: &Device) -> Self {
        Self {
            surface: vk_khr::Surface::new(entry, instance),
            swapchain: vk_khr::Swapchain::new(instance, device),
            debug_utils: should_enable_validation_layers()
                .then(|| vk_ext::DebugUtils::new(entry, instance)),
        }
    }
}
