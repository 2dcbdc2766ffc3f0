//! Hooks connecting Vulkan's validation API to [`tracing`]

use crate::util::VkExtensionName;
use ash::vk;
use std::{
    borrow::Cow,
    ffi::CStr,
    os::raw::{c_char, c_void},
};
use tracing::{debug, error, trace, warn};

/// Returns true if Vulkan validation layers should be enabled.
///
/// Will always return true in builds where `debug_assertions` is enabled.
/// Otherwise, will only return true if the environment variable
/// `ENABLE_VULKAN_VALIDATION_LAYERS` is set.
#[inline]
pub(crate) fn should_enable_validation_layers() -> bool {
    cfg!(debug_assertions) || std::env::var("ENABLE_VULKAN_VALIDATION_LAYERS").is_ok()
}

/// The Vulkan validation layer bundle enabled when
/// [`should_enable_validation_layers()`] returns true.
pub(crate) const VALIDATION_LAYER: VkExtensionName =
    VkExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation\0");

/// Severities and message types forwarded to [`vk_debug_callback()`].
pub(crate) fn debug_messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXTBuilder<'static> {
    type Severity = vk::DebugUtilsMessageSeverityFlagsEXT;
    type MsgType = vk::DebugUtilsMessageTypeFlagsEXT;

    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(Severity::VERBOSE | Severity::INFO | Severity::WARNING | Severity::ERROR)
        .message_type(MsgType::GENERAL | MsgType::VALIDATION | MsgType::PERFORMANCE)
        .pfn_user_callback(Some(vk_debug_callback))
}

/// Borrow a C string from the driver, or `fallback` if it is null.
///
/// # Safety
///
/// `ptr` must be null or point to a nul-terminated string that outlives the
/// returned value.
unsafe fn lossy_or<'a>(ptr: *const c_char, fallback: &'a str) -> Cow<'a, str> {
    if ptr.is_null() {
        Cow::Borrowed(fallback)
    } else {
        CStr::from_ptr(ptr).to_string_lossy()
    }
}

/// Called whenever a validation layer has a message to output.
pub(crate) extern "system" fn vk_debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    typ: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }

    let (message_id, message) = unsafe {
        let data = &*data;
        (
            lossy_or(data.p_message_id_name, "<undefined id>"),
            lossy_or(data.p_message, "<undefined message>"),
        )
    };

    if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        error!({"type" = ?typ, id = %message_id}, "{}", message);
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        warn!({"type" = ?typ, id = %message_id}, "{}", message);
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
        debug!({"type" = ?typ, id = %message_id}, "{}", message);
    } else {
        trace!({"type" = ?typ, id = %message_id}, "{}", message);
    }

    vk::FALSE
}
