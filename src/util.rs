//! Small helpers for juggling the fixed-size C strings Vulkan hands back.

use std::{
    ffi::CStr,
    fmt,
    hash::{Hash, Hasher},
    os::raw::c_char,
};

use ash::vk;

/// Owned copy of a Vulkan layer or extension name.
///
/// Vulkan reports names as `[c_char; 256]` arrays, and expects them back as
/// null-terminated pointers. This stores the bytes inline so the pointer stays
/// valid as long as the value does.
#[derive(Clone, Copy)]
pub struct VkExtensionName {
    bytes: [u8; vk::MAX_EXTENSION_NAME_SIZE],
}

impl VkExtensionName {
    /// Build a name from a null-terminated byte string. Bytes past the first
    /// null (or past the 255th byte) are ignored.
    pub const fn from_bytes(name: &[u8]) -> Self {
        let mut bytes = [0u8; vk::MAX_EXTENSION_NAME_SIZE];
        let mut i = 0;
        while i < name.len() && i < vk::MAX_EXTENSION_NAME_SIZE - 1 && name[i] != 0 {
            bytes[i] = name[i];
            i += 1;
        }
        Self { bytes }
    }

    pub fn from_cstr(name: &CStr) -> Self {
        Self::from_bytes(name.to_bytes())
    }

    fn len(&self) -> usize {
        self.bytes.iter().position(|b| *b == 0).unwrap_or(self.bytes.len())
    }

    pub fn as_ptr(&self) -> *const c_char {
        self.bytes.as_ptr().cast()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes[..self.len()]).into_owned()
    }
}

impl From<[c_char; vk::MAX_EXTENSION_NAME_SIZE]> for VkExtensionName {
    fn from(raw: [c_char; vk::MAX_EXTENSION_NAME_SIZE]) -> Self {
        let mut bytes = [0u8; vk::MAX_EXTENSION_NAME_SIZE];
        for (dst, src) in bytes.iter_mut().zip(raw.iter()).take(vk::MAX_EXTENSION_NAME_SIZE - 1) {
            *dst = *src as u8;
        }
        Self::from_bytes(&bytes)
    }
}

impl PartialEq for VkExtensionName {
    fn eq(&self, other: &Self) -> bool {
        self.bytes[..self.len()] == other.bytes[..other.len()]
    }
}

impl Eq for VkExtensionName {}

impl Hash for VkExtensionName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes[..self.len()].hash(state);
    }
}

impl fmt::Debug for VkExtensionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

impl fmt::Display for VkExtensionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

/// Human-readable name of a physical device, as reported in its properties.
#[derive(Clone, Debug)]
pub struct PhysicalDeviceName(String);

impl From<[c_char; vk::MAX_PHYSICAL_DEVICE_NAME_SIZE]> for PhysicalDeviceName {
    fn from(raw: [c_char; vk::MAX_PHYSICAL_DEVICE_NAME_SIZE]) -> Self {
        let bytes = raw
            .iter()
            .take_while(|c| **c != 0)
            .map(|c| *c as u8)
            .collect::<Vec<_>>();
        Self(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl fmt::Display for PhysicalDeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Format a packed Vulkan version number as `major.minor.patch`.
pub fn format_vk_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        vk::api_version_major(version),
        vk::api_version_minor(version),
        vk::api_version_patch(version)
    )
}
