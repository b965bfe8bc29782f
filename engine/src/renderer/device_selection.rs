//! Physical device suitability checks, kept free of live Vulkan calls so they can be tested.

use ash::vk;
use std::ffi::CStr;
use std::os::raw::c_char;

/// Device extensions every candidate must expose.
pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [ash::khr::swapchain::NAME];

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Walks the families in order, recording the latest graphics-capable and the latest
    /// present-capable family, and stops as soon as both are known.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> bool,
    ) -> Self {
        let mut indices = Self::default();

        for (family_index, family) in families.iter().enumerate() {
            let family_index = family_index as u32;
            if family.queue_count == 0 {
                continue;
            }
            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics = Some(family_index);
            }
            if supports_present(family_index) {
                indices.present = Some(family_index);
            }
            if indices.is_complete() {
                break;
            }
        }

        indices
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// `(graphics, present)` once both are known.
    pub fn resolved(&self) -> Option<(u32, u32)> {
        Some((self.graphics?, self.present?))
    }

    /// The distinct families to create queues on.
    pub fn unique(&self) -> Vec<u32> {
        let mut families: Vec<u32> = self.graphics.into_iter().chain(self.present).collect();
        families.dedup();
        families
    }
}

/// Everything device selection needs to know about one physical device.
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub name: String,
    pub queue_families: QueueFamilyIndices,
    pub missing_extensions: Vec<String>,
    pub surface_adequate: bool,
    pub sampler_anisotropy: bool,
}

impl DeviceCandidate {
    pub fn is_suitable(&self) -> bool {
        self.queue_families.is_complete()
            && self.missing_extensions.is_empty()
            && self.surface_adequate
            && self.sampler_anisotropy
    }
}

/// Names from `required` that do not appear in `available`.
pub fn missing_names(required: &[&CStr], available: &[String]) -> Vec<String> {
    required
        .iter()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !available.iter().any(|have| have == name))
        .collect()
}

/// Converts a fixed-size, NUL-terminated Vulkan name into an owned string.
pub fn vk_to_string(raw_string_array: &[c_char]) -> String {
    let bytes: Vec<u8> = raw_string_array
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}
