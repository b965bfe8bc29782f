use ash::{ext::debug_utils, vk, Entry, Instance};
use std::borrow::Cow;
use std::ffi::CStr;

/// Routes validation layer output into `log`.
pub struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    /// Installs the messenger, or returns `None` when the entry points cannot be created.
    ///
    /// The messenger is optional: failing to set it up only costs diagnostics.
    pub fn new(entry: &Entry, instance: &Instance) -> Option<Self> {
        let loader = debug_utils::Instance::new(entry, instance);
        let create_info = messenger_create_info();

        match unsafe { loader.create_debug_utils_messenger(&create_info, None) } {
            Ok(messenger) => Some(Self { loader, messenger }),
            Err(err) => {
                log::warn!("Failed to set up debug messenger: {err}");
                None
            }
        }
    }
}

impl Drop for DebugMessenger {
    fn drop(&mut self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

/// Warnings and errors of every message type.
///
/// Also chained onto instance creation so that instance create/destroy is covered.
pub fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(vulkan_debug_callback))
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let message = if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        Cow::Borrowed("")
    } else {
        CStr::from_ptr((*p_callback_data).p_message).to_string_lossy()
    };

    let level = if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Info
    } else {
        log::Level::Debug
    };

    log::log!(target: "triframe::validation", level, "[{message_type:?}] {message}");

    vk::FALSE
}
