use ash::{ext::debug_utils, khr, vk, Entry, Instance};
use std::ffi::CStr;
use std::os::raw::c_char;
use std::sync::Arc;
use winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use super::buffer_utils::{self, GpuBuffer, GpuImage};
use super::command_pool::{CommandPool, SingleUseCommands};
use super::debug::{self, DebugMessenger};
use super::device_selection::{
    missing_names, vk_to_string, DeviceCandidate, QueueFamilyIndices, REQUIRED_DEVICE_EXTENSIONS,
    VALIDATION_LAYER,
};
use super::error::{RendererError, RendererResult};
use super::surface::{self, SurfaceSupport};
use crate::config::RendererConfig;

/// Settings consumed while the context is being created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextConfig {
    /// Require `VK_LAYER_KHRONOS_validation` and route its output into `log`.
    pub enable_validation: bool,
}

impl From<&RendererConfig> for ContextConfig {
    fn from(config: &RendererConfig) -> Self {
        Self {
            enable_validation: config.enable_validation,
        }
    }
}

struct OwnedInstance(Instance);

impl Drop for OwnedInstance {
    fn drop(&mut self) {
        unsafe {
            self.0.destroy_instance(None);
        }
    }
}

struct OwnedSurface {
    loader: khr::surface::Instance,
    surface: vk::SurfaceKHR,
}

impl Drop for OwnedSurface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}

struct OwnedDevice(Arc<ash::Device>);

impl Drop for OwnedDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.0.device_wait_idle();
            self.0.destroy_device(None);
        }
    }
}

/// The process-wide accelerator context: instance, surface, logical device, queues and the
/// graphics command pool.
///
/// Everything created through it holds a clone of [`VulkanContext::device`] and must be
/// dropped before the context.
pub struct VulkanContext {
    // Field order is teardown order.
    command_pool: CommandPool,
    device: OwnedDevice,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    graphics_family: u32,
    present_family: u32,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    surface: OwnedSurface,
    debug_messenger: Option<DebugMessenger>,
    instance: OwnedInstance,
    entry: Entry,
}

impl VulkanContext {
    pub fn new<W>(window: &W, config: ContextConfig) -> RendererResult<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let entry = Entry::linked();
        let raw_display_handle = window.display_handle()?.as_raw();
        let raw_window_handle = window.window_handle()?.as_raw();

        if config.enable_validation {
            check_validation_layer_support(&entry)?;
        }

        let mut extension_names =
            ash_window::enumerate_required_extensions(raw_display_handle)?.to_vec();

        #[cfg(any(target_os = "macos", target_os = "ios"))]
        {
            extension_names.push(khr::portability_enumeration::NAME.as_ptr());
            extension_names.push(khr::get_physical_device_properties2::NAME.as_ptr());
        }

        let available_extensions = available_instance_extensions(&entry)?;
        check_required_instance_extensions(&extension_names, &available_extensions)?;

        let debug_utils_available = available_extensions
            .iter()
            .any(|name| name.as_str() == debug_utils::NAME.to_string_lossy());
        let install_messenger = config.enable_validation && debug_utils_available;
        if config.enable_validation && !debug_utils_available {
            log::warn!(
                "{} is not available; validation output will not be logged",
                debug_utils::NAME.to_string_lossy()
            );
        }
        if install_messenger {
            extension_names.push(debug_utils::NAME.as_ptr());
        }

        let instance = OwnedInstance(create_instance(
            &entry,
            &extension_names,
            config.enable_validation,
            install_messenger,
        )?);

        let debug_messenger = if install_messenger {
            DebugMessenger::new(&entry, &instance.0)
        } else {
            None
        };

        let surface_loader = khr::surface::Instance::new(&entry, &instance.0);
        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance.0,
                raw_display_handle,
                raw_window_handle,
                None,
            )?
        };
        let surface = OwnedSurface {
            loader: surface_loader,
            surface,
        };

        let (physical_device, queue_families) = pick_physical_device(&instance.0, &surface)?;
        let (graphics_family, present_family) = queue_families
            .resolved()
            .ok_or(RendererError::NoSuitableDevice)?;

        let properties = unsafe { instance.0.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.0.get_physical_device_memory_properties(physical_device) };
        log::info!(
            "Physical device: {} ({})",
            vk_to_string(&properties.device_name),
            device_type_name(properties.device_type)
        );

        let device = OwnedDevice(Arc::new(create_logical_device(
            &instance.0,
            physical_device,
            &queue_families,
            config.enable_validation,
        )?));

        let graphics_queue = unsafe { device.0.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.0.get_device_queue(present_family, 0) };
        log::debug!("Graphics queue: {graphics_queue:?} (family {graphics_family})");
        log::debug!("Present queue:  {present_queue:?} (family {present_family})");

        let command_pool = CommandPool::new(&device.0, graphics_family)
            .map_err(RendererError::creating("command pool"))?;

        Ok(Self {
            command_pool,
            device,
            graphics_queue,
            present_queue,
            graphics_family,
            present_family,
            physical_device,
            properties,
            memory_properties,
            surface,
            debug_messenger,
            instance,
            entry,
        })
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn instance(&self) -> &Instance {
        &self.instance.0
    }

    pub fn device(&self) -> &Arc<ash::Device> {
        &self.device.0
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface.surface
    }

    pub fn surface_loader(&self) -> &khr::surface::Instance {
        &self.surface.loader
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// `(graphics, present)` queue family indices; equal when one family does both.
    pub fn queue_family_indices(&self) -> (u32, u32) {
        (self.graphics_family, self.present_family)
    }

    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    pub fn has_debug_messenger(&self) -> bool {
        self.debug_messenger.is_some()
    }

    pub fn query_surface_support(&self) -> RendererResult<SurfaceSupport> {
        SurfaceSupport::query(&self.surface.loader, self.physical_device, self.surface.surface)
    }

    pub fn find_memory_type(
        &self,
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> RendererResult<u32> {
        buffer_utils::find_memory_type(&self.memory_properties, type_filter, properties)
    }

    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> RendererResult<GpuBuffer> {
        GpuBuffer::new(&self.device.0, &self.memory_properties, size, usage, properties)
            .map_err(RendererError::creating("buffer"))
    }

    pub fn create_image_with_info(
        &self,
        image_info: &vk::ImageCreateInfo<'_>,
        properties: vk::MemoryPropertyFlags,
    ) -> RendererResult<GpuImage> {
        GpuImage::new(&self.device.0, &self.memory_properties, image_info, properties)
            .map_err(RendererError::creating("image"))
    }

    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Option<vk::Format> {
        surface::find_supported_format(candidates, tiling, features, |format| unsafe {
            self.instance
                .0
                .get_physical_device_format_properties(self.physical_device, format)
        })
    }

    pub fn find_depth_format(&self) -> RendererResult<vk::Format> {
        surface::select_depth_format(|format| unsafe {
            self.instance
                .0
                .get_physical_device_format_properties(self.physical_device, format)
        })
    }

    /// Starts a blocking, setup-time command buffer on the graphics queue.
    pub fn begin_single_use_commands(&self) -> RendererResult<SingleUseCommands<'_>> {
        SingleUseCommands::begin(&self.device.0, &self.command_pool, self.graphics_queue)
    }

    /// Submits `commands`, waits for the graphics queue to go idle, and frees the buffer.
    pub fn end_single_use_commands(&self, commands: SingleUseCommands<'_>) -> RendererResult<()> {
        commands.end()
    }

    pub fn copy_buffer(
        &self,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) -> RendererResult<()> {
        let commands = self.begin_single_use_commands()?;
        let region = vk::BufferCopy::default().size(size);
        unsafe {
            self.device
                .0
                .cmd_copy_buffer(commands.command_buffer(), src, dst, &[region]);
        }
        self.end_single_use_commands(commands)
    }

    /// Copies tightly packed color data into an image already in `TRANSFER_DST_OPTIMAL`.
    pub fn copy_buffer_to_image(
        &self,
        buffer: vk::Buffer,
        image: vk::Image,
        width: u32,
        height: u32,
        layer_count: u32,
    ) -> RendererResult<()> {
        let commands = self.begin_single_use_commands()?;
        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(layer_count),
            )
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            });

        unsafe {
            self.device.0.cmd_copy_buffer_to_image(
                commands.command_buffer(),
                buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        self.end_single_use_commands(commands)
    }

    pub fn wait_idle(&self) -> RendererResult<()> {
        unsafe { self.device.0.device_wait_idle()? };
        Ok(())
    }
}

fn check_validation_layer_support(entry: &Entry) -> RendererResult<()> {
    let layers = unsafe { entry.enumerate_instance_layer_properties()? };
    let available: Vec<String> = layers
        .iter()
        .map(|layer| vk_to_string(&layer.layer_name))
        .collect();

    match missing_names(&[VALIDATION_LAYER], &available).into_iter().next() {
        Some(missing) => Err(RendererError::ValidationLayerUnavailable(missing)),
        None => Ok(()),
    }
}

fn available_instance_extensions(entry: &Entry) -> RendererResult<Vec<String>> {
    let extensions = unsafe { entry.enumerate_instance_extension_properties(None)? };
    Ok(extensions
        .iter()
        .map(|extension| vk_to_string(&extension.extension_name))
        .collect())
}

fn check_required_instance_extensions(
    required: &[*const c_char],
    available: &[String],
) -> RendererResult<()> {
    log::debug!("Available instance extensions: {}", available.join(", "));

    let required: Vec<&CStr> = required
        .iter()
        .map(|&name| unsafe { CStr::from_ptr(name) })
        .collect();
    log::debug!(
        "Required instance extensions: {}",
        required
            .iter()
            .map(|name| name.to_string_lossy())
            .collect::<Vec<_>>()
            .join(", ")
    );

    match missing_names(&required, available).into_iter().next() {
        Some(missing) => Err(RendererError::MissingInstanceExtension(missing)),
        None => Ok(()),
    }
}

fn create_instance(
    entry: &Entry,
    extension_names: &[*const c_char],
    enable_validation: bool,
    chain_messenger: bool,
) -> RendererResult<Instance> {
    let app_name = c"triframe";
    let appinfo = vk::ApplicationInfo::default()
        .application_name(app_name)
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(app_name)
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(vk::API_VERSION_1_0);

    let create_flags = if cfg!(any(target_os = "macos", target_os = "ios")) {
        vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
    } else {
        vk::InstanceCreateFlags::default()
    };

    let layer_names_raw: Vec<*const c_char> = if enable_validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let mut debug_info = debug::messenger_create_info();
    let mut create_info = vk::InstanceCreateInfo::default()
        .application_info(&appinfo)
        .enabled_layer_names(&layer_names_raw)
        .enabled_extension_names(extension_names)
        .flags(create_flags);
    if chain_messenger {
        create_info = create_info.push_next(&mut debug_info);
    }

    let instance = unsafe { entry.create_instance(&create_info, None)? };
    Ok(instance)
}

/// First device that satisfies every requirement, in enumeration order.
fn pick_physical_device(
    instance: &Instance,
    surface: &OwnedSurface,
) -> RendererResult<(vk::PhysicalDevice, QueueFamilyIndices)> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    log::info!("Device count: {}", devices.len());

    for pdevice in devices {
        let candidate = describe_device(instance, surface, pdevice)?;
        if candidate.is_suitable() {
            return Ok((pdevice, candidate.queue_families));
        }
        log::debug!("Skipping unsuitable device {candidate:?}");
    }

    Err(RendererError::NoSuitableDevice)
}

fn describe_device(
    instance: &Instance,
    surface: &OwnedSurface,
    pdevice: vk::PhysicalDevice,
) -> RendererResult<DeviceCandidate> {
    let props = unsafe { instance.get_physical_device_properties(pdevice) };
    let families = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };

    let queue_families = QueueFamilyIndices::find(&families, |family| unsafe {
        surface
            .loader
            .get_physical_device_surface_support(pdevice, family, surface.surface)
            .unwrap_or(false)
    });

    let extensions = unsafe { instance.enumerate_device_extension_properties(pdevice)? };
    let available: Vec<String> = extensions
        .iter()
        .map(|extension| vk_to_string(&extension.extension_name))
        .collect();
    let missing_extensions = missing_names(&REQUIRED_DEVICE_EXTENSIONS, &available);

    // Surface queries are only meaningful once the swapchain extension is known to exist.
    let surface_adequate = missing_extensions.is_empty()
        && SurfaceSupport::query(&surface.loader, pdevice, surface.surface)
            .map(|support| support.is_adequate())
            .unwrap_or(false);

    let features = unsafe { instance.get_physical_device_features(pdevice) };

    Ok(DeviceCandidate {
        name: vk_to_string(&props.device_name),
        queue_families,
        missing_extensions,
        surface_adequate,
        sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
    })
}

fn create_logical_device(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: &QueueFamilyIndices,
    enable_validation: bool,
) -> RendererResult<ash::Device> {
    let priorities = [1.0f32];
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
        .unique()
        .into_iter()
        .map(|family_index| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family_index)
                .queue_priorities(&priorities)
        })
        .collect();

    #[allow(unused_mut)]
    let mut device_extension_names_raw: Vec<*const c_char> = REQUIRED_DEVICE_EXTENSIONS
        .iter()
        .map(|name| name.as_ptr())
        .collect();
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    device_extension_names_raw.push(khr::portability_subset::NAME.as_ptr());

    let layer_names_raw: Vec<*const c_char> = if enable_validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

    // Device layers are ignored by current loaders but still honored by older ones.
    #[allow(deprecated)]
    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extension_names_raw)
        .enabled_layer_names(&layer_names_raw)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &device_create_info, None)? };
    Ok(device)
}

fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::CPU => "Cpu",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        _ => "Unknown",
    }
}
