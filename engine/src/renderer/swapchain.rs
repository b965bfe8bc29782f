use ash::{khr, vk, Device};
use std::sync::Arc;

use super::buffer_utils::GpuImage;
use super::context::VulkanContext;
use super::error::{RendererError, RendererResult};
use super::frame::{
    AcquireOutcome, AcquiredImage, FrameBackend, FramePacer, FrameSlotIndex, ImageIndex,
    PresentStatus,
};
use super::handles::{Framebuffer, ImageView, RenderPass};
use super::render_pass::create_present_render_pass;
use super::surface;
use super::sync::FrameSynchronizer;
use crate::config::RendererConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainConfig {
    pub frames_in_flight: usize,
    /// Bound on fence waits and image acquisition; `u64::MAX` waits forever.
    pub timeout_ns: u64,
}

impl From<&RendererConfig> for SwapchainConfig {
    fn from(config: &RendererConfig) -> Self {
        Self {
            frames_in_flight: config.frames_in_flight,
            timeout_ns: config.wait_timeout(),
        }
    }
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            timeout_ns: u64::MAX,
        }
    }
}

/// Per-image attachments. Fields drop in order: framebuffer, then the views, then depth memory.
struct SwapchainImage {
    framebuffer: Framebuffer,
    _color_view: ImageView,
    _depth_view: ImageView,
    _depth: GpuImage,
}

/// The swapchain handle plus the queues frames are submitted and presented on.
struct VulkanFrameBackend {
    device: Arc<Device>,
    loader: khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
}

impl FrameBackend for VulkanFrameBackend {
    fn wait_for_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> Result<(), vk::Result> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) }
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> Result<(), vk::Result> {
        unsafe { self.device.reset_fences(&[fence]) }
    }

    fn acquire_next_image(
        &mut self,
        signal: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.loader
                .acquire_next_image(self.swapchain, timeout_ns, signal, vk::Fence::null())
        }
    }

    fn submit(
        &mut self,
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<(), vk::Result> {
        let wait_semaphores = [wait];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [signal];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], fence)
        }
    }

    fn present(&mut self, wait: vk::Semaphore, image: u32) -> Result<bool, vk::Result> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain];
        let image_indices = [image];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.loader.queue_present(self.present_queue, &present_info) }
    }
}

impl Drop for VulkanFrameBackend {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// The presentation engine: swapchain images with their depth buffers and framebuffers, the
/// render pass they are compatible with, and frames-in-flight pacing over them.
///
/// Built against one extent. When the surface changes, drop it and build a new one.
pub struct Swapchain {
    pacer: FramePacer,
    images: Vec<SwapchainImage>,
    render_pass: RenderPass,
    sync: FrameSynchronizer,
    backend: VulkanFrameBackend,
    format: vk::Format,
    depth_format: vk::Format,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    pub fn new(
        context: &VulkanContext,
        window_extent: vk::Extent2D,
        config: SwapchainConfig,
    ) -> RendererResult<Self> {
        let device = context.device();
        let support = context.query_surface_support()?;

        let surface_format = surface::choose_surface_format(&support.formats)
            .ok_or(RendererError::Vulkan(vk::Result::ERROR_FORMAT_NOT_SUPPORTED))?;
        let present_mode = surface::choose_present_mode(&support.present_modes);
        let extent = surface::choose_extent(&support.capabilities, window_extent);
        let image_count = surface::choose_image_count(&support.capabilities);

        let (graphics_family, present_family) = context.queue_family_indices();
        let queue_family_indices = [graphics_family, present_family];

        let mut swapchain_create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(context.surface())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        swapchain_create_info = if graphics_family != present_family {
            swapchain_create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_family_indices)
        } else {
            swapchain_create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let loader = khr::swapchain::Device::new(context.instance(), device);
        let swapchain = unsafe {
            loader
                .create_swapchain(&swapchain_create_info, None)
                .map_err(|err| RendererError::creating("swapchain")(err.into()))?
        };
        let backend = VulkanFrameBackend {
            device: device.clone(),
            loader,
            swapchain,
            graphics_queue: context.graphics_queue(),
            present_queue: context.present_queue(),
        };

        let raw_images = unsafe { backend.loader.get_swapchain_images(swapchain)? };

        let depth_format = context.find_depth_format()?;
        let render_pass = create_present_render_pass(device, surface_format.format, depth_format)
            .map_err(RendererError::creating("render pass"))?;

        let images = raw_images
            .iter()
            .map(|&image| {
                create_swapchain_image(
                    context,
                    image,
                    surface_format.format,
                    depth_format,
                    extent,
                    render_pass.handle(),
                )
            })
            .collect::<RendererResult<Vec<_>>>()?;

        let frames_in_flight = config.frames_in_flight.max(1);
        let sync = FrameSynchronizer::new(device, frames_in_flight)
            .map_err(RendererError::creating("frame synchronization objects"))?;
        let pacer = FramePacer::new(sync.slots(), images.len(), config.timeout_ns);

        log::info!(
            "Swapchain created: {}x{} {:?} {:?}, {} images, {} frames in flight",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            images.len(),
            frames_in_flight
        );

        Ok(Self {
            pacer,
            images,
            render_pass,
            sync,
            backend,
            format: surface_format.format,
            depth_format,
            extent,
            present_mode,
        })
    }

    /// Waits for the current frame slot, then acquires the next presentable image.
    ///
    /// A suboptimal image is still returned as `Acquired`; the caller can render and present
    /// it and recreate afterwards.
    pub fn acquire_next_image(&mut self) -> RendererResult<AcquireOutcome> {
        self.pacer.acquire_next_image(&mut self.backend)
    }

    /// Submits the frame's commands and presents the image, then moves to the next slot.
    pub fn submit_and_present(
        &mut self,
        command_buffer: vk::CommandBuffer,
        acquired: AcquiredImage,
    ) -> RendererResult<PresentStatus> {
        self.pacer
            .submit_and_present(&mut self.backend, command_buffer, acquired)
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.handle()
    }

    pub fn framebuffer(&self, image: ImageIndex) -> vk::Framebuffer {
        self.images[image.as_usize()].framebuffer.handle()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.sync.frames_in_flight()
    }

    pub fn current_frame(&self) -> FrameSlotIndex {
        self.pacer.current_frame()
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn extent_aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height as f32
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.backend.swapchain
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        // Images and framebuffers may still be referenced by queued work.
        unsafe {
            let _ = self.backend.device.device_wait_idle();
        }
    }
}

fn create_swapchain_image(
    context: &VulkanContext,
    image: vk::Image,
    color_format: vk::Format,
    depth_format: vk::Format,
    extent: vk::Extent2D,
    render_pass: vk::RenderPass,
) -> RendererResult<SwapchainImage> {
    let device = context.device();

    let color_view = ImageView::new_2d(device, image, color_format, vk::ImageAspectFlags::COLOR)
        .map_err(|err| RendererError::creating("swapchain image view")(err.into()))?;

    let depth_image_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(depth_format)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);
    let depth = context.create_image_with_info(
        &depth_image_info,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;

    let depth_view = ImageView::new_2d(
        device,
        depth.handle(),
        depth_format,
        vk::ImageAspectFlags::DEPTH,
    )
    .map_err(|err| RendererError::creating("depth image view")(err.into()))?;

    let attachments = [color_view.handle(), depth_view.handle()];
    let framebuffer_info = vk::FramebufferCreateInfo::default()
        .render_pass(render_pass)
        .attachments(&attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);
    let framebuffer = unsafe {
        device
            .create_framebuffer(&framebuffer_info, None)
            .map_err(|err| RendererError::creating("framebuffer")(err.into()))?
    };

    Ok(SwapchainImage {
        framebuffer: Framebuffer::from_raw(device, framebuffer),
        _color_view: color_view,
        _depth_view: depth_view,
        _depth: depth,
    })
}
