//! Owned wrappers for device-level handles.
//!
//! Each wrapper keeps the `Arc<ash::Device>` it was created from and destroys its handle on
//! drop, so a half-built resource set unwinds cleanly when a later creation step fails.

use ash::vk;
use std::sync::Arc;

macro_rules! device_handle {
    ($(#[$meta:meta])* $name:ident, $raw:ty, $destroy:ident) => {
        $(#[$meta])*
        pub struct $name {
            device: Arc<ash::Device>,
            handle: $raw,
        }

        impl $name {
            /// Takes ownership of `handle`; it is destroyed when this value drops.
            pub fn from_raw(device: &Arc<ash::Device>, handle: $raw) -> Self {
                Self {
                    device: device.clone(),
                    handle,
                }
            }

            #[inline]
            pub fn handle(&self) -> $raw {
                self.handle
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                unsafe {
                    self.device.$destroy(self.handle, None);
                }
            }
        }
    };
}

device_handle!(ImageView, vk::ImageView, destroy_image_view);
device_handle!(Framebuffer, vk::Framebuffer, destroy_framebuffer);
device_handle!(RenderPass, vk::RenderPass, destroy_render_pass);
device_handle!(ShaderModule, vk::ShaderModule, destroy_shader_module);
device_handle!(PipelineLayout, vk::PipelineLayout, destroy_pipeline_layout);
device_handle!(Pipeline, vk::Pipeline, destroy_pipeline);
device_handle!(
    /// GPU-to-GPU ordering primitive.
    Semaphore,
    vk::Semaphore,
    destroy_semaphore
);
device_handle!(
    /// GPU-to-CPU completion primitive.
    Fence,
    vk::Fence,
    destroy_fence
);

impl Semaphore {
    pub fn new(device: &Arc<ash::Device>) -> Result<Self, vk::Result> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.create_semaphore(&create_info, None)? };
        Ok(Self::from_raw(device, semaphore))
    }
}

impl Fence {
    pub fn new(device: &Arc<ash::Device>, signaled: bool) -> Result<Self, vk::Result> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.create_fence(&create_info, None)? };
        Ok(Self::from_raw(device, fence))
    }
}

impl ImageView {
    /// Single-mip, single-layer 2D view over `image`.
    pub fn new_2d(
        device: &Arc<ash::Device>,
        image: vk::Image,
        format: vk::Format,
        aspect_mask: vk::ImageAspectFlags,
    ) -> Result<Self, vk::Result> {
        let create_view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe { device.create_image_view(&create_view_info, None)? };
        Ok(Self::from_raw(device, view))
    }
}
