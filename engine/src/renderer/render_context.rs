use ash::{vk, Device};

use super::command_pool::CommandPool;
use super::error::RendererResult;
use super::pipeline::GraphicsPipeline;

/// Command recording for one frame's primary command buffer.
pub struct RenderContext<'a> {
    device: &'a Device,
    cmd_buffer: vk::CommandBuffer,
    extent: vk::Extent2D,
}

impl<'a> RenderContext<'a> {
    /// Resets `cmd_buffer` and begins recording into it.
    ///
    /// The buffer must not be pending on the GPU, i.e. its frame slot's fence has been waited.
    pub fn begin(
        device: &'a Device,
        cmd_buffer: vk::CommandBuffer,
        extent: vk::Extent2D,
    ) -> RendererResult<Self> {
        unsafe {
            device.reset_command_buffer(cmd_buffer, vk::CommandBufferResetFlags::empty())?;
        }
        CommandPool::begin_recording(device, cmd_buffer)?;

        Ok(RenderContext {
            device,
            cmd_buffer,
            extent,
        })
    }

    /// Begin the render pass, clearing color to `clear_color` and depth to 1.0.
    pub fn begin_render_pass(
        &self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        clear_color: [f32; 4],
    ) {
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let render_pass_begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D::default().extent(self.extent))
            .clear_values(&clear_values);

        unsafe {
            self.device.cmd_begin_render_pass(
                self.cmd_buffer,
                &render_pass_begin_info,
                vk::SubpassContents::INLINE,
            );
        }
    }

    pub fn end_render_pass(&self) {
        unsafe {
            self.device.cmd_end_render_pass(self.cmd_buffer);
        }
    }

    pub fn bind_pipeline(&self, pipeline: &GraphicsPipeline) {
        pipeline.bind(self.device, self.cmd_buffer);
    }

    /// Draw vertices
    pub fn draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device.cmd_draw(
                self.cmd_buffer,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    /// Finish recording; the buffer is ready to submit.
    pub fn finish(self) -> RendererResult<vk::CommandBuffer> {
        CommandPool::end_recording(self.device, self.cmd_buffer)?;
        Ok(self.cmd_buffer)
    }
}
