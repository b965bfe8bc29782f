use ash::vk;
use winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use super::context::{ContextConfig, VulkanContext};
use super::error::RendererResult;
use super::frame::{AcquireOutcome, AcquiredImage};
use super::handles::PipelineLayout;
use super::pipeline::{create_pipeline_layout, GraphicsPipeline, PipelineConfig};
use super::render_context::RenderContext;
use super::swapchain::{Swapchain, SwapchainConfig};
use crate::config::RendererConfig;

/// SPIR-V for the two pipeline stages.
#[derive(Debug, Clone)]
pub struct ShaderCode {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

/// Draws the triangle: owns the context, the presentation engine and the pipeline, and
/// rebuilds the last two whenever the surface changes.
pub struct Renderer {
    // Field order is teardown order; the context goes last.
    pipeline: Option<GraphicsPipeline>,
    pipeline_layout: PipelineLayout,
    swapchain: Option<Swapchain>,
    command_buffers: Vec<vk::CommandBuffer>,
    context: VulkanContext,
    shaders: ShaderCode,
    swapchain_config: SwapchainConfig,
    clear_color: [f32; 4],
    window_extent: vk::Extent2D,
    resize_pending: bool,
}

impl Renderer {
    pub fn new<W>(
        window: &W,
        width: u32,
        height: u32,
        config: &RendererConfig,
        shaders: ShaderCode,
    ) -> RendererResult<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let window_extent = vk::Extent2D { width, height };
        let context = VulkanContext::new(window, ContextConfig::from(config))?;
        let swapchain_config = SwapchainConfig::from(config);

        let pipeline_layout = create_pipeline_layout(context.device())?;
        let swapchain = Swapchain::new(&context, window_extent, swapchain_config)?;
        let pipeline = build_pipeline(&context, &swapchain, &pipeline_layout, &shaders)?;

        let command_buffers = context
            .command_pool()
            .allocate_buffers(swapchain.frames_in_flight() as u32)?;

        Ok(Self {
            pipeline: Some(pipeline),
            pipeline_layout,
            swapchain: Some(swapchain),
            command_buffers,
            context,
            shaders,
            swapchain_config,
            clear_color: config.clear_color,
            window_extent,
            resize_pending: false,
        })
    }

    pub fn context(&self) -> &VulkanContext {
        &self.context
    }

    /// `None` only while paused or after a failed rebuild.
    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }

    /// Records the new window size; the swapchain is rebuilt before the next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        let extent = vk::Extent2D { width, height };
        if extent != self.window_extent {
            log::debug!("Window resized to {width}x{height}");
        }
        self.window_extent = extent;
        self.resize_pending = true;
    }

    /// A minimized window has no drawable area.
    pub fn is_paused(&self) -> bool {
        self.window_extent.width == 0 || self.window_extent.height == 0
    }

    pub fn draw_frame(&mut self) -> RendererResult<()> {
        if self.is_paused() {
            return Ok(());
        }
        if self.resize_pending || self.swapchain.is_none() || self.pipeline.is_none() {
            self.recreate()?;
        }

        let (Some(swapchain), Some(pipeline)) = (self.swapchain.as_mut(), self.pipeline.as_ref())
        else {
            return Ok(());
        };

        let acquired = match swapchain.acquire_next_image()? {
            AcquireOutcome::Acquired(acquired) => acquired,
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date on acquire, skipping frame");
                return self.recreate();
            }
        };
        let suboptimal = acquired.is_suboptimal();

        let command_buffer = self.command_buffers[swapchain.current_frame().0];
        let recorded = record_frame(
            &self.context,
            swapchain,
            pipeline,
            command_buffer,
            &acquired,
            self.clear_color,
        );
        let command_buffer = match recorded {
            Ok(command_buffer) => command_buffer,
            Err(err) => {
                // The slot's acquire semaphore is now signaled with nothing to wait on it.
                self.resize_pending = true;
                return Err(err);
            }
        };

        let status = match swapchain.submit_and_present(command_buffer, acquired) {
            Ok(status) => status,
            Err(err) => {
                // The image may be stranded with its acquire semaphore still signaled.
                self.resize_pending = true;
                return Err(err);
            }
        };
        if suboptimal || status.needs_recreate() {
            log::debug!("Present returned {status} (acquire suboptimal: {suboptimal}), recreating");
            self.recreate()?;
        }

        Ok(())
    }

    /// Waits for the device, drops the presentation engine and pipeline, and builds both
    /// again for the current window size.
    pub fn recreate(&mut self) -> RendererResult<()> {
        self.context.wait_idle()?;
        self.pipeline = None;
        self.swapchain = None;

        if self.is_paused() {
            self.resize_pending = true;
            return Ok(());
        }

        let swapchain = Swapchain::new(&self.context, self.window_extent, self.swapchain_config)?;
        if swapchain.frames_in_flight() != self.command_buffers.len() {
            let stale = std::mem::take(&mut self.command_buffers);
            self.context.command_pool().free_buffers(&stale);
            self.command_buffers = self
                .context
                .command_pool()
                .allocate_buffers(swapchain.frames_in_flight() as u32)?;
        }
        let pipeline = build_pipeline(
            &self.context,
            &swapchain,
            &self.pipeline_layout,
            &self.shaders,
        )?;

        self.swapchain = Some(swapchain);
        self.pipeline = Some(pipeline);
        self.resize_pending = false;
        Ok(())
    }

    pub fn wait_idle(&self) -> RendererResult<()> {
        self.context.wait_idle()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(err) = self.context.wait_idle() {
            log::error!("Failed to wait for device idle during shutdown: {err}");
        }
        self.context.command_pool().free_buffers(&self.command_buffers);
    }
}

fn build_pipeline(
    context: &VulkanContext,
    swapchain: &Swapchain,
    layout: &PipelineLayout,
    shaders: &ShaderCode,
) -> RendererResult<GraphicsPipeline> {
    GraphicsPipeline::build(
        context.device(),
        &PipelineConfig::new(swapchain.extent()),
        layout.handle(),
        swapchain.render_pass(),
        &shaders.vertex,
        &shaders.fragment,
        0,
    )
}

fn record_frame(
    context: &VulkanContext,
    swapchain: &Swapchain,
    pipeline: &GraphicsPipeline,
    command_buffer: vk::CommandBuffer,
    acquired: &AcquiredImage,
    clear_color: [f32; 4],
) -> RendererResult<vk::CommandBuffer> {
    let ctx = RenderContext::begin(context.device(), command_buffer, swapchain.extent())?;
    ctx.begin_render_pass(
        swapchain.render_pass(),
        swapchain.framebuffer(acquired.index()),
        clear_color,
    );
    ctx.bind_pipeline(pipeline);
    ctx.draw(3, 1, 0, 0);
    ctx.end_render_pass();
    ctx.finish()
}
