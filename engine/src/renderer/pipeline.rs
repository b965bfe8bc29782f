use ash::vk;
use std::sync::Arc;

use super::error::{RendererError, RendererResult};
use super::handles::{Pipeline, PipelineLayout, ShaderModule};
use super::shader::create_shader_module;

/// Fixed-function state for a [`GraphicsPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub viewport: vk::Viewport,
    pub scissor: vk::Rect2D,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub samples: vk::SampleCountFlags,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare_op: vk::CompareOp,
    pub enable_blending: bool,
}

impl PipelineConfig {
    /// Triangle lists filling a fixed viewport over `extent`, depth tested with `LESS`.
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            viewport: vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
            scissor: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::CLOCKWISE,
            samples: vk::SampleCountFlags::TYPE_1,
            depth_test: true,
            depth_write: true,
            depth_compare_op: vk::CompareOp::LESS,
            enable_blending: false,
        }
    }

    pub fn topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn cull_mode(mut self, mode: vk::CullModeFlags, front_face: vk::FrontFace) -> Self {
        self.cull_mode = mode;
        self.front_face = front_face;
        self
    }

    pub fn blending(mut self, enable: bool) -> Self {
        self.enable_blending = enable;
        self
    }
}

/// An empty layout: no descriptor sets, no push constants.
pub fn create_pipeline_layout(device: &Arc<ash::Device>) -> RendererResult<PipelineLayout> {
    let layout = unsafe {
        device.create_pipeline_layout(&vk::PipelineLayoutCreateInfo::default(), None)?
    };
    Ok(PipelineLayout::from_raw(device, layout))
}

/// A graphics pipeline together with the shader modules it was built from.
pub struct GraphicsPipeline {
    // Pipeline goes before the modules it references.
    pipeline: Pipeline,
    _vertex_module: ShaderModule,
    _fragment_module: ShaderModule,
}

impl GraphicsPipeline {
    /// `layout` and `render_pass` must be live handles on `device`.
    pub fn build(
        device: &Arc<ash::Device>,
        config: &PipelineConfig,
        layout: vk::PipelineLayout,
        render_pass: vk::RenderPass,
        vertex_spirv: &[u32],
        fragment_spirv: &[u32],
        subpass: u32,
    ) -> RendererResult<Self> {
        debug_assert!(
            layout != vk::PipelineLayout::null(),
            "cannot build a pipeline without a layout"
        );
        debug_assert!(
            render_pass != vk::RenderPass::null(),
            "cannot build a pipeline without a render pass"
        );

        let vertex_module = create_shader_module(device, vertex_spirv)?;
        let fragment_module = create_shader_module(device, fragment_spirv)?;

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module.handle())
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module.handle())
                .name(c"main"),
        ];

        // Vertices are generated in the vertex shader.
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default();

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(config.topology)
            .primitive_restart_enable(false);

        let viewports = [config.viewport];
        let scissors = [config.scissor];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(config.polygon_mode)
            .cull_mode(config.cull_mode)
            .front_face(config.front_face)
            .depth_bias_enable(false)
            .line_width(1.0);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(config.samples)
            .sample_shading_enable(false)
            .min_sample_shading(1.0);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(config.depth_test)
            .depth_write_enable(config.depth_write)
            .depth_compare_op(config.depth_compare_op)
            .depth_bounds_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0)
            .stencil_test_enable(false);

        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(config.enable_blending)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD);

        let attachments = [color_blend_attachment];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(subpass);

        let pipelines = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, err)| RendererError::PipelineCreation(err))?
        };
        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or(RendererError::PipelineCreation(vk::Result::ERROR_UNKNOWN))?;

        Ok(Self {
            pipeline: Pipeline::from_raw(device, pipeline),
            _vertex_module: vertex_module,
            _fragment_module: fragment_module,
        })
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline.handle()
    }

    pub fn bind(&self, device: &ash::Device, command_buffer: vk::CommandBuffer) {
        unsafe {
            device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.handle(),
            );
        }
    }
}
