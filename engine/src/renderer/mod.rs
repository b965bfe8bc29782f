mod buffer_utils;
mod command_pool;
mod context;
mod debug;
mod device_selection;
mod error;
mod frame;
mod handles;
mod pipeline;
mod render_context;
mod render_pass;
mod renderer;
mod shader;
mod surface;
mod swapchain;
mod sync;

pub use buffer_utils::{find_memory_type_index, GpuBuffer, GpuImage};
pub use command_pool::{CommandPool, SingleUseCommands};
pub use context::{ContextConfig, VulkanContext};
pub use device_selection::{
    DeviceCandidate, QueueFamilyIndices, REQUIRED_DEVICE_EXTENSIONS, VALIDATION_LAYER,
};
pub use error::{RendererError, RendererResult};
pub use frame::{
    AcquireOutcome, AcquiredImage, FrameBackend, FramePacer, FrameSlot, FrameSlotIndex,
    ImageIndex, PresentStatus, SlotState,
};
pub use handles::{PipelineLayout, RenderPass};
pub use pipeline::{GraphicsPipeline, PipelineConfig};
pub use render_context::RenderContext;
pub use renderer::{Renderer, ShaderCode};
pub use shader::{load_spirv, spirv_words, SPIRV_MAGIC};
pub use surface::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format,
    find_supported_format, select_depth_format, SurfaceSupport, DEPTH_FORMAT_CANDIDATES,
};
pub use swapchain::{Swapchain, SwapchainConfig};
