use ash::vk;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RendererError {
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("Window handle unavailable: {0}")]
    WindowHandle(#[from] winit::raw_window_handle::HandleError),

    #[error("No GPU satisfies the renderer's requirements")]
    NoSuitableDevice,

    #[error("Validation layers requested, but {0} is not available")]
    ValidationLayerUnavailable(String),

    #[error("Missing required instance extension {0}")]
    MissingInstanceExtension(String),

    #[error("No memory type matches filter {type_filter:#b} with properties {properties:?}")]
    NoSuitableMemoryType {
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    },

    #[error("Failed to create {what}: {source}")]
    ResourceCreationFailed {
        what: &'static str,
        #[source]
        source: Box<RendererError>,
    },

    #[error("Write of {len} bytes does not fit a {capacity} byte buffer")]
    BufferOverflow {
        len: usize,
        capacity: vk::DeviceSize,
    },

    #[error("None of the candidate depth formats is supported")]
    NoSupportedDepthFormat,

    #[error("Shader module error: {0}")]
    ShaderModule(String),

    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(vk::Result),

    #[error("Failed to acquire swapchain image: {0}")]
    Acquire(vk::Result),

    #[error("Failed to submit draw command buffer: {0}")]
    QueueSubmit(vk::Result),

    #[error("Failed to present swapchain image: {0}")]
    Present(vk::Result),

    #[error("Failed waiting on in-flight fence: {0}")]
    FenceWait(vk::Result),

    #[error("Failed to reset in-flight fence: {0}")]
    FenceReset(vk::Result),

    #[error("Timed out waiting for the GPU or the presentation surface")]
    Timeout,

    #[error("Image {image} was not acquired for frame slot {slot}")]
    StaleImage { image: u32, slot: usize },
}

impl RendererError {
    /// Wraps a lower-level failure with the name of the resource being built.
    pub fn creating(what: &'static str) -> impl FnOnce(RendererError) -> RendererError {
        move |source| RendererError::ResourceCreationFailed {
            what,
            source: Box::new(source),
        }
    }
}

pub type RendererResult<T> = std::result::Result<T, RendererError>;
