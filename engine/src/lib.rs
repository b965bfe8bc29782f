//! Triangle rendering on Vulkan with a frames-in-flight presentation engine.
//!
//! The crate is split the same way the GPU work is: a [`VulkanContext`] that owns the
//! device, a [`Swapchain`] that owns the presentable images and the frame synchronization,
//! and a [`GraphicsPipeline`] built against the swapchain's render pass. [`Renderer`] ties
//! them together into a frame loop.

pub mod config;
pub mod logging;
pub mod renderer;

pub use config::{ConfigError, EngineConfig};
pub use renderer::{
    GraphicsPipeline, Renderer, RendererError, RendererResult, Swapchain, VulkanContext,
};
