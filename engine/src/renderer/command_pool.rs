use ash::{vk, Device};
use std::sync::Arc;

use super::error::RendererResult;

/// Command pool bound to one queue family.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a resettable, transient command pool for the given queue family.
    ///
    /// # Arguments
    /// * `device` - The Vulkan logical device
    /// * `queue_family_index` - The queue family index (the graphics family)
    pub fn new(device: &Arc<Device>, queue_family_index: u32) -> RendererResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::default()
            .flags(
                vk::CommandPoolCreateFlags::TRANSIENT
                    | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )
            .queue_family_index(queue_family_index);

        let pool = unsafe { device.create_command_pool(&pool_create_info, None)? };

        Ok(CommandPool {
            device: device.clone(),
            pool,
        })
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    pub fn allocate_buffers(&self, count: u32) -> RendererResult<Vec<vk::CommandBuffer>> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = unsafe { self.device.allocate_command_buffers(&allocate_info)? };
        Ok(buffers)
    }

    pub fn free_buffers(&self, buffers: &[vk::CommandBuffer]) {
        if buffers.is_empty() {
            return;
        }
        unsafe {
            self.device.free_command_buffers(self.pool, buffers);
        }
    }

    /// Begin recording with `ONE_TIME_SUBMIT`.
    pub fn begin_recording(
        device: &Device,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), vk::Result> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe { device.begin_command_buffer(command_buffer, &begin_info) }
    }

    /// End recording for a command buffer.
    pub fn end_recording(device: &Device, command_buffer: vk::CommandBuffer) -> Result<(), vk::Result> {
        unsafe { device.end_command_buffer(command_buffer) }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // Destroying the pool frees every buffer still allocated from it.
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SingleUseState {
    Recording,
    /// Submitted and not known to have finished.
    Submitted,
    Finished,
}

impl SingleUseState {
    fn can_free(self) -> bool {
        self != SingleUseState::Submitted
    }
}

/// A primary command buffer for blocking setup-time work.
///
/// Created by `VulkanContext::begin_single_use_commands`. Ending it submits to the queue and
/// waits for the queue to go idle. Dropping it without ending returns the buffer to the pool
/// unsubmitted. If the wait fails the buffer stays allocated until the pool is destroyed.
pub struct SingleUseCommands<'a> {
    device: &'a Device,
    pool: &'a CommandPool,
    queue: vk::Queue,
    command_buffer: vk::CommandBuffer,
    state: SingleUseState,
}

impl<'a> SingleUseCommands<'a> {
    pub(crate) fn begin(
        device: &'a Device,
        pool: &'a CommandPool,
        queue: vk::Queue,
    ) -> RendererResult<Self> {
        let command_buffer = pool.allocate_buffers(1)?[0];
        let commands = Self {
            device,
            pool,
            queue,
            command_buffer,
            state: SingleUseState::Recording,
        };
        CommandPool::begin_recording(device, command_buffer)?;
        Ok(commands)
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Submits the recorded work and blocks until the queue is idle. The buffer goes back to
    /// the pool when `self` drops at the end of this call.
    pub fn end(mut self) -> RendererResult<()> {
        CommandPool::end_recording(self.device, self.command_buffer)?;

        let command_buffers = [self.command_buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info], vk::Fence::null())?;
        }
        self.state = SingleUseState::Submitted;

        unsafe { self.device.queue_wait_idle(self.queue)? };
        self.state = SingleUseState::Finished;
        Ok(())
    }
}

impl Drop for SingleUseCommands<'_> {
    fn drop(&mut self) {
        if !self.state.can_free() {
            log::warn!(
                "Single-use command buffer {:?} may still be executing; leaving it to the pool",
                self.command_buffer
            );
            return;
        }
        self.pool.free_buffers(&[self.command_buffer]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unfinished_submission_is_not_freed() {
        assert!(SingleUseState::Recording.can_free());
        assert!(!SingleUseState::Submitted.can_free());
        assert!(SingleUseState::Finished.can_free());
    }
}
