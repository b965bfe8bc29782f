use ash::Device;
use std::sync::Arc;

use super::error::RendererResult;
use super::frame::FrameSlot;
use super::handles::{Fence, Semaphore};

/// Owns the semaphores and fences of every frame slot.
pub struct FrameSynchronizer {
    device: Arc<Device>,
    /// Signaled when the slot's swapchain image has been acquired.
    image_available_semaphores: Vec<Semaphore>,
    /// Signaled when the slot's rendering is done; presentation waits on it.
    render_finished_semaphores: Vec<Semaphore>,
    /// Created signaled so the first wait on each slot returns immediately.
    in_flight_fences: Vec<Fence>,
}

impl FrameSynchronizer {
    /// Create synchronization primitives for `frames_in_flight` slots.
    pub fn new(device: &Arc<Device>, frames_in_flight: usize) -> RendererResult<Self> {
        let mut image_available_semaphores = Vec::with_capacity(frames_in_flight);
        let mut render_finished_semaphores = Vec::with_capacity(frames_in_flight);
        let mut in_flight_fences = Vec::with_capacity(frames_in_flight);

        for _ in 0..frames_in_flight {
            image_available_semaphores.push(Semaphore::new(device)?);
            render_finished_semaphores.push(Semaphore::new(device)?);
            in_flight_fences.push(Fence::new(device, true)?);
        }

        Ok(FrameSynchronizer {
            device: device.clone(),
            image_available_semaphores,
            render_finished_semaphores,
            in_flight_fences,
        })
    }

    /// Raw handles per slot, in slot order.
    pub fn slots(&self) -> Vec<FrameSlot> {
        self.image_available_semaphores
            .iter()
            .zip(&self.render_finished_semaphores)
            .zip(&self.in_flight_fences)
            .map(|((image_available, render_finished), in_flight)| FrameSlot {
                image_available: image_available.handle(),
                render_finished: render_finished.handle(),
                in_flight: in_flight.handle(),
            })
            .collect()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.in_flight_fences.len()
    }
}

impl Drop for FrameSynchronizer {
    fn drop(&mut self) {
        // Nothing may still wait on or signal these objects once they are destroyed.
        unsafe {
            let _ = self.device.device_wait_idle();
        }
    }
}
