//! Frames-in-flight pacing.
//!
//! [`FramePacer`] owns the bookkeeping for `F` frame slots over a ring of presentable images:
//! which slot is current, which slot last submitted against each image, and whether a slot's
//! fence can still be waited on. Every GPU call goes through a [`FrameBackend`], so the protocol
//! runs the same against a real swapchain and against a simulated GPU.

use ash::vk;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::error::{RendererError, RendererResult};

/// Index into the frame slots. Always `< frames_in_flight`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameSlotIndex(pub usize);

/// Index into the presentable image ring, as returned by acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageIndex(pub u32);

impl ImageIndex {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FrameSlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

impl fmt::Display for ImageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image {}", self.0)
    }
}

/// Synchronization handles of one frame slot.
#[derive(Debug, Clone, Copy)]
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

/// Where a slot's fence is, as far as the host knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum SlotState {
    /// Fence signaled; nothing of this slot is running on the GPU.
    Signaled,
    /// Submitted with the fence; it signals once the GPU finishes.
    InFlight,
    /// Fence reset but the submission failed, so nothing will ever signal it.
    Reset,
}

/// An image handed out by [`FramePacer::acquire_next_image`].
///
/// Not `Clone`: submitting consumes it. It is tied to the pacer that acquired it, so an image
/// acquired before a recreate is rejected by the rebuilt pacer.
#[derive(Debug, PartialEq, Eq)]
pub struct AcquiredImage {
    image: ImageIndex,
    slot: FrameSlotIndex,
    generation: u64,
    suboptimal: bool,
}

impl AcquiredImage {
    pub fn index(&self) -> ImageIndex {
        self.image
    }

    pub fn slot(&self) -> FrameSlotIndex {
        self.slot
    }

    /// The surface no longer matches exactly but the image is still presentable.
    pub fn is_suboptimal(&self) -> bool {
        self.suboptimal
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired(AcquiredImage),
    /// The swapchain must be recreated before anything else is rendered.
    OutOfDate,
}

/// Result of a successful submission, as reported by presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum PresentStatus {
    Ok,
    Suboptimal,
    OutOfDate,
}

impl PresentStatus {
    pub fn needs_recreate(self) -> bool {
        !matches!(self, PresentStatus::Ok)
    }
}

/// The GPU operations frame pacing depends on.
pub trait FrameBackend {
    fn wait_for_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> Result<(), vk::Result>;

    fn reset_fence(&mut self, fence: vk::Fence) -> Result<(), vk::Result>;

    /// `(image index, suboptimal)`; out-of-date is reported as `ERROR_OUT_OF_DATE_KHR`.
    fn acquire_next_image(
        &mut self,
        signal: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<(u32, bool), vk::Result>;

    /// Submits `command_buffer` after `wait` at color-attachment output, signaling `signal`
    /// and `fence` on completion.
    fn submit(
        &mut self,
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<(), vk::Result>;

    /// Returns whether the presentation was suboptimal.
    fn present(&mut self, wait: vk::Semaphore, image: u32) -> Result<bool, vk::Result>;
}

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(0);

pub struct FramePacer {
    slots: Vec<FrameSlot>,
    slot_states: Vec<SlotState>,
    images_in_flight: Vec<Option<FrameSlotIndex>>,
    current_frame: FrameSlotIndex,
    generation: u64,
    // An acquire semaphore was signaled and nothing consumed it.
    stranded: bool,
    timeout_ns: u64,
}

impl FramePacer {
    /// `slots` must have signaled fences. Panics if `slots` is empty.
    pub fn new(slots: Vec<FrameSlot>, image_count: usize, timeout_ns: u64) -> Self {
        assert!(!slots.is_empty(), "frame pacing needs at least one frame slot");

        Self {
            slot_states: vec![SlotState::Signaled; slots.len()],
            slots,
            images_in_flight: vec![None; image_count],
            current_frame: FrameSlotIndex(0),
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            stranded: false,
            timeout_ns,
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn image_count(&self) -> usize {
        self.images_in_flight.len()
    }

    pub fn current_frame(&self) -> FrameSlotIndex {
        self.current_frame
    }

    pub fn slot(&self, slot: FrameSlotIndex) -> &FrameSlot {
        &self.slots[slot.0]
    }

    pub fn slot_state(&self, slot: FrameSlotIndex) -> SlotState {
        self.slot_states[slot.0]
    }

    /// An acquired image was never submitted, leaving its slot's acquire semaphore signaled.
    /// The synchronization objects must be rebuilt before this pacer can acquire again.
    pub fn needs_rebuild(&self) -> bool {
        self.stranded
    }

    /// The slot that last submitted work against `image`, if any.
    pub fn image_owner(&self, image: ImageIndex) -> Option<FrameSlotIndex> {
        self.images_in_flight.get(image.as_usize()).copied().flatten()
    }

    /// Waits for the current slot to retire, then acquires the next image.
    ///
    /// Reports `OutOfDate` without touching the GPU once [`needs_rebuild`](Self::needs_rebuild)
    /// is set.
    pub fn acquire_next_image<B: FrameBackend>(
        &mut self,
        backend: &mut B,
    ) -> RendererResult<AcquireOutcome> {
        if self.stranded {
            return Ok(AcquireOutcome::OutOfDate);
        }
        let slot = self.current_frame;
        self.wait_for_slot(backend, slot)?;

        match backend.acquire_next_image(self.slots[slot.0].image_available, self.timeout_ns) {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired(AcquiredImage {
                image: ImageIndex(index),
                slot,
                generation: self.generation,
                suboptimal,
            })),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Err(RendererError::Timeout),
            Err(err) => Err(RendererError::Acquire(err)),
        }
    }

    /// Submits `command_buffer` for the acquired image and presents it.
    ///
    /// The current frame advances once the submission has been attempted, whatever the
    /// outcome. An image acquired by another pacer or for another slot is rejected with
    /// `StaleImage` and changes nothing. If the command buffer never reaches the queue the
    /// pacer [needs a rebuild](Self::needs_rebuild).
    pub fn submit_and_present<B: FrameBackend>(
        &mut self,
        backend: &mut B,
        command_buffer: vk::CommandBuffer,
        acquired: AcquiredImage,
    ) -> RendererResult<PresentStatus> {
        let slot = self.current_frame;
        let image = acquired.image;
        if acquired.generation != self.generation
            || acquired.slot != slot
            || image.as_usize() >= self.images_in_flight.len()
        {
            return Err(RendererError::StaleImage {
                image: image.0,
                slot: slot.0,
            });
        }

        let status = self.submit_and_present_slot(backend, command_buffer, slot, image);
        self.current_frame = FrameSlotIndex((slot.0 + 1) % self.slots.len());
        status
    }

    fn submit_and_present_slot<B: FrameBackend>(
        &mut self,
        backend: &mut B,
        command_buffer: vk::CommandBuffer,
        slot: FrameSlotIndex,
        image: ImageIndex,
    ) -> RendererResult<PresentStatus> {
        // Cleared once the submission has consumed the acquire semaphore.
        self.stranded = true;
        if let Some(owner) = self.images_in_flight[image.as_usize()] {
            self.wait_for_slot(backend, owner)?;
        }
        self.images_in_flight[image.as_usize()] = Some(slot);

        let FrameSlot {
            image_available,
            render_finished,
            in_flight,
        } = self.slots[slot.0];

        backend
            .reset_fence(in_flight)
            .map_err(RendererError::FenceReset)?;
        self.slot_states[slot.0] = SlotState::Reset;

        backend
            .submit(command_buffer, image_available, render_finished, in_flight)
            .map_err(RendererError::QueueSubmit)?;
        self.slot_states[slot.0] = SlotState::InFlight;
        self.stranded = false;

        match backend.present(render_finished, image.0) {
            Ok(false) => Ok(PresentStatus::Ok),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(err) => Err(RendererError::Present(err)),
        }
    }

    fn wait_for_slot<B: FrameBackend>(
        &mut self,
        backend: &mut B,
        slot: FrameSlotIndex,
    ) -> RendererResult<()> {
        if self.slot_states[slot.0] != SlotState::InFlight {
            return Ok(());
        }

        match backend.wait_for_fence(self.slots[slot.0].in_flight, self.timeout_ns) {
            Ok(()) => {
                self.slot_states[slot.0] = SlotState::Signaled;
                Ok(())
            }
            Err(vk::Result::TIMEOUT) => Err(RendererError::Timeout),
            Err(err) => Err(RendererError::FenceWait(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_ok_skips_recreation() {
        assert!(!PresentStatus::Ok.needs_recreate());
        assert!(PresentStatus::Suboptimal.needs_recreate());
        assert!(PresentStatus::OutOfDate.needs_recreate());
    }

    #[test]
    fn indices_display_their_kind() {
        assert_eq!(FrameSlotIndex(1).to_string(), "slot 1");
        assert_eq!(ImageIndex(2).to_string(), "image 2");
        assert_eq!(PresentStatus::Suboptimal.to_string(), "Suboptimal");
        assert_eq!(SlotState::InFlight.to_string(), "InFlight");
    }

    #[test]
    #[should_panic]
    fn zero_slots_is_rejected() {
        FramePacer::new(Vec::new(), 3, u64::MAX);
    }
}
