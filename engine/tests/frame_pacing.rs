use std::collections::VecDeque;

use ash::vk::{self, Handle};
use triframe::renderer::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format,
    AcquireOutcome, AcquiredImage, FrameBackend, FramePacer, FrameSlot, FrameSlotIndex,
    ImageIndex, PresentStatus, SlotState,
};
use triframe::RendererError;

const FENCE_BASE: u64 = 0x1;
const IMAGE_AVAILABLE_BASE: u64 = 0x100;
const RENDER_FINISHED_BASE: u64 = 0x200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    Wait(usize),
    Reset(usize),
    Acquire(usize),
    Submit(usize),
    Present(u32),
}

/// A GPU that only finishes work when the host waits for it.
struct SimulatedGpu {
    signaled: Vec<bool>,
    /// `(slot, presented image)` for every submission that has not completed.
    pending: Vec<(usize, Option<u32>)>,
    max_pending: usize,
    image_count: u32,
    next_image: u32,
    scripted_images: VecDeque<u32>,
    acquire_error: Option<vk::Result>,
    acquire_suboptimal: bool,
    submit_error: Option<vk::Result>,
    present_results: VecDeque<Result<bool, vk::Result>>,
    wait_error: Option<vk::Result>,
    calls: Vec<Call>,
}

impl SimulatedGpu {
    fn new(frames_in_flight: usize, image_count: u32) -> Self {
        Self {
            signaled: vec![true; frames_in_flight],
            pending: Vec::new(),
            max_pending: 0,
            image_count,
            next_image: 0,
            scripted_images: VecDeque::new(),
            acquire_error: None,
            acquire_suboptimal: false,
            submit_error: None,
            present_results: VecDeque::new(),
            wait_error: None,
            calls: Vec::new(),
        }
    }

    fn slots(frames_in_flight: usize) -> Vec<FrameSlot> {
        (0..frames_in_flight as u64)
            .map(|i| FrameSlot {
                image_available: vk::Semaphore::from_raw(IMAGE_AVAILABLE_BASE + i),
                render_finished: vk::Semaphore::from_raw(RENDER_FINISHED_BASE + i),
                in_flight: vk::Fence::from_raw(FENCE_BASE + i),
            })
            .collect()
    }

    fn fence_slot(fence: vk::Fence) -> usize {
        (fence.as_raw() - FENCE_BASE) as usize
    }
}

impl FrameBackend for SimulatedGpu {
    fn wait_for_fence(&mut self, fence: vk::Fence, _timeout_ns: u64) -> Result<(), vk::Result> {
        let slot = Self::fence_slot(fence);
        self.calls.push(Call::Wait(slot));

        if let Some(err) = self.wait_error {
            return Err(err);
        }
        if self.signaled[slot] {
            return Ok(());
        }
        match self.pending.iter().position(|&(owner, _)| owner == slot) {
            Some(position) => {
                self.pending.remove(position);
                self.signaled[slot] = true;
                Ok(())
            }
            // Unsignaled with nothing queued: this wait would never return.
            None => Err(vk::Result::TIMEOUT),
        }
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> Result<(), vk::Result> {
        let slot = Self::fence_slot(fence);
        self.calls.push(Call::Reset(slot));
        self.signaled[slot] = false;
        Ok(())
    }

    fn acquire_next_image(
        &mut self,
        signal: vk::Semaphore,
        _timeout_ns: u64,
    ) -> Result<(u32, bool), vk::Result> {
        self.calls
            .push(Call::Acquire((signal.as_raw() - IMAGE_AVAILABLE_BASE) as usize));

        if let Some(err) = self.acquire_error.take() {
            return Err(err);
        }
        let image = self.scripted_images.pop_front().unwrap_or_else(|| {
            let image = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            image
        });
        Ok((image, std::mem::take(&mut self.acquire_suboptimal)))
    }

    fn submit(
        &mut self,
        _command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<(), vk::Result> {
        let slot = Self::fence_slot(fence);
        self.calls.push(Call::Submit(slot));

        assert_eq!(wait.as_raw(), IMAGE_AVAILABLE_BASE + slot as u64);
        assert_eq!(signal.as_raw(), RENDER_FINISHED_BASE + slot as u64);

        if let Some(err) = self.submit_error.take() {
            return Err(err);
        }
        assert!(!self.signaled[slot], "submitted with a fence that was not reset");

        self.pending.push((slot, None));
        self.max_pending = self.max_pending.max(self.pending.len());
        Ok(())
    }

    fn present(&mut self, wait: vk::Semaphore, image: u32) -> Result<bool, vk::Result> {
        self.calls.push(Call::Present(image));
        let slot = (wait.as_raw() - RENDER_FINISHED_BASE) as usize;

        assert!(
            !self
                .pending
                .iter()
                .any(|&(owner, presented)| owner != slot && presented == Some(image)),
            "image {image} reused while earlier work on it is still running"
        );
        if let Some(entry) = self.pending.iter_mut().rev().find(|(owner, _)| *owner == slot) {
            entry.1 = Some(image);
        }

        self.present_results.pop_front().unwrap_or(Ok(false))
    }
}

fn setup(frames_in_flight: usize, image_count: u32) -> (FramePacer, SimulatedGpu) {
    let pacer = FramePacer::new(
        SimulatedGpu::slots(frames_in_flight),
        image_count as usize,
        u64::MAX,
    );
    (pacer, SimulatedGpu::new(frames_in_flight, image_count))
}

fn acquire(pacer: &mut FramePacer, gpu: &mut SimulatedGpu) -> AcquiredImage {
    match pacer.acquire_next_image(gpu).unwrap() {
        AcquireOutcome::Acquired(acquired) => acquired,
        AcquireOutcome::OutOfDate => panic!("unexpected out-of-date swapchain"),
    }
}

fn render_frame(
    pacer: &mut FramePacer,
    gpu: &mut SimulatedGpu,
) -> Result<PresentStatus, RendererError> {
    let acquired = acquire(pacer, gpu);
    pacer.submit_and_present(gpu, vk::CommandBuffer::null(), acquired)
}

#[test]
fn at_most_frames_in_flight_submissions_are_pending() {
    let (mut pacer, mut gpu) = setup(2, 3);

    for frame in 0..20 {
        assert_eq!(pacer.current_frame(), FrameSlotIndex(frame % 2));
        assert_eq!(render_frame(&mut pacer, &mut gpu).unwrap(), PresentStatus::Ok);
        assert!(gpu.pending.len() <= 2);
    }

    assert_eq!(gpu.max_pending, 2);
}

#[test]
fn reusing_a_slot_waits_for_its_previous_submission() {
    let (mut pacer, mut gpu) = setup(2, 3);

    render_frame(&mut pacer, &mut gpu).unwrap();
    render_frame(&mut pacer, &mut gpu).unwrap();
    assert_eq!(pacer.slot_state(FrameSlotIndex(0)), SlotState::InFlight);

    gpu.calls.clear();
    let acquired = acquire(&mut pacer, &mut gpu);
    assert_eq!(gpu.calls, vec![Call::Wait(0), Call::Acquire(0)]);
    assert!(gpu.signaled[0]);
    assert_eq!(acquired.slot(), FrameSlotIndex(0));
}

#[test]
fn image_still_owned_by_another_slot_is_waited_on() {
    let (mut pacer, mut gpu) = setup(3, 2);
    gpu.scripted_images.extend([0, 1, 0]);

    render_frame(&mut pacer, &mut gpu).unwrap();
    render_frame(&mut pacer, &mut gpu).unwrap();
    assert_eq!(pacer.image_owner(ImageIndex(0)), Some(FrameSlotIndex(0)));

    gpu.calls.clear();
    render_frame(&mut pacer, &mut gpu).unwrap();

    assert_eq!(
        gpu.calls,
        vec![
            Call::Acquire(2),
            Call::Wait(0),
            Call::Reset(2),
            Call::Submit(2),
            Call::Present(0),
        ]
    );
    assert_eq!(pacer.image_owner(ImageIndex(0)), Some(FrameSlotIndex(2)));
    assert_eq!(pacer.slot_state(FrameSlotIndex(0)), SlotState::Signaled);
}

#[test]
fn more_slots_than_images_never_overlaps_an_image() {
    let (mut pacer, mut gpu) = setup(3, 2);

    for _ in 0..12 {
        render_frame(&mut pacer, &mut gpu).unwrap();
    }

    assert!(gpu.max_pending <= 2);
}

#[test]
fn current_frame_advances_whatever_presentation_reports() {
    let (mut pacer, mut gpu) = setup(2, 2);
    gpu.present_results.extend([
        Ok(false),
        Ok(true),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR),
        Err(vk::Result::ERROR_SURFACE_LOST_KHR),
    ]);

    assert_eq!(render_frame(&mut pacer, &mut gpu).unwrap(), PresentStatus::Ok);
    assert_eq!(pacer.current_frame(), FrameSlotIndex(1));

    assert_eq!(
        render_frame(&mut pacer, &mut gpu).unwrap(),
        PresentStatus::Suboptimal
    );
    assert_eq!(pacer.current_frame(), FrameSlotIndex(0));

    assert_eq!(
        render_frame(&mut pacer, &mut gpu).unwrap(),
        PresentStatus::OutOfDate
    );
    assert_eq!(pacer.current_frame(), FrameSlotIndex(1));

    let err = render_frame(&mut pacer, &mut gpu).unwrap_err();
    assert!(matches!(
        err,
        RendererError::Present(vk::Result::ERROR_SURFACE_LOST_KHR)
    ));
    assert_eq!(pacer.current_frame(), FrameSlotIndex(0));
}

#[test]
fn out_of_date_acquire_submits_nothing() {
    let (mut pacer, mut gpu) = setup(2, 3);
    gpu.acquire_error = Some(vk::Result::ERROR_OUT_OF_DATE_KHR);

    let outcome = pacer.acquire_next_image(&mut gpu).unwrap();
    assert_eq!(outcome, AcquireOutcome::OutOfDate);
    assert_eq!(pacer.current_frame(), FrameSlotIndex(0));
    assert!(!gpu.calls.iter().any(|call| matches!(call, Call::Submit(_))));

    assert_eq!(render_frame(&mut pacer, &mut gpu).unwrap(), PresentStatus::Ok);
}

#[test]
fn other_acquire_failures_are_errors() {
    let (mut pacer, mut gpu) = setup(2, 3);
    gpu.acquire_error = Some(vk::Result::ERROR_DEVICE_LOST);

    let err = pacer.acquire_next_image(&mut gpu).unwrap_err();
    assert!(matches!(
        err,
        RendererError::Acquire(vk::Result::ERROR_DEVICE_LOST)
    ));
}

#[test]
fn suboptimal_acquire_is_still_renderable() {
    let (mut pacer, mut gpu) = setup(2, 3);
    gpu.acquire_suboptimal = true;

    let acquired = acquire(&mut pacer, &mut gpu);
    assert!(acquired.is_suboptimal());
    assert_eq!(
        pacer
            .submit_and_present(&mut gpu, vk::CommandBuffer::null(), acquired)
            .unwrap(),
        PresentStatus::Ok
    );
}

#[test]
fn image_acquired_for_another_slot_is_rejected() {
    let (mut pacer, mut gpu) = setup(2, 3);

    let first = acquire(&mut pacer, &mut gpu);
    let second = acquire(&mut pacer, &mut gpu);
    pacer
        .submit_and_present(&mut gpu, vk::CommandBuffer::null(), second)
        .unwrap();
    assert_eq!(pacer.current_frame(), FrameSlotIndex(1));

    gpu.calls.clear();
    let err = pacer
        .submit_and_present(&mut gpu, vk::CommandBuffer::null(), first)
        .unwrap_err();

    assert!(matches!(err, RendererError::StaleImage { image: 0, slot: 1 }));
    assert_eq!(pacer.current_frame(), FrameSlotIndex(1));
    assert!(gpu.calls.is_empty());
}

#[test]
fn image_from_a_replaced_pacer_is_rejected() {
    let (mut old_pacer, mut gpu) = setup(2, 3);
    let acquired = acquire(&mut old_pacer, &mut gpu);
    assert_eq!(acquired.slot(), FrameSlotIndex(0));

    // A rebuild starts a fresh pacer back at slot 0.
    let (mut new_pacer, _) = setup(2, 3);
    gpu.calls.clear();
    let err = new_pacer
        .submit_and_present(&mut gpu, vk::CommandBuffer::null(), acquired)
        .unwrap_err();

    assert!(matches!(err, RendererError::StaleImage { image: 0, slot: 0 }));
    assert_eq!(new_pacer.current_frame(), FrameSlotIndex(0));
    assert!(gpu.calls.is_empty());
}

#[test]
fn failed_submission_requires_a_rebuild() {
    let (mut pacer, mut gpu) = setup(2, 3);
    gpu.submit_error = Some(vk::Result::ERROR_OUT_OF_HOST_MEMORY);

    let err = render_frame(&mut pacer, &mut gpu).unwrap_err();
    assert!(matches!(
        err,
        RendererError::QueueSubmit(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
    ));
    assert_eq!(pacer.slot_state(FrameSlotIndex(0)), SlotState::Reset);
    assert_eq!(pacer.current_frame(), FrameSlotIndex(1));
    assert!(pacer.needs_rebuild());

    // Slot 0's acquire semaphore is still signaled, so the GPU must not be asked again.
    gpu.calls.clear();
    for _ in 0..3 {
        assert_eq!(
            pacer.acquire_next_image(&mut gpu).unwrap(),
            AcquireOutcome::OutOfDate
        );
    }
    assert!(gpu.calls.is_empty());
}

#[test]
fn failed_wait_for_image_owner_requires_a_rebuild() {
    let (mut pacer, mut gpu) = setup(2, 2);
    render_frame(&mut pacer, &mut gpu).unwrap();

    gpu.scripted_images.push_back(0);
    let acquired = acquire(&mut pacer, &mut gpu);
    gpu.wait_error = Some(vk::Result::ERROR_DEVICE_LOST);

    let err = pacer
        .submit_and_present(&mut gpu, vk::CommandBuffer::null(), acquired)
        .unwrap_err();
    assert!(matches!(
        err,
        RendererError::FenceWait(vk::Result::ERROR_DEVICE_LOST)
    ));
    assert!(pacer.needs_rebuild());
    assert!(!gpu.calls.iter().any(|call| matches!(call, Call::Submit(1))));
}

#[test]
fn successful_frames_never_need_a_rebuild() {
    let (mut pacer, mut gpu) = setup(3, 3);
    for _ in 0..9 {
        render_frame(&mut pacer, &mut gpu).unwrap();
        assert!(!pacer.needs_rebuild());
    }
}

#[test]
fn fence_wait_timeout_is_reported() {
    let (mut pacer, mut gpu) = setup(1, 2);
    render_frame(&mut pacer, &mut gpu).unwrap();

    gpu.wait_error = Some(vk::Result::TIMEOUT);
    assert!(matches!(
        pacer.acquire_next_image(&mut gpu),
        Err(RendererError::Timeout)
    ));

    gpu.wait_error = Some(vk::Result::ERROR_DEVICE_LOST);
    assert!(matches!(
        pacer.acquire_next_image(&mut gpu),
        Err(RendererError::FenceWait(vk::Result::ERROR_DEVICE_LOST))
    ));
}

#[test]
fn rebuilding_from_the_same_surface_makes_the_same_choices() {
    let capabilities = vk::SurfaceCapabilitiesKHR {
        min_image_count: 2,
        max_image_count: 8,
        current_extent: vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        },
        min_image_extent: vk::Extent2D {
            width: 1,
            height: 1,
        },
        max_image_extent: vk::Extent2D {
            width: 4096,
            height: 4096,
        },
        ..Default::default()
    };
    let formats = [vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    }];
    let present_modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
    let window = vk::Extent2D {
        width: 800,
        height: 600,
    };

    let first = (
        choose_surface_format(&formats).map(|f| (f.format, f.color_space)),
        choose_present_mode(&present_modes),
        choose_extent(&capabilities, window),
        choose_image_count(&capabilities),
    );
    let second = (
        choose_surface_format(&formats).map(|f| (f.format, f.color_space)),
        choose_present_mode(&present_modes),
        choose_extent(&capabilities, window),
        choose_image_count(&capabilities),
    );

    assert_eq!(first, second);
    assert_eq!(first.2, window);
    assert_eq!(first.3, 3);
}
