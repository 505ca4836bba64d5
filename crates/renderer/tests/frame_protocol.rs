//! Integration tests for the frame protocol against a simulated GPU.
//!
//! The simulated GPU completes a submission only when the CPU waits on its
//! fence (or drains the device), which is the worst case the protocol has to
//! survive: nothing finishes early. It records every ordering violation it
//! sees instead of panicking so each test can assert on the full history.

use std::collections::VecDeque;

use presto_renderer::MAX_FRAMES_IN_FLIGHT;
use presto_renderer::frame_sync::{FrameBackend, FrameStatus, FrameSynchronizer, RebuildOutcome};
use presto_rhi::swapchain::{AcquireOutcome, PresentOutcome};
use presto_rhi::{RhiError, RhiResult, vk};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FenceId(usize);

#[derive(Debug, Clone, Copy)]
struct Submission {
    id: u64,
    image: u32,
}

struct SimulatedGpu {
    fence_signaled: Vec<bool>,
    pending: Vec<Option<Submission>>,
    /// Submission currently reading each image's resources.
    image_busy: Vec<Option<u64>>,

    window_extent: vk::Extent2D,
    chain_extent: vk::Extent2D,
    generation: u64,
    live_generations: Vec<u64>,
    image_count_after_rebuild: Option<usize>,

    image_script: VecDeque<u32>,
    next_image: u32,
    stale_acquire_calls: Vec<usize>,
    stale_present_calls: Vec<usize>,
    acquire_calls: usize,
    present_calls: usize,

    hung: bool,
    next_submission: u64,
    submitted: Vec<(usize, u32)>,
    waits: Vec<FenceId>,
    max_outstanding: usize,
    violations: Vec<String>,
}

fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

impl SimulatedGpu {
    fn new(frames_in_flight: usize, image_count: usize, window: vk::Extent2D) -> Self {
        Self {
            fence_signaled: vec![true; frames_in_flight],
            pending: vec![None; frames_in_flight],
            image_busy: vec![None; image_count],
            window_extent: window,
            chain_extent: window,
            generation: 0,
            live_generations: vec![0],
            image_count_after_rebuild: None,
            image_script: VecDeque::new(),
            next_image: 0,
            stale_acquire_calls: Vec::new(),
            stale_present_calls: Vec::new(),
            acquire_calls: 0,
            present_calls: 0,
            hung: false,
            next_submission: 0,
            submitted: Vec::new(),
            waits: Vec::new(),
            max_outstanding: 0,
            violations: Vec::new(),
        }
    }

    fn image_count(&self) -> usize {
        self.image_busy.len()
    }

    fn outstanding(&self) -> usize {
        self.pending.iter().filter(|p| p.is_some()).count()
    }

    fn complete(&mut self, fence: usize) {
        if let Some(submission) = self.pending[fence].take() {
            for busy in self.image_busy.iter_mut() {
                if *busy == Some(submission.id) {
                    *busy = None;
                }
            }
        }
        self.fence_signaled[fence] = true;
    }

    fn complete_all(&mut self) {
        for fence in 0..self.pending.len() {
            if self.pending[fence].is_some() {
                self.complete(fence);
            }
        }
    }
}

impl FrameBackend for SimulatedGpu {
    type Fence = FenceId;

    fn slot_fence(&self, slot: usize) -> FenceId {
        FenceId(slot)
    }

    fn wait_fence(&mut self, fence: FenceId) -> RhiResult<()> {
        self.waits.push(fence);
        if self.fence_signaled[fence.0] {
            return Ok(());
        }
        if self.hung {
            return Err(RhiError::DeviceLost(format!(
                "fence {:?} did not signal in time",
                fence
            )));
        }
        self.complete(fence.0);
        Ok(())
    }

    fn reset_fence(&mut self, fence: FenceId) -> RhiResult<()> {
        if self.pending[fence.0].is_some() {
            self.violations
                .push(format!("fence {:?} reset with work pending", fence));
        }
        self.fence_signaled[fence.0] = false;
        Ok(())
    }

    fn acquire(&mut self, _slot: usize) -> RhiResult<AcquireOutcome> {
        self.acquire_calls += 1;
        if self.stale_acquire_calls.contains(&self.acquire_calls) {
            return Ok(AcquireOutcome::Stale);
        }
        let image = match self.image_script.pop_front() {
            Some(image) => image,
            None => {
                let image = self.next_image % self.image_count() as u32;
                self.next_image = self.next_image.wrapping_add(1);
                image
            }
        };
        Ok(AcquireOutcome::Acquired(image))
    }

    fn update_image(&mut self, image_index: u32) -> RhiResult<()> {
        match self.image_busy.get(image_index as usize) {
            None => self
                .violations
                .push(format!("image {} does not exist", image_index)),
            Some(Some(id)) => self.violations.push(format!(
                "image {} rewritten while submission {} still reads it",
                image_index, id
            )),
            Some(None) => {}
        }
        Ok(())
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> RhiResult<()> {
        if self.pending[slot].is_some() {
            self.violations
                .push(format!("slot {} resubmitted before its fence was waited", slot));
        }
        if self.fence_signaled[slot] {
            self.violations
                .push(format!("slot {} submitted with a signaled fence", slot));
        }

        let id = self.next_submission;
        self.next_submission += 1;
        self.pending[slot] = Some(Submission {
            id,
            image: image_index,
        });
        if let Some(busy) = self.image_busy.get_mut(image_index as usize) {
            *busy = Some(id);
        }
        self.submitted.push((slot, image_index));
        self.max_outstanding = self.max_outstanding.max(self.outstanding());
        Ok(())
    }

    fn present(&mut self, _slot: usize, image_index: u32) -> RhiResult<PresentOutcome> {
        self.present_calls += 1;
        let submitted = self
            .pending
            .iter()
            .flatten()
            .any(|submission| submission.image == image_index);
        if !submitted {
            self.violations
                .push(format!("image {} presented without pending work", image_index));
        }
        if self.stale_present_calls.contains(&self.present_calls) {
            return Ok(PresentOutcome::Stale);
        }
        Ok(PresentOutcome::Presented)
    }

    fn rebuild(&mut self) -> RhiResult<RebuildOutcome> {
        if self.window_extent.width == 0 || self.window_extent.height == 0 {
            return Ok(RebuildOutcome::Deferred);
        }

        self.wait_idle()?;

        let retired = self.generation;
        self.live_generations.retain(|&g| g != retired);
        self.generation += 1;
        self.live_generations.push(self.generation);

        self.chain_extent = self.window_extent;
        let image_count = self.image_count_after_rebuild.unwrap_or(self.image_count());
        self.image_busy = vec![None; image_count];
        self.next_image = 0;

        Ok(RebuildOutcome::Rebuilt { image_count })
    }

    fn wait_idle(&mut self) -> RhiResult<()> {
        if self.hung && self.outstanding() > 0 {
            return Err(RhiError::DeviceLost("device did not go idle".to_string()));
        }
        self.complete_all();
        Ok(())
    }
}

fn run(
    sync: &mut FrameSynchronizer<FenceId>,
    gpu: &mut SimulatedGpu,
    iterations: usize,
) -> Vec<FrameStatus> {
    (0..iterations)
        .map(|_| sync.draw_frame(gpu, false).unwrap())
        .collect()
}

fn slots(statuses: &[FrameStatus]) -> Vec<usize> {
    statuses
        .iter()
        .filter_map(|status| match status {
            FrameStatus::Presented { slot, .. } | FrameStatus::PresentedAndRebuilt { slot, .. } => {
                Some(*slot)
            }
            _ => None,
        })
        .collect()
}

#[test]
fn test_ten_frames_cycle_slots() {
    let mut gpu = SimulatedGpu::new(MAX_FRAMES_IN_FLIGHT, 3, extent(1024, 768));
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT, 3).unwrap();

    let statuses = run(&mut sync, &mut gpu, 10);

    assert_eq!(slots(&statuses), vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
    assert!(statuses.iter().all(FrameStatus::submitted));
    assert_eq!(sync.frames_submitted(), 10);
    assert_eq!(sync.rebuilds(), 0);
    assert!(gpu.violations.is_empty(), "{:?}", gpu.violations);
    assert!(gpu.max_outstanding <= MAX_FRAMES_IN_FLIGHT);

    sync.drain(&mut gpu).unwrap();
    assert_eq!(gpu.outstanding(), 0);
}

#[test]
fn test_images_cycle_independently_of_slots() {
    let mut gpu = SimulatedGpu::new(MAX_FRAMES_IN_FLIGHT, 3, extent(1024, 768));
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT, 3).unwrap();

    run(&mut sync, &mut gpu, 6);

    let images: Vec<u32> = gpu.submitted.iter().map(|&(_, image)| image).collect();
    assert_eq!(images, vec![0, 1, 2, 0, 1, 2]);
    assert!(gpu.violations.is_empty(), "{:?}", gpu.violations);
}

#[test]
fn test_image_reuse_waits_for_claiming_fence() {
    let mut gpu = SimulatedGpu::new(MAX_FRAMES_IN_FLIGHT, 3, extent(1024, 768));
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT, 3).unwrap();

    // Frame 2 runs on slot 0 but gets image 1, still claimed by slot 1's
    // unfinished submission.
    gpu.image_script = VecDeque::from(vec![0, 1, 1, 2]);

    run(&mut sync, &mut gpu, 4);

    assert!(gpu.violations.is_empty(), "{:?}", gpu.violations);
    // Slot 0 waits its own fence, then the fence that claimed image 1.
    assert_eq!(&gpu.waits[2..4], &[FenceId(0), FenceId(1)]);
    assert_eq!(sync.claims().claimant(1).unwrap(), Some(FenceId(0)));
}

#[test]
fn test_own_claim_does_not_wait_twice() {
    let mut gpu = SimulatedGpu::new(MAX_FRAMES_IN_FLIGHT, 2, extent(1024, 768));
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT, 2).unwrap();

    run(&mut sync, &mut gpu, 4);

    // With as many images as slots each slot keeps reclaiming its own image.
    assert_eq!(
        gpu.waits,
        vec![FenceId(0), FenceId(1), FenceId(0), FenceId(1)]
    );
    assert!(gpu.violations.is_empty(), "{:?}", gpu.violations);
}

#[test]
fn test_more_slots_than_images() {
    let mut gpu = SimulatedGpu::new(3, 2, extent(640, 480));
    let mut sync = FrameSynchronizer::new(3, 2).unwrap();

    let statuses = run(&mut sync, &mut gpu, 9);

    assert_eq!(slots(&statuses), vec![0, 1, 2, 0, 1, 2, 0, 1, 2]);
    assert!(gpu.violations.is_empty(), "{:?}", gpu.violations);
    assert!(gpu.max_outstanding <= 3);
}

#[test]
fn test_stale_acquire_skips_frame() {
    let mut gpu = SimulatedGpu::new(MAX_FRAMES_IN_FLIGHT, 3, extent(1024, 768));
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT, 3).unwrap();
    gpu.stale_acquire_calls = vec![5];

    let mut statuses = run(&mut sync, &mut gpu, 4);
    assert_eq!(gpu.submitted.len(), 4);

    // The window changes size just before the stale acquire.
    gpu.window_extent = extent(800, 600);
    statuses.extend(run(&mut sync, &mut gpu, 6));

    assert_eq!(statuses[4], FrameStatus::Skipped);
    assert!(matches!(
        statuses[5],
        FrameStatus::Presented {
            slot: 0,
            image_index: 0
        }
    ));

    // Nothing from the skipped iteration reached the GPU.
    assert_eq!(gpu.submitted.len(), 9);
    assert_eq!(gpu.present_calls, 9);
    assert_eq!(sync.frames_submitted(), 9);

    assert_eq!(sync.rebuilds(), 1);
    assert_eq!(gpu.chain_extent, extent(800, 600));
    assert_eq!(gpu.live_generations, vec![1]);
    assert!(gpu.violations.is_empty(), "{:?}", gpu.violations);
}

#[test]
fn test_skipped_frame_keeps_slot() {
    let mut gpu = SimulatedGpu::new(MAX_FRAMES_IN_FLIGHT, 3, extent(1024, 768));
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT, 3).unwrap();
    gpu.stale_acquire_calls = vec![2];

    let statuses = run(&mut sync, &mut gpu, 4);

    assert_eq!(statuses[1], FrameStatus::Skipped);
    assert_eq!(slots(&statuses), vec![0, 1, 0]);
}

#[test]
fn test_stale_present_rebuilds_and_keeps_slot() {
    let mut gpu = SimulatedGpu::new(MAX_FRAMES_IN_FLIGHT, 3, extent(1024, 768));
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT, 3).unwrap();
    gpu.stale_present_calls = vec![1];

    let status = sync.draw_frame(&mut gpu, false).unwrap();
    assert_eq!(
        status,
        FrameStatus::PresentedAndRebuilt {
            slot: 0,
            image_index: 0
        }
    );
    assert_eq!(sync.current_slot(), 0);

    let statuses = run(&mut sync, &mut gpu, 2);
    assert_eq!(slots(&statuses), vec![0, 1]);
    assert_eq!(sync.current_slot(), 0);
    assert_eq!(sync.rebuilds(), 1);
    assert!(gpu.violations.is_empty(), "{:?}", gpu.violations);
}

#[test]
fn test_resize_flag_forces_rebuild() {
    let mut gpu = SimulatedGpu::new(MAX_FRAMES_IN_FLIGHT, 3, extent(1024, 768));
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT, 3).unwrap();

    gpu.window_extent = extent(1280, 720);
    let status = sync.draw_frame(&mut gpu, true).unwrap();

    assert!(matches!(status, FrameStatus::PresentedAndRebuilt { slot: 0, .. }));
    assert_eq!(gpu.chain_extent, extent(1280, 720));
    assert_eq!(sync.current_slot(), 0);

    let status = sync.draw_frame(&mut gpu, false).unwrap();
    assert!(matches!(status, FrameStatus::Presented { .. }));
    assert_eq!(sync.rebuilds(), 1);
}

#[test]
fn test_double_rebuild_converges() {
    let mut gpu = SimulatedGpu::new(MAX_FRAMES_IN_FLIGHT, 3, extent(1024, 768));
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT, 3).unwrap();
    run(&mut sync, &mut gpu, 3);

    // A resize rebuilds the chain, then the window moves again before the
    // next acquire, which reports the new chain stale.
    gpu.window_extent = extent(900, 700);
    sync.draw_frame(&mut gpu, true).unwrap();
    gpu.window_extent = extent(640, 360);
    gpu.stale_acquire_calls = vec![gpu.acquire_calls + 1];
    assert_eq!(sync.draw_frame(&mut gpu, false).unwrap(), FrameStatus::Skipped);

    let status = sync.draw_frame(&mut gpu, false).unwrap();
    assert!(status.submitted());

    assert_eq!(sync.rebuilds(), 2);
    assert_eq!(gpu.chain_extent, extent(640, 360));
    assert_eq!(gpu.live_generations, vec![2]);
    assert!(gpu.violations.is_empty(), "{:?}", gpu.violations);
}

#[test]
fn test_rebuild_resets_claims_to_new_image_count() {
    let mut gpu = SimulatedGpu::new(MAX_FRAMES_IN_FLIGHT, 3, extent(1024, 768));
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT, 3).unwrap();
    run(&mut sync, &mut gpu, 3);

    gpu.image_count_after_rebuild = Some(4);
    gpu.window_extent = extent(1920, 1080);
    sync.draw_frame(&mut gpu, true).unwrap();

    assert_eq!(sync.claims().len(), 4);
    assert!((0..4).all(|i| sync.claims().claimant(i).unwrap().is_none()));

    let statuses = run(&mut sync, &mut gpu, 8);
    let images: Vec<u32> = gpu.submitted[4..].iter().map(|&(_, image)| image).collect();
    assert_eq!(images, vec![0, 1, 2, 3, 0, 1, 2, 3]);
    assert!(statuses.iter().all(FrameStatus::submitted));
    assert!(gpu.violations.is_empty(), "{:?}", gpu.violations);
}

#[test]
fn test_zero_area_defers_until_restored() {
    let mut gpu = SimulatedGpu::new(MAX_FRAMES_IN_FLIGHT, 3, extent(1024, 768));
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT, 3).unwrap();
    run(&mut sync, &mut gpu, 2);

    // Minimize: the frame in progress still presents but the rebuild waits.
    gpu.window_extent = extent(0, 0);
    let status = sync.draw_frame(&mut gpu, true).unwrap();
    assert!(matches!(status, FrameStatus::Presented { slot: 0, .. }));
    assert!(sync.is_rebuild_pending());
    assert_eq!(sync.current_slot(), 0);

    let acquires = gpu.acquire_calls;
    let waits = gpu.waits.len();
    for _ in 0..3 {
        assert_eq!(sync.draw_frame(&mut gpu, false).unwrap(), FrameStatus::Deferred);
    }
    // Nothing touched a fence or the chain while deferred.
    assert_eq!(gpu.acquire_calls, acquires);
    assert_eq!(gpu.waits.len(), waits);
    assert_eq!(gpu.submitted.len(), 3);

    gpu.window_extent = extent(800, 600);
    let status = sync.draw_frame(&mut gpu, false).unwrap();
    assert!(status.submitted());
    assert!(!sync.is_rebuild_pending());
    assert_eq!(gpu.chain_extent, extent(800, 600));
    assert_eq!(sync.rebuilds(), 1);
    assert!(gpu.violations.is_empty(), "{:?}", gpu.violations);
}

#[test]
fn test_stale_acquire_while_minimized_defers() {
    let mut gpu = SimulatedGpu::new(MAX_FRAMES_IN_FLIGHT, 3, extent(1024, 768));
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT, 3).unwrap();
    gpu.window_extent = extent(0, 0);
    gpu.stale_acquire_calls = vec![1];

    assert_eq!(sync.draw_frame(&mut gpu, false).unwrap(), FrameStatus::Deferred);
    assert!(sync.is_rebuild_pending());
    assert!(gpu.submitted.is_empty());
}

#[test]
fn test_bounded_timeout_reports_device_lost() {
    let mut gpu = SimulatedGpu::new(MAX_FRAMES_IN_FLIGHT, 3, extent(1024, 768));
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT, 3).unwrap();
    run(&mut sync, &mut gpu, 2);

    // Slot 0's submission never completes.
    gpu.hung = true;
    let err = sync.draw_frame(&mut gpu, false).unwrap_err();

    assert!(err.is_device_lost());
    assert_eq!(gpu.submitted.len(), 2);
    assert!(sync.drain(&mut gpu).unwrap_err().is_device_lost());
}

#[test]
fn test_drain_completes_all_work() {
    let mut gpu = SimulatedGpu::new(MAX_FRAMES_IN_FLIGHT, 3, extent(1024, 768));
    let mut sync = FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT, 3).unwrap();
    run(&mut sync, &mut gpu, 5);

    // Reacquiring images 0 and 1 waits on their claiming fences, which
    // retires earlier frames, so fewer than MAX_FRAMES_IN_FLIGHT may remain.
    let outstanding = gpu.outstanding();
    assert!(outstanding > 0 && outstanding <= MAX_FRAMES_IN_FLIGHT);
    sync.drain(&mut gpu).unwrap();
    assert_eq!(gpu.outstanding(), 0);
    assert!(gpu.image_busy.iter().all(Option::is_none));
}
