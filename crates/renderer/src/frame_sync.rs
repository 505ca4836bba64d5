//! Frame synchronization state machine.
//!
//! [`FrameSynchronizer`] drives one iteration of the submit/present protocol
//! per call to [`FrameSynchronizer::draw_frame`]. It owns only bookkeeping:
//! which frame slot is current, which fence last claimed each presentation
//! image, and whether a chain rebuild is still pending. Everything that
//! touches the GPU goes through a [`FrameBackend`].
//!
//! # Protocol
//!
//! ```text
//! 1. Wait on the current slot's fence
//! 2. Acquire an image (stale -> rebuild, skip the frame)
//! 3. Wait on the fence that last claimed the image, if it belongs to another slot
//! 4. Claim the image for the current slot's fence
//! 5. Write the image's per-frame data
//! 6. Reset the slot fence and submit
//! 7. Present (stale or resize -> rebuild, keep the slot)
//! 8. Advance the cursor
//! ```
//!
//! The number of presentation images need not match the number of frame
//! slots, so step 3 is what stops two in-flight frames from writing the same
//! image's resources.

use std::fmt;

use tracing::{debug, trace};

use presto_rhi::swapchain::{AcquireOutcome, PresentOutcome};
use presto_rhi::{RhiError, RhiResult};

/// Result of asking the backend to rebuild the presentation chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// The chain was rebuilt with this many presentation images.
    Rebuilt { image_count: usize },
    /// The window has no area; the rebuild must be retried later.
    Deferred,
}

/// What one frame iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was submitted and presented.
    Presented { slot: usize, image_index: u32 },
    /// The frame was presented, then the chain was rebuilt.
    PresentedAndRebuilt { slot: usize, image_index: u32 },
    /// Acquire reported a stale chain; it was rebuilt and nothing was submitted.
    Skipped,
    /// A rebuild is pending until the window has a nonzero area.
    Deferred,
}

impl FrameStatus {
    /// Returns true if this iteration submitted work to the GPU.
    #[inline]
    pub fn submitted(&self) -> bool {
        matches!(
            self,
            Self::Presented { .. } | Self::PresentedAndRebuilt { .. }
        )
    }
}

/// GPU-facing operations the frame protocol is built from.
///
/// The Vulkan engine implements this over real fences, semaphores and queues.
/// Every method is called from the single control thread.
pub trait FrameBackend {
    /// Identity of a fence. Two slots never share one.
    type Fence: Copy + Eq + fmt::Debug;

    /// Fence signaled when the work last submitted from `slot` completes.
    fn slot_fence(&self, slot: usize) -> Self::Fence;

    /// Blocks until `fence` is signaled.
    fn wait_fence(&mut self, fence: Self::Fence) -> RhiResult<()>;

    /// Returns `fence` to the unsignaled state.
    fn reset_fence(&mut self, fence: Self::Fence) -> RhiResult<()>;

    /// Acquires the next presentation image, signaling `slot`'s
    /// image-available semaphore.
    fn acquire(&mut self, slot: usize) -> RhiResult<AcquireOutcome>;

    /// Writes per-frame dynamic data for `image_index`.
    fn update_image(&mut self, image_index: u32) -> RhiResult<()>;

    /// Submits the commands recorded for `image_index`, signaling `slot`'s
    /// fence on completion.
    fn submit(&mut self, slot: usize, image_index: u32) -> RhiResult<()>;

    /// Presents `image_index` once `slot`'s render-finished semaphore fires.
    fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome>;

    /// Drains the device and rebuilds the presentation chain.
    fn rebuild(&mut self) -> RhiResult<RebuildOutcome>;

    /// Blocks until the device has finished all submitted work.
    fn wait_idle(&mut self) -> RhiResult<()>;
}

/// Index of the current frame slot, cycling through `[0, count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCursor {
    current: usize,
    count: usize,
}

impl FrameCursor {
    /// Creates a cursor over `count` slots, starting at slot 0.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] for a zero count.
    pub fn new(count: usize) -> RhiResult<Self> {
        if count == 0 {
            return Err(RhiError::InvalidArgument(
                "at least one frame in flight is required".to_string(),
            ));
        }
        Ok(Self { current: 0, count })
    }

    /// Current slot.
    #[inline]
    pub fn current(&self) -> usize {
        self.current
    }

    /// Number of slots.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Moves to the next slot.
    #[inline]
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.count;
    }
}

/// Per-image record of the fence whose submission last used the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageClaims<F> {
    claims: Vec<Option<F>>,
}

impl<F: Copy + Eq + fmt::Debug> ImageClaims<F> {
    /// Creates `image_count` unclaimed entries.
    pub fn new(image_count: usize) -> Self {
        Self {
            claims: vec![None; image_count],
        }
    }

    /// Number of images tracked.
    #[inline]
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    /// Returns true if no images are tracked.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Fence that last claimed `image_index`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] if the index is out of range.
    pub fn claimant(&self, image_index: u32) -> RhiResult<Option<F>> {
        self.claims
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| self.out_of_range(image_index))
    }

    /// Records `fence` as the claimant of `image_index`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] if the index is out of range.
    pub fn claim(&mut self, image_index: u32, fence: F) -> RhiResult<()> {
        let len = self.claims.len();
        match self.claims.get_mut(image_index as usize) {
            Some(entry) => {
                *entry = Some(fence);
                Ok(())
            }
            None => Err(RhiError::InvalidArgument(format!(
                "image index {} out of range for {} image(s)",
                image_index, len
            ))),
        }
    }

    /// Forgets every claim and resizes to `image_count` entries.
    ///
    /// Only valid once the device is idle.
    pub fn reset(&mut self, image_count: usize) {
        self.claims.clear();
        self.claims.resize(image_count, None);
    }

    fn out_of_range(&self, image_index: u32) -> RhiError {
        RhiError::InvalidArgument(format!(
            "image index {} out of range for {} image(s)",
            image_index,
            self.claims.len()
        ))
    }
}

/// Drives the per-frame submit/present protocol.
///
/// `F` is the backend's fence identity.
#[derive(Debug)]
pub struct FrameSynchronizer<F> {
    cursor: FrameCursor,
    claims: ImageClaims<F>,
    rebuild_pending: bool,
    frames_submitted: u64,
    rebuilds: u64,
}

impl<F: Copy + Eq + fmt::Debug> FrameSynchronizer<F> {
    /// Creates a synchronizer for `frames_in_flight` slots over a chain of
    /// `image_count` images.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] if `frames_in_flight` is zero.
    pub fn new(frames_in_flight: usize, image_count: usize) -> RhiResult<Self> {
        Ok(Self {
            cursor: FrameCursor::new(frames_in_flight)?,
            claims: ImageClaims::new(image_count),
            rebuild_pending: false,
            frames_submitted: 0,
            rebuilds: 0,
        })
    }

    /// Runs one iteration of the frame protocol.
    ///
    /// `resize_requested` is the window's edge-triggered resize flag, already
    /// taken by the caller. It forces a rebuild after presenting.
    ///
    /// # Errors
    ///
    /// Any backend error is fatal and returned unchanged. Stale acquire or
    /// present results are handled here by rebuilding.
    pub fn draw_frame<B>(&mut self, backend: &mut B, resize_requested: bool) -> RhiResult<FrameStatus>
    where
        B: FrameBackend<Fence = F>,
    {
        if self.rebuild_pending && self.try_rebuild(backend)? == RebuildOutcome::Deferred {
            return Ok(FrameStatus::Deferred);
        }

        let slot = self.cursor.current();
        let slot_fence = backend.slot_fence(slot);
        backend.wait_fence(slot_fence)?;

        let image_index = match backend.acquire(slot)? {
            AcquireOutcome::Acquired(index) => index,
            AcquireOutcome::Stale => {
                debug!("Acquire reported a stale chain, skipping frame");
                return Ok(match self.try_rebuild(backend)? {
                    RebuildOutcome::Rebuilt { .. } => FrameStatus::Skipped,
                    RebuildOutcome::Deferred => FrameStatus::Deferred,
                });
            }
        };

        if let Some(previous) = self.claims.claimant(image_index)?
            && previous != slot_fence
        {
            trace!(
                "Image {} still claimed by {:?}, waiting before reuse",
                image_index, previous
            );
            backend.wait_fence(previous)?;
        }
        self.claims.claim(image_index, slot_fence)?;

        backend.update_image(image_index)?;

        backend.reset_fence(slot_fence)?;
        backend.submit(slot, image_index)?;
        self.frames_submitted += 1;

        let presented = backend.present(slot, image_index)?;

        // A rebuild ends the iteration on the same slot. Its fence covers the
        // submission just made, so the next frame waits on it before reuse.
        if presented == PresentOutcome::Stale || resize_requested {
            debug!(
                "Rebuilding after present (stale={}, resize={})",
                presented == PresentOutcome::Stale,
                resize_requested
            );
            return Ok(match self.try_rebuild(backend)? {
                RebuildOutcome::Rebuilt { .. } => FrameStatus::PresentedAndRebuilt { slot, image_index },
                RebuildOutcome::Deferred => FrameStatus::Presented { slot, image_index },
            });
        }

        self.cursor.advance();
        Ok(FrameStatus::Presented { slot, image_index })
    }

    /// Waits for the device to finish all submitted work.
    ///
    /// Must be called before any synchronization object or resource the
    /// frames reference is destroyed.
    pub fn drain<B>(&mut self, backend: &mut B) -> RhiResult<()>
    where
        B: FrameBackend<Fence = F>,
    {
        backend.wait_idle()?;
        debug!(
            "Drained device after {} frame(s), {} rebuild(s)",
            self.frames_submitted, self.rebuilds
        );
        Ok(())
    }

    fn try_rebuild<B>(&mut self, backend: &mut B) -> RhiResult<RebuildOutcome>
    where
        B: FrameBackend<Fence = F>,
    {
        let outcome = backend.rebuild()?;
        match outcome {
            RebuildOutcome::Rebuilt { image_count } => {
                self.claims.reset(image_count);
                self.rebuild_pending = false;
                self.rebuilds += 1;
                debug!("Presentation chain rebuilt with {} image(s)", image_count);
            }
            RebuildOutcome::Deferred => {
                if !self.rebuild_pending {
                    debug!("Window has no area, deferring rebuild");
                }
                self.rebuild_pending = true;
            }
        }
        Ok(outcome)
    }

    /// Current frame slot.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.cursor.current()
    }

    /// Number of frame slots.
    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.cursor.count()
    }

    /// Per-image claim state.
    #[inline]
    pub fn claims(&self) -> &ImageClaims<F> {
        &self.claims
    }

    /// Returns true if a deferred rebuild is waiting for a nonzero window.
    #[inline]
    pub fn is_rebuild_pending(&self) -> bool {
        self.rebuild_pending
    }

    /// Total frames submitted.
    #[inline]
    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    /// Total successful rebuilds.
    #[inline]
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }
}
