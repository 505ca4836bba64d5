//! Frame clock.

use std::time::{Duration, Instant};

/// Timing for one frame, returned by [`Timer::begin_frame`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTick {
    /// 1-based frame number.
    pub frame: u64,
    /// Time since the previous frame began.
    pub delta: Duration,
    /// Time since the timer started.
    pub elapsed: Duration,
}

impl FrameTick {
    /// 0-based frame index.
    #[inline]
    pub fn index(&self) -> u64 {
        self.frame.saturating_sub(1)
    }

    /// Returns true on the first frame and every `interval` frames after it.
    #[inline]
    pub fn every(&self, interval: u64) -> bool {
        interval != 0 && self.index() % interval == 0
    }
}

/// Measures elapsed time and counts frames.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    frames: u64,
}

impl Timer {
    /// Creates a timer starting now with no frames counted.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            frames: 0,
        }
    }

    /// Total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed time in seconds.
    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    /// Counts a new frame and returns its timing.
    pub fn begin_frame(&mut self) -> FrameTick {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        self.frames += 1;

        FrameTick {
            frame: self.frames,
            delta,
            elapsed: now - self.start,
        }
    }

    /// Number of frames counted so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_count_from_one() {
        let mut timer = Timer::new();
        assert_eq!(timer.frames(), 0);
        assert_eq!(timer.begin_frame().frame, 1);
        assert_eq!(timer.begin_frame().frame, 2);
        assert_eq!(timer.frames(), 2);
    }

    #[test]
    fn test_elapsed_is_monotonic() {
        let mut timer = Timer::new();
        let first = timer.begin_frame();
        std::thread::sleep(Duration::from_millis(2));
        let second = timer.begin_frame();
        assert!(second.elapsed > first.elapsed);
        assert!(second.delta >= Duration::from_millis(2));
    }

    #[test]
    fn test_every_ninetieth_frame_from_the_first() {
        let mut timer = Timer::new();
        let logged: Vec<u64> = (0..200)
            .map(|_| timer.begin_frame())
            .filter(|tick| tick.every(90))
            .map(|tick| tick.index())
            .collect();
        assert_eq!(logged, vec![0, 90, 180]);
    }

    #[test]
    fn test_zero_interval_never_matches() {
        let mut timer = Timer::new();
        assert!(!timer.begin_frame().every(0));
    }
}
