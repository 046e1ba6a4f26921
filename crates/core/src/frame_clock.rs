//! Frame timing for the render loop.

use std::time::{Duration, Instant};

/// Tracks per-frame timing across the render loop.
///
/// The clock counts presented frames and keeps an exponentially smoothed
/// frame time, which is cheaper and less jittery than averaging over a
/// window.
#[derive(Debug)]
pub struct FrameClock {
    start: Instant,
    last_frame: Instant,
    frame_count: u64,
    smoothed_frame_time: f32,
}

/// Smoothing factor for the running frame-time estimate.
const SMOOTHING: f32 = 0.05;

impl FrameClock {
    /// Create a new clock, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_frame: now,
            frame_count: 0,
            smoothed_frame_time: 0.0,
        }
    }

    /// Mark the end of a frame and return the time it took.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_frame;
        self.last_frame = now;
        self.frame_count += 1;

        let delta_secs = delta.as_secs_f32();
        if self.frame_count == 1 {
            self.smoothed_frame_time = delta_secs;
        } else {
            self.smoothed_frame_time += (delta_secs - self.smoothed_frame_time) * SMOOTHING;
        }

        delta
    }

    /// Total elapsed time since the clock was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Number of frames ticked so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Smoothed frame time in seconds.
    pub fn frame_time(&self) -> f32 {
        self.smoothed_frame_time
    }

    /// Smoothed frames per second, or zero before the first tick.
    pub fn fps(&self) -> f32 {
        if self.smoothed_frame_time > 0.0 {
            1.0 / self.smoothed_frame_time
        } else {
            0.0
        }
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_count_advances() {
        let mut clock = FrameClock::new();
        assert_eq!(clock.frame_count(), 0);
        clock.tick();
        clock.tick();
        assert_eq!(clock.frame_count(), 2);
    }

    #[test]
    fn test_fps_zero_before_first_tick() {
        let clock = FrameClock::new();
        assert_eq!(clock.fps(), 0.0);
    }
}
