//! Wall-clock timing for the demo loop.
//!
//! The simulation advances by its fixed `dt` uniform, so wall time never
//! feeds the kernels; it only drives the FPS readout and the pause toggle.

use std::time::{Duration, Instant};

const FPS_WINDOW: Duration = Duration::from_millis(500);

/// Frame clock with a smoothed FPS readout.
#[derive(Debug)]
pub struct Time {
    start: Instant,
    last_frame: Instant,
    delta_secs: f32,
    frame_count: u64,
    fps: f32,
    window_start: Instant,
    window_frames: u64,
    paused: bool,
}

impl Time {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_frame: now,
            delta_secs: 0.0,
            frame_count: 0,
            fps: 0.0,
            window_start: now,
            window_frames: 0,
            paused: false,
        }
    }

    /// Advances the clock by one frame and returns the wall-clock delta in
    /// seconds. While paused the delta is zero and frames are not counted,
    /// but `last_frame` keeps moving so unpausing never produces a jump.
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        if self.paused {
            self.last_frame = now;
            self.delta_secs = 0.0;
            return 0.0;
        }
        self.delta_secs = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.frame_count += 1;

        let window = now.duration_since(self.window_start);
        if window >= FPS_WINDOW {
            self.fps = (self.frame_count - self.window_frames) as f32 / window.as_secs_f32();
            self.window_frames = self.frame_count;
            self.window_start = now;
        }
        self.delta_secs
    }

    /// Wall-clock seconds since the clock was created.
    pub fn elapsed(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }

    /// Delta of the most recent tick in seconds.
    pub fn delta(&self) -> f32 {
        self.delta_secs
    }

    /// Ticks counted while unpaused.
    pub fn frame(&self) -> u64 {
        self.frame_count
    }

    /// Smoothed frames per second, refreshed twice a second. Zero until the
    /// first window completes.
    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }
}

impl Default for Time {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_tick_counts_frames() {
        let mut time = Time::new();
        assert_eq!(time.frame(), 0);
        thread::sleep(Duration::from_millis(5));
        let delta = time.tick();
        assert!(delta > 0.0);
        assert_eq!(time.frame(), 1);
        assert!(time.elapsed() >= delta);
    }

    #[test]
    fn test_pause_zeroes_delta() {
        let mut time = Time::new();
        time.tick();
        time.toggle_pause();
        assert!(time.is_paused());
        thread::sleep(Duration::from_millis(5));
        assert_eq!(time.tick(), 0.0);
        assert_eq!(time.frame(), 1);

        // Unpausing must not replay the paused interval as one huge delta.
        time.toggle_pause();
        let delta = time.tick();
        assert!(delta < 0.005, "delta after unpause was {delta}");
    }

    #[test]
    fn test_fps_starts_unsampled() {
        let time = Time::new();
        assert_eq!(time.fps(), 0.0);
    }
}
