//! Synthetic camera producing a moving colour gradient
//!
//! Stands in for a real camera driver in the CLI and in tests.

use std::time::{Duration, Instant};

use super::{Frame, MediaSource, RGB_BYTES_PER_PIXEL};

/// Frame source that renders a test pattern on demand
pub struct TestPatternSource {
    width: u32,
    height: u32,
    /// Frames produced so far
    produced: u64,
    /// Stop producing after this many frames
    limit: Option<u64>,
    /// Minimum spacing between frames, emulating a native capture rate
    interval: Option<Duration>,
    last_frame: Option<Instant>,
    released: bool,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            produced: 0,
            limit: None,
            interval: None,
            last_frame: None,
            released: false,
        }
    }

    /// Cap the total number of frames
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    /// Emulate a camera running at `fps`
    pub fn with_frame_rate(mut self, fps: u32) -> Self {
        if fps > 0 {
            self.interval = Some(Duration::from_secs(1) / fps);
        }
        self
    }

    pub fn frames_produced(&self) -> u64 {
        self.produced
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn render(&self) -> Frame {
        let (w, h) = (self.width as usize, self.height as usize);
        let shift = (self.produced * 4) as usize;
        let mut data = Vec::with_capacity(w * h * RGB_BYTES_PER_PIXEL);
        for y in 0..h {
            for x in 0..w {
                data.push(((x + shift) * 255 / w.max(1)) as u8);
                data.push((y * 255 / h.max(1)) as u8);
                data.push((shift % 256) as u8);
            }
        }
        Frame {
            width: self.width,
            height: self.height,
            data,
        }
    }
}

impl MediaSource for TestPatternSource {
    fn get_frame(&mut self) -> Option<Frame> {
        if self.released || self.limit.is_some_and(|limit| self.produced >= limit) {
            return None;
        }

        let now = Instant::now();
        if let (Some(interval), Some(last)) = (self.interval, self.last_frame) {
            if now.duration_since(last) < interval {
                return None;
            }
        }

        let frame = self.render();
        self.produced += 1;
        self.last_frame = Some(now);
        Some(frame)
    }

    fn release(&mut self) {
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_dimensions() {
        let mut source = TestPatternSource::new(64, 48);
        let frame = source.get_frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (64, 48));
        assert_eq!(frame.data().len(), 64 * 48 * 3);
    }

    #[test]
    fn test_limit_and_release() {
        let mut source = TestPatternSource::new(8, 8).with_limit(2);
        assert!(source.get_frame().is_some());
        assert!(source.get_frame().is_some());
        assert!(source.get_frame().is_none());
        assert_eq!(source.frames_produced(), 2);

        let mut source = TestPatternSource::new(8, 8);
        source.release();
        assert!(source.get_frame().is_none());
    }

    #[test]
    fn test_frame_rate_spacing() {
        let mut source = TestPatternSource::new(8, 8).with_frame_rate(1);
        assert!(source.get_frame().is_some());
        // Second poll lands well inside the one second interval
        assert!(source.get_frame().is_none());
    }
}
