//! Synthetic animated frame source for demos and tests

use super::{CaptureError, FrameSource, RawFrame};

/// Frame source producing an animated RGB gradient.
///
/// Always has a frame ready; the capture loop's pacing sets the effective
/// frame rate. Stands in where no real screen grabber is wired up.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    tick: u64,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tick: 0,
        }
    }
}

impl FrameSource for TestPatternSource {
    fn try_acquire(&mut self) -> Result<Option<RawFrame>, CaptureError> {
        let shift = (self.tick % 256) as u32;
        self.tick += 1;

        let mut pixels = Vec::with_capacity(RawFrame::expected_len(self.width, self.height));
        for y in 0..self.height {
            for x in 0..self.width {
                pixels.push(((x + shift) & 0xFF) as u8);
                pixels.push((y & 0xFF) as u8);
                pixels.push((((x + y) ^ shift) & 0xFF) as u8);
            }
        }

        let frame = RawFrame::new(self.width, self.height, pixels)?;
        Ok(Some(frame))
    }
}
