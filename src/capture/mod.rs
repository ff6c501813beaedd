//! Frame acquisition and JPEG encoding

mod jpeg;
mod pattern;

pub use jpeg::JpegCompressor;
pub use pattern::TestPatternSource;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::exchange::FrameExchange;
use crate::stats::Counters;

/// Poll again this soon when the source has nothing ready
const EMPTY_POLL_BACKOFF: Duration = Duration::from_millis(5);

/// Backoff after a failed acquire or encode
const FAILURE_BACKOFF: Duration = Duration::from_millis(50);

/// Longest uninterrupted sleep while pacing, so the loop notices a
/// cleared running flag even at low frame rates
const PACE_SLICE: Duration = Duration::from_millis(20);

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("frame source error: {0}")]
    Source(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("frame buffer is {actual} bytes, expected {expected} for {width}x{height} rgb")]
    BadFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// Uncompressed RGB8 bitmap handed over by a frame source
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,

    /// Row-major RGB8 pixel data, `width * height * 3` bytes
    pub pixels: Vec<u8>,
}

impl RawFrame {
    /// Creates a frame, checking that the pixel buffer matches the dimensions
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, CaptureError> {
        let expected = Self::expected_len(width, height);
        if pixels.len() != expected {
            return Err(CaptureError::BadFrame {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }

        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Buffer length required for an RGB8 frame of the given dimensions
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }
}

/// Produces raw frames; a screen grabber, camera, or synthetic generator.
///
/// `try_acquire` polls without blocking for long: `Ok(None)` means nothing
/// is ready yet and the caller should back off briefly and retry.
pub trait FrameSource: Send {
    fn try_acquire(&mut self) -> Result<Option<RawFrame>, CaptureError>;
}

/// Compresses raw frames to JPEG at a quality between 1 and 100
pub trait FrameEncoder: Send {
    fn compress(&mut self, frame: &RawFrame, quality: u8) -> Result<Vec<u8>, CaptureError>;
}

/// Producer loop: poll, encode, publish, pace.
///
/// Runs on its own thread until `running` clears. A failed acquire or
/// encode skips that iteration after a short backoff; the loop itself
/// never dies from a single bad frame.
pub(crate) fn run_capture_loop(
    mut source: Box<dyn FrameSource>,
    mut encoder: Box<dyn FrameEncoder>,
    quality: u8,
    frame_interval: Duration,
    exchange: Arc<FrameExchange>,
    counters: Arc<Counters>,
    running: Arc<AtomicBool>,
) {
    debug!(
        quality = %quality,
        interval_ms = %frame_interval.as_millis(),
        "capture loop started"
    );

    while running.load(Ordering::Relaxed) {
        let iteration = Instant::now();

        let raw = match source.try_acquire() {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                std::thread::sleep(EMPTY_POLL_BACKOFF);
                continue;
            }
            Err(e) => {
                counters.capture_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "frame acquire failed, skipping iteration");
                std::thread::sleep(FAILURE_BACKOFF);
                continue;
            }
        };
        counters.frames_captured.fetch_add(1, Ordering::Relaxed);

        match encoder.compress(&raw, quality) {
            Ok(jpeg) => {
                let sequence = exchange.publish(Bytes::from(jpeg));
                counters.frames_published.fetch_add(1, Ordering::Relaxed);
                trace!(sequence = %sequence, "frame published");
            }
            Err(e) => {
                counters.capture_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "frame encode failed, skipping iteration");
                std::thread::sleep(FAILURE_BACKOFF);
                continue;
            }
        }

        // Pace to the configured frame rate, staying responsive to stop
        let elapsed = iteration.elapsed();
        if elapsed < frame_interval {
            pace_sleep(frame_interval - elapsed, &running);
        }
    }

    debug!("capture loop stopped");
}

/// Sleeps up to `total` in slices, returning early once `running` clears
fn pace_sleep(total: Duration, running: &AtomicBool) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::Relaxed) {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            break;
        }
        std::thread::sleep(left.min(PACE_SLICE));
    }
}
