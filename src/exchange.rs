//! Latest-wins frame hand-off between the capture thread and the push loop
//!
//! Single producer, many consumers. Two payload slots are guarded by one
//! lock; the producer always writes the slot consumers are not reading,
//! then flips a live index and bumps a monotonic sequence number. A watch
//! channel wakes waiting consumers. Publishing never blocks on consumers,
//! and a consumer always observes the newest frame at the moment it reads.

use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;

/// A published frame: compressed payload plus its position in the stream
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic sequence number, starting at 1 for the first publish
    pub sequence: u64,

    /// Compressed (JPEG) payload
    pub payload: Bytes,

    /// When the payload was published
    pub produced_at: Instant,
}

impl Frame {
    /// Time elapsed since this frame was published
    pub fn age(&self) -> Duration {
        self.produced_at.elapsed()
    }
}

struct Slots {
    frames: [Option<Frame>; 2],
    live: usize,
    sequence: u64,
}

/// Double-buffered frame slot with a monotonic sequence number
pub struct FrameExchange {
    slots: Mutex<Slots>,
    seq_tx: watch::Sender<u64>,
}

impl FrameExchange {
    pub fn new() -> Self {
        let (seq_tx, _) = watch::channel(0);

        Self {
            slots: Mutex::new(Slots {
                frames: [None, None],
                live: 0,
                sequence: 0,
            }),
            seq_tx,
        }
    }

    /// Publishes a frame, replacing whatever consumers have not yet read.
    ///
    /// Writes the back slot, flips the live index, bumps the sequence
    /// number, and wakes waiters. Never blocks on consumers; the payload
    /// a slow consumer still holds stays alive through its `Bytes` handle.
    ///
    /// Returns the sequence number assigned to the frame.
    pub fn publish(&self, payload: Bytes) -> u64 {
        let sequence = {
            let mut slots = self.slots.lock();
            let back = slots.live ^ 1;
            slots.sequence += 1;
            slots.frames[back] = Some(Frame {
                sequence: slots.sequence,
                payload,
                produced_at: Instant::now(),
            });
            slots.live = back;
            slots.sequence
        };

        self.seq_tx.send_replace(sequence);
        sequence
    }

    /// Sequence number of the most recently published frame (0 before any)
    pub fn sequence(&self) -> u64 {
        *self.seq_tx.borrow()
    }

    /// Non-blocking read of the newest frame, if any has been published
    pub fn latest(&self) -> Option<Frame> {
        let slots = self.slots.lock();
        slots.frames[slots.live].clone()
    }

    /// Waits until a frame newer than `since_sequence` is available, or
    /// until `max_wait` elapses.
    ///
    /// Returns the newest frame at wake-up time, which may be several
    /// sequence numbers ahead of `since_sequence + 1`; intermediate frames
    /// are skipped by design. `None` means the wait timed out, giving the
    /// caller a bounded interval to re-check its running flag.
    pub async fn await_next(&self, since_sequence: u64, max_wait: Duration) -> Option<Frame> {
        let mut seq_rx = self.seq_tx.subscribe();

        let waited = tokio::time::timeout(
            max_wait,
            seq_rx.wait_for(|seq| *seq > since_sequence),
        )
        .await;

        match waited {
            Ok(Ok(_)) => self.latest(),
            // Sender lives as long as self, so Err here only means timeout
            _ => None,
        }
    }
}

impl Default for FrameExchange {
    fn default() -> Self {
        Self::new()
    }
}
