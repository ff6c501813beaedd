//! Mirror runtime statistics

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Shared atomic counters updated by the capture, relay, and broadcast loops.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    /// Frames acquired and encoded by the capture loop
    pub frames_captured: AtomicU64,

    /// Frames published to the exchange
    pub frames_published: AtomicU64,

    /// Capture iterations skipped on acquire/encode failure
    pub capture_failures: AtomicU64,

    /// Frame deliveries skipped because a client queue was full
    pub frames_lagged: AtomicU64,

    /// Audio blocks relayed to the audio client set
    pub audio_blocks: AtomicU64,

    /// Total clients accepted over the server lifetime
    pub clients_served: AtomicU64,
}

impl Counters {
    pub fn snapshot(&self, video_clients: usize, audio_clients: usize) -> MirrorStats {
        MirrorStats {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            frames_lagged: self.frames_lagged.load(Ordering::Relaxed),
            audio_blocks: self.audio_blocks.load(Ordering::Relaxed),
            clients_served: self.clients_served.load(Ordering::Relaxed),
            video_clients,
            audio_clients,
        }
    }
}

/// Point-in-time statistics snapshot for a running mirror server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorStats {
    /// Total frames successfully captured and encoded
    pub frames_captured: u64,

    /// Total frames published to the exchange
    pub frames_published: u64,

    /// Capture iterations skipped due to acquire or encode failure
    pub capture_failures: u64,

    /// Frame deliveries skipped for slow clients
    pub frames_lagged: u64,

    /// Audio blocks relayed
    pub audio_blocks: u64,

    /// Clients accepted since start
    pub clients_served: u64,

    /// Currently connected video clients
    pub video_clients: usize,

    /// Currently connected audio clients
    pub audio_clients: usize,
}

impl MirrorStats {
    /// Calculates the publish rate between two snapshots
    pub fn publish_fps(&self, previous: &Self, elapsed_secs: f64) -> f64 {
        if elapsed_secs == 0.0 {
            return 0.0;
        }

        let delta = self.frames_published.saturating_sub(previous.frames_published);
        delta as f64 / elapsed_secs
    }

    /// Fraction of frame deliveries skipped for slow clients
    pub fn lag_rate(&self) -> f64 {
        let total = self.frames_published + self.frames_lagged;
        if total == 0 {
            return 0.0;
        }

        self.frames_lagged as f64 / total as f64
    }
}
