//! Local screen mirroring over plain HTTP
//!
//! This library pushes a live frame feed to any number of browser viewers with:
//! - A latest-wins frame exchange, so a slow viewer never stalls the capture side
//! - Motion JPEG delivery via `multipart/x-mixed-replace` on a hand-rolled HTTP loop
//! - An optional raw PCM audio channel served as an endless streaming WAV
//! - Zero-copy fan-out using `bytes::Bytes`
//!
//! # Example
//!
//! ```no_run
//! use zap_mirror::{JpegCompressor, MirrorConfig, MirrorServer, TestPatternSource};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = MirrorConfig::default();
//! let server = MirrorServer::new(config, TestPatternSource::new(1280, 720), JpegCompressor::new());
//!
//! let handle = server.start().await?;
//! println!("viewers: http://localhost:{}/video", handle.port());
//! // ... later
//! handle.stop();
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod capture;
pub mod config;
pub mod exchange;
pub mod http;
pub mod server;
pub mod stats;

// Re-exports for convenience
pub use audio::{wav_stream_header, AudioError, AudioFormat, AudioSource, ToneSource};
pub use capture::{CaptureError, FrameEncoder, FrameSource, JpegCompressor, RawFrame, TestPatternSource};
pub use config::{AudioConfig, Config, ConfigError, MirrorConfig};
pub use exchange::{Frame, FrameExchange};
pub use server::{MirrorHandle, MirrorServer, ServerError};
pub use stats::MirrorStats;
