//! Audio side channel: PCM source trait and the streaming WAV preamble

mod tone;

pub use tone::ToneSource;

use thiserror::Error;

// WAV format layout per http://soundfile.sapp.org/doc/WaveFormat/

/// Size of the WAV preamble in bytes (RIFF + fmt + data chunk headers)
pub const WAV_HEADER_SIZE: usize = 44;

/// Size of the fmt chunk data (16 bytes for PCM)
const WAV_FMT_CHUNK_SIZE: u32 = 16;

/// Audio format code for PCM (uncompressed)
const WAV_FORMAT_PCM: u16 = 1;

/// Chunk size stand-in for a stream with no known end
const WAV_STREAM_SIZE_PLACEHOLDER: u32 = i32::MAX as u32;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("i/o error reading audio: {0}")]
    Io(#[from] std::io::Error),

    #[error("audio source error: {0}")]
    Source(String),
}

/// PCM format, fixed for the lifetime of a server instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz (e.g. 16000, 44100, 48000)
    pub sample_rate: u32,

    /// Number of channels (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Bits per sample (8 or 16)
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// Bytes of PCM per second at this format
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * u32::from(self.channels) * u32::from(self.bits_per_sample / 8)
    }

    /// Bytes per sample frame across all channels
    pub fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            bits_per_sample: 16,
        }
    }
}

/// Supplies raw PCM blocks in a fixed declared format.
///
/// `read_block` fills the buffer with the next bytes of the stream and
/// returns how many were written; `Ok(0)` means nothing is available
/// right now. Implementations are expected to pace themselves roughly to
/// real time, the way a microphone or loopback device naturally does.
pub trait AudioSource: Send {
    /// The source's PCM format; sampled once when the server starts
    fn format(&self) -> AudioFormat;

    fn read_block(&mut self, buf: &mut [u8]) -> Result<usize, AudioError>;
}

/// Builds the 44-byte preamble sent before the endless PCM stream.
///
/// A live stream has no known length, so the RIFF and data chunk sizes
/// carry the Int32 maximum; players then treat the data chunk as
/// unbounded and keep reading.
pub fn wav_stream_header(format: &AudioFormat) -> [u8; WAV_HEADER_SIZE] {
    let mut header = [0u8; WAV_HEADER_SIZE];

    // RIFF container header
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&WAV_STREAM_SIZE_PLACEHOLDER.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    // fmt subchunk
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&WAV_FMT_CHUNK_SIZE.to_le_bytes());
    header[20..22].copy_from_slice(&WAV_FORMAT_PCM.to_le_bytes());
    header[22..24].copy_from_slice(&format.channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&format.byte_rate().to_le_bytes());
    header[32..34].copy_from_slice(&format.block_align().to_le_bytes());
    header[34..36].copy_from_slice(&format.bits_per_sample.to_le_bytes());

    // data subchunk header, unbounded
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&WAV_STREAM_SIZE_PLACEHOLDER.to_le_bytes());

    header
}
