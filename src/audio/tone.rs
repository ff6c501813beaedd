//! Synthetic sine-tone audio source for demos and tests

use std::f32::consts::TAU;
use std::time::{Duration, Instant};

use super::{AudioError, AudioFormat, AudioSource};

/// Peak level relative to full scale
const AMPLITUDE: f32 = 0.5;

/// Audio source producing a steady sine tone, paced to real time.
///
/// Each `read_block` waits until the stream position it is about to fill
/// comes due, mimicking a capture device that delivers samples at the
/// sample rate. Stands in where no real audio device is wired up.
pub struct ToneSource {
    format: AudioFormat,
    frequency: f32,

    /// Sample frames emitted so far
    position: u64,
    started: Option<Instant>,
}

impl ToneSource {
    pub fn new(format: AudioFormat, frequency: f32) -> Self {
        Self {
            format,
            frequency,
            position: 0,
            started: None,
        }
    }
}

impl AudioSource for ToneSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read_block(&mut self, buf: &mut [u8]) -> Result<usize, AudioError> {
        let started = *self.started.get_or_insert_with(Instant::now);

        let frame_bytes = self.format.block_align() as usize;
        let frames = buf.len() / frame_bytes;
        if frames == 0 {
            return Ok(0);
        }

        // Wait until real time catches up with the stream position
        let due = Duration::from_secs_f64(self.position as f64 / self.format.sample_rate as f64);
        let elapsed = started.elapsed();
        if due > elapsed {
            std::thread::sleep(due - elapsed);
        }

        for i in 0..frames {
            let t = (self.position + i as u64) as f32 / self.format.sample_rate as f32;
            let level = (t * self.frequency * TAU).sin() * AMPLITUDE;

            let offset = i * frame_bytes;
            match self.format.bits_per_sample {
                16 => {
                    let sample = ((level * i16::MAX as f32) as i16).to_le_bytes();
                    for ch in 0..self.format.channels as usize {
                        let at = offset + ch * 2;
                        buf[at..at + 2].copy_from_slice(&sample);
                    }
                }
                8 => {
                    // 8-bit WAV samples are unsigned, centered on 128
                    let sample = (128.0 + level * 127.0) as u8;
                    for ch in 0..self.format.channels as usize {
                        buf[offset + ch] = sample;
                    }
                }
                other => {
                    return Err(AudioError::Source(format!(
                        "unsupported bits per sample: {}",
                        other
                    )));
                }
            }
        }

        self.position += frames as u64;
        Ok(frames * frame_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_its_format() {
        let format = AudioFormat {
            sample_rate: 22_050,
            channels: 1,
            bits_per_sample: 16,
        };
        let source = ToneSource::new(format, 440.0);

        assert_eq!(source.format(), format);
    }

    #[test]
    fn test_fills_whole_frames() {
        let mut source = ToneSource::new(AudioFormat::default(), 440.0);

        let mut buf = vec![0u8; 1024];
        let n = source.read_block(&mut buf).unwrap();

        assert_eq!(n, 1024);
        assert_eq!(n % source.format().block_align() as usize, 0);
    }

    #[test]
    fn test_undersized_buffer_reads_nothing() {
        let mut source = ToneSource::new(AudioFormat::default(), 440.0);

        let mut buf = [0u8; 2];
        assert_eq!(source.read_block(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_samples_stay_within_amplitude() {
        let format = AudioFormat {
            sample_rate: 8_000,
            channels: 1,
            bits_per_sample: 16,
        };
        let mut source = ToneSource::new(format, 440.0);

        let mut buf = vec![0u8; 800];
        let n = source.read_block(&mut buf).unwrap();

        let ceiling = (i16::MAX as f32 * AMPLITUDE) as i16 + 1;
        for pair in buf[..n].chunks_exact(2) {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            assert!(sample.abs() <= ceiling, "sample {} out of range", sample);
        }
    }

    #[test]
    fn test_paced_roughly_to_real_time() {
        let format = AudioFormat {
            sample_rate: 8_000,
            channels: 1,
            bits_per_sample: 16,
        };
        let mut source = ToneSource::new(format, 440.0);

        // 1600 bytes = 800 frames = 100 ms per block
        let mut buf = vec![0u8; 1_600];
        let started = Instant::now();
        for _ in 0..3 {
            source.read_block(&mut buf).unwrap();
        }
        let elapsed = started.elapsed();

        // First block is immediate, the third is due at 200 ms
        assert!(elapsed >= Duration::from_millis(150), "ran too fast: {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "ran too slow: {:?}", elapsed);
    }
}
