// PCM format shared by the decoder and the output line
// Samples travel between them as interleaved little-endian f32 bytes

use std::time::Duration;

/// Size of one PCM sample on the wire
pub const BYTES_PER_SAMPLE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Bytes per frame (one sample for every channel)
    pub fn frame_size(&self) -> usize {
        self.channels as usize * BYTES_PER_SAMPLE
    }

    /// Bytes per second of audio
    pub fn byte_rate(&self) -> u64 {
        self.sample_rate as u64 * self.frame_size() as u64
    }

    /// Playback time of `bytes` bytes in this format
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let rate = self.byte_rate();
        if rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(bytes as f64 / rate as f64)
    }
}

/// Decode little-endian f32 PCM bytes; a trailing partial sample is ignored
pub fn bytes_to_samples(bytes: &[u8]) -> impl Iterator<Item = f32> + '_ {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        let format = AudioFormat::new(48000, 2);
        assert_eq!(format.frame_size(), 8);
        assert_eq!(format.byte_rate(), 384_000);
        assert_eq!(format.duration_of(384_000), Duration::from_secs(1));
    }

    #[test]
    fn test_bytes_to_samples() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0.5f32.to_le_bytes());
        bytes.extend_from_slice(&(-1.0f32).to_le_bytes());
        bytes.push(0xFF);

        let samples: Vec<f32> = bytes_to_samples(&bytes).collect();
        assert_eq!(samples, vec![0.5, -1.0]);
    }
}
