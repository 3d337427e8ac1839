// Audio decoder using Symphonia
// Decodes an in-memory sound to a stream of interleaved f32 PCM bytes

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use symphonia::core::audio::{AudioBufferRef, AudioPlanes, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use tracing::warn;

use crate::audio::format::AudioFormat;
use crate::error::{Error, Result};

pub struct AudioDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    audio_format: AudioFormat,
    duration: Option<Duration>,
    pending: Vec<u8>,
    pending_pos: usize,
    position: u64,
    finished: bool,
}

impl AudioDecoder {
    /// Probe the bytes and prepare the first audio track for decoding
    pub fn open(bytes: Arc<[u8]>) -> Result<Self> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let probed = symphonia::default::get_probe()
            .format(&Hint::new(), mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to probe format: {}", e)))?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decode("No audio track found".to_string()))?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
        let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2);

        let duration = track
            .codec_params
            .n_frames
            .map(|frames| Duration::from_secs_f64(frames as f64 / sample_rate as f64));

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            audio_format: AudioFormat::new(sample_rate, channels as u16),
            duration,
            pending: Vec::new(),
            pending_pos: 0,
            position: 0,
            finished: false,
        })
    }

    /// Decode a whole sound in one go
    pub fn decode_all(bytes: Arc<[u8]>) -> Result<(AudioFormat, Vec<u8>)> {
        let mut decoder = Self::open(bytes)?;
        let mut pcm = Vec::new();
        let mut chunk = [0u8; 4096];
        while let Some(n) = decoder.read(&mut chunk)? {
            pcm.extend_from_slice(&chunk[..n]);
        }
        Ok((decoder.format(), pcm))
    }

    pub fn format(&self) -> AudioFormat {
        self.audio_format
    }

    /// Total length, if the container reports a frame count
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// PCM bytes handed out so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Copy the next PCM bytes into `buf`.
    /// Returns `None` once the stream is exhausted.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        while self.pending_pos >= self.pending.len() {
            if self.finished {
                return Ok(None);
            }
            match self.decode_next()? {
                Some(samples) => {
                    self.pending.clear();
                    self.pending_pos = 0;
                    for sample in samples {
                        self.pending.extend_from_slice(&sample.to_le_bytes());
                    }
                }
                None => {
                    self.finished = true;
                    return Ok(None);
                }
            }
        }

        let n = buf.len().min(self.pending.len() - self.pending_pos);
        buf[..n].copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
        self.pending_pos += n;
        self.position += n as u64;
        Ok(Some(n))
    }

    /// Decode next packet, returns interleaved f32 samples
    /// Returns None when end of stream is reached
    fn decode_next(&mut self) -> Result<Option<Vec<f32>>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(Error::StreamIo(format!("Failed to read packet: {}", e))),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    return Ok(Some(Self::audio_buf_to_f32(&decoded)));
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Decode error (skipping packet): {}", e);
                    continue;
                }
                Err(e) => return Err(Error::StreamIo(format!("Decode failed: {}", e))),
            }
        }
    }

    /// Convert any AudioBufferRef to interleaved f32 samples
    fn audio_buf_to_f32(buf: &AudioBufferRef) -> Vec<f32> {
        match buf {
            AudioBufferRef::F32(b) => Self::interleave_convert(b.planes(), b.frames(), |s: f32| s),
            AudioBufferRef::F64(b) => {
                Self::interleave_convert(b.planes(), b.frames(), |s: f64| s as f32)
            }
            AudioBufferRef::S8(b) => {
                let scale = 1.0 / 128.0;
                Self::interleave_convert(b.planes(), b.frames(), |s: i8| s as f32 * scale)
            }
            AudioBufferRef::S16(b) => {
                let scale = 1.0 / 32768.0;
                Self::interleave_convert(b.planes(), b.frames(), |s: i16| s as f32 * scale)
            }
            AudioBufferRef::S24(b) => {
                let scale = 1.0 / 8388608.0;
                Self::interleave_convert(b.planes(), b.frames(), |s| s.inner() as f32 * scale)
            }
            AudioBufferRef::S32(b) => {
                let scale = 1.0 / 2147483648.0;
                Self::interleave_convert(b.planes(), b.frames(), |s: i32| s as f32 * scale)
            }
            AudioBufferRef::U8(b) => {
                Self::interleave_convert(b.planes(), b.frames(), |s: u8| (s as f32 - 128.0) / 128.0)
            }
            AudioBufferRef::U16(b) => Self::interleave_convert(b.planes(), b.frames(), |s: u16| {
                (s as f32 - 32768.0) / 32768.0
            }),
            AudioBufferRef::U24(b) => Self::interleave_convert(b.planes(), b.frames(), |s| {
                (s.inner() as f32 - 8388608.0) / 8388608.0
            }),
            AudioBufferRef::U32(b) => Self::interleave_convert(b.planes(), b.frames(), |s: u32| {
                (s as f64 - 2147483648.0) as f32 / 2147483648.0
            }),
        }
    }

    fn interleave_convert<T: Sample + Copy, F: Fn(T) -> f32>(
        planes: AudioPlanes<T>,
        frames: usize,
        convert: F,
    ) -> Vec<f32> {
        let num_channels = planes.planes().len();
        if num_channels == 0 || frames == 0 {
            return vec![];
        }

        let mut interleaved = Vec::with_capacity(frames * num_channels);

        for frame in 0..frames {
            for ch in 0..num_channels {
                interleaved.push(convert(planes.planes()[ch][frame]));
            }
        }

        interleaved
    }
}

/// A pull source of interleaved f32 PCM bytes, as consumed by a session
pub trait PcmStream: Send {
    fn format(&self) -> AudioFormat;
    /// Next PCM bytes into `buf`; `None` at end of stream
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>>;
}

impl PcmStream for AudioDecoder {
    fn format(&self) -> AudioFormat {
        AudioDecoder::format(self)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        AudioDecoder::read(self, buf)
    }
}
