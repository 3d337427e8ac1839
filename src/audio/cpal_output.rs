// Audio output using cpal
// Each line owns its own device stream, fed through a ring buffer

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use parking_lot::Mutex;
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error};

use crate::audio::format::{bytes_to_samples, AudioFormat, BYTES_PER_SAMPLE};
use crate::audio::output::{AudioBackend, GainControl, OutputLine};
use crate::error::{Error, Result};
use crate::settings::OutputSettings;

type RingProducer = ringbuf::HeapProd<f32>;
type RingConsumer = ringbuf::HeapCons<f32>;

/// Smallest ring, in samples, regardless of configured latency
const MIN_RING_SAMPLES: usize = 1024;

/// Ring capacity in samples for `ring_ms` of audio in `format`
fn ring_capacity(format: &AudioFormat, ring_ms: u32) -> usize {
    let samples = format.sample_rate as u64 * format.channels as u64 * ring_ms as u64 / 1000;
    (samples as usize).max(MIN_RING_SAMPLES)
}

/// Opens lines on the configured (or default) cpal output device
pub struct CpalBackend {
    settings: OutputSettings,
}

impl CpalBackend {
    pub fn new(settings: OutputSettings) -> Self {
        Self { settings }
    }

    /// Names of the output devices on the default host
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| Error::LineUnavailable(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();
        Ok(devices)
    }

    fn device(&self) -> Result<Device> {
        let host = cpal::default_host();

        match &self.settings.device {
            Some(name) => host
                .output_devices()
                .map_err(|e| Error::LineUnavailable(format!("Failed to enumerate devices: {}", e)))?
                .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
                .ok_or_else(|| Error::LineUnavailable(format!("Output device '{}' not found", name))),
            None => host
                .default_output_device()
                .ok_or_else(|| Error::LineUnavailable("No output device available".to_string())),
        }
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn open_line(&self, format: &AudioFormat) -> Result<Box<dyn OutputLine>> {
        let device = self.device()?;
        let line = CpalLine::open(&device, format, &self.settings)?;
        Ok(Box::new(line))
    }
}

pub struct CpalLine {
    stream: Option<Stream>,
    producer: Arc<Mutex<RingProducer>>,
    format: AudioFormat,
    gain: GainControl,
    clear_flag: Arc<AtomicBool>,
    error_flag: Arc<AtomicBool>,
    carry: Vec<u8>,
    drain_timeout: Duration,
}

impl CpalLine {
    /// Open a stream on `device` with exactly the channel count and sample rate of `format`
    pub fn open(device: &Device, format: &AudioFormat, settings: &OutputSettings) -> Result<Self> {
        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::LineUnavailable(format!("Failed to query output configs: {}", e)))?
            .filter(|c| {
                c.channels() == format.channels
                    && c.min_sample_rate().0 <= format.sample_rate
                    && format.sample_rate <= c.max_sample_rate().0
            })
            .max_by_key(|c| c.sample_format() == SampleFormat::F32)
            .ok_or_else(|| {
                Error::LineUnavailable(format!(
                    "No output config for {} Hz, {} channel(s)",
                    format.sample_rate, format.channels
                ))
            })?;

        let config = supported.with_sample_rate(cpal::SampleRate(format.sample_rate));
        let sample_format = config.sample_format();
        let stream_config: StreamConfig = config.into();

        let rb = HeapRb::<f32>::new(ring_capacity(format, settings.ring_buffer_ms));
        let (producer, consumer) = rb.split();
        let producer = Arc::new(Mutex::new(producer));
        let consumer = Arc::new(Mutex::new(consumer));

        let gain = GainControl::default();
        let clear_flag = Arc::new(AtomicBool::new(false));
        let error_flag = Arc::new(AtomicBool::new(false));

        let stream = match sample_format {
            SampleFormat::F32 => Self::build_stream::<f32>(
                device,
                &stream_config,
                consumer,
                gain.clone(),
                clear_flag.clone(),
                error_flag.clone(),
            )?,
            SampleFormat::I16 => Self::build_stream::<i16>(
                device,
                &stream_config,
                consumer,
                gain.clone(),
                clear_flag.clone(),
                error_flag.clone(),
            )?,
            SampleFormat::U16 => Self::build_stream::<u16>(
                device,
                &stream_config,
                consumer,
                gain.clone(),
                clear_flag.clone(),
                error_flag.clone(),
            )?,
            other => {
                return Err(Error::LineUnavailable(format!(
                    "Unsupported sample format: {:?}",
                    other
                )))
            }
        };

        debug!(
            "Opened cpal line: {} Hz, {} channel(s), {:?}",
            format.sample_rate, format.channels, sample_format
        );

        Ok(Self {
            stream: Some(stream),
            producer,
            format: *format,
            gain,
            clear_flag,
            error_flag,
            carry: Vec::with_capacity(BYTES_PER_SAMPLE),
            drain_timeout: Duration::from_millis(settings.drain_timeout_ms as u64),
        })
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &Device,
        config: &StreamConfig,
        consumer: Arc<Mutex<RingConsumer>>,
        gain: GainControl,
        clear_flag: Arc<AtomicBool>,
        error_flag: Arc<AtomicBool>,
    ) -> Result<Stream> {
        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let mut consumer = consumer.lock();
                    let vol = gain.linear();

                    // If clear flag is set, drain the buffer and output silence
                    if clear_flag.swap(false, Ordering::SeqCst) {
                        while consumer.try_pop().is_some() {}
                    }

                    for sample in data.iter_mut() {
                        let value = consumer.try_pop().unwrap_or(0.0) * vol;
                        *sample = T::from_sample(value);
                    }
                },
                move |err| {
                    error!("Audio output error: {}", err);
                    error_flag.store(true, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| Error::LineUnavailable(format!("Failed to build output stream: {}", e)))
    }

    /// Push samples, sleeping while the ring is full
    fn push_blocking(&self, samples: &[f32]) -> Result<()> {
        let mut remaining = samples;

        while !remaining.is_empty() {
            if self.error_flag.load(Ordering::SeqCst) {
                return Err(Error::StreamIo("output device reported an error".to_string()));
            }

            let written = self.producer.lock().push_slice(remaining);
            if written > 0 {
                remaining = &remaining[written..];
            } else {
                thread::sleep(Duration::from_millis(1));
            }
        }

        Ok(())
    }
}

impl OutputLine for CpalLine {
    fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn start(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| Error::InvalidState("line is closed".to_string()))?;
        stream
            .play()
            .map_err(|e| Error::LineUnavailable(format!("Failed to start stream: {}", e)))
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.stream.is_none() {
            return Err(Error::StreamIo("write to a closed line".to_string()));
        }

        self.carry.extend_from_slice(data);
        let whole = self.carry.len() - self.carry.len() % BYTES_PER_SAMPLE;
        let samples: Vec<f32> = bytes_to_samples(&self.carry[..whole]).collect();
        self.carry.drain(..whole);

        self.push_blocking(&samples)?;
        Ok(data.len())
    }

    fn flush(&mut self) {
        self.carry.clear();
        // The callback drains the ring on its next run
        self.clear_flag.store(true, Ordering::SeqCst);
    }

    fn drain(&mut self) {
        if self.stream.is_none() {
            return;
        }

        let deadline = Instant::now() + self.drain_timeout;
        while self.producer.lock().occupied_len() > 0 {
            if Instant::now() >= deadline || self.error_flag.load(Ordering::SeqCst) {
                debug!("Gave up draining cpal line");
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            // The stream is dropped right after; a failed pause changes nothing
            let _ = stream.pause();
            debug!("Closed cpal line");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn gain_control(&self) -> Option<GainControl> {
        Some(self.gain.clone())
    }
}

impl Drop for CpalLine {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_capacity() {
        let format = AudioFormat::new(48000, 2);
        assert_eq!(ring_capacity(&format, 250), 24_000);
        assert_eq!(ring_capacity(&format, 1), MIN_RING_SAMPLES);
    }
}
