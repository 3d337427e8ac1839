// Shared helpers for the playback tests
#![allow(dead_code)]

use std::f32::consts::TAU;
use std::io::Cursor;
use std::thread;
use std::time::{Duration, Instant};

use chime::audio::AudioDecoder;
use chime::AudioSource;

pub const SAMPLE_RATE: u32 = 8000;

/// 16-bit mono WAV with a 440 Hz tone
pub fn wav_clip(duration_ms: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let frames = SAMPLE_RATE * duration_ms / 1000;

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames {
            let t = i as f32 / SAMPLE_RATE as f32;
            writer.write_sample(((t * 440.0 * TAU).sin() * 12000.0) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn clip_source(id: &str, duration_ms: u32) -> AudioSource {
    AudioSource::from_bytes(id, wav_clip(duration_ms))
}

/// The PCM bytes a session should hand to its line for one pass over `source`
pub fn decoded(source: &AudioSource) -> Vec<u8> {
    AudioDecoder::decode_all(source.bytes()).unwrap().1
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
