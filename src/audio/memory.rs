// In-memory output backend
// Records everything written to its lines; stands in for a device in headless runs and tests

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::audio::format::AudioFormat;
use crate::audio::output::{AudioBackend, GainControl, OutputLine, MAX_GAIN_DB, SILENCE_FLOOR_DB};
use crate::error::{Error, Result};

/// What happened to one line
#[derive(Debug, Clone)]
pub struct LineRecord {
    pub format: AudioFormat,
    pub written: Vec<u8>,
    pub writes: usize,
    pub started: bool,
    pub flushed: bool,
    pub drained: bool,
    pub closed: bool,
    pub gain: Option<GainControl>,
}

impl LineRecord {
    fn new(format: AudioFormat, gain: Option<GainControl>) -> Self {
        Self {
            format,
            written: Vec::new(),
            writes: 0,
            started: false,
            flushed: false,
            drained: false,
            closed: false,
            gain,
        }
    }
}

pub struct MemoryBackend {
    pacing: Option<f32>,
    open_delay: Option<Duration>,
    gain_range: Option<(f32, f32)>,
    fail_open: bool,
    fail_after: Option<usize>,
    lines: Mutex<Vec<Arc<Mutex<LineRecord>>>>,
}

impl MemoryBackend {
    /// Lines accept writes instantly and offer a full-range gain control
    pub fn new() -> Self {
        Self {
            pacing: None,
            open_delay: None,
            gain_range: Some((SILENCE_FLOOR_DB, MAX_GAIN_DB)),
            fail_open: false,
            fail_after: None,
            lines: Mutex::new(Vec::new()),
        }
    }

    /// Make each write take the playback time of its bytes divided by `speed`
    pub fn with_pacing(mut self, speed: f32) -> Self {
        self.pacing = Some(speed.max(f32::EPSILON));
        self
    }

    /// Make every `open_line` take `delay`, like a device that is slow to come up
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    pub fn with_gain_range(mut self, min_db: f32, max_db: f32) -> Self {
        self.gain_range = Some((min_db, max_db));
        self
    }

    /// Lines report no gain control
    pub fn without_gain(mut self) -> Self {
        self.gain_range = None;
        self
    }

    /// Every `open_line` fails as if no device matched
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// The write with index `writes` (zero-based) and all later ones fail
    pub fn failing_after(mut self, writes: usize) -> Self {
        self.fail_after = Some(writes);
        self
    }

    /// Number of lines opened so far
    pub fn opened(&self) -> usize {
        self.lines.lock().len()
    }

    /// Snapshot of every line opened so far, in opening order
    pub fn lines(&self) -> Vec<LineRecord> {
        self.lines.lock().iter().map(|r| r.lock().clone()).collect()
    }

    pub fn line(&self, index: usize) -> Option<LineRecord> {
        self.lines.lock().get(index).map(|r| r.lock().clone())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn open_line(&self, format: &AudioFormat) -> Result<Box<dyn OutputLine>> {
        if let Some(delay) = self.open_delay {
            thread::sleep(delay);
        }
        if self.fail_open {
            return Err(Error::LineUnavailable(format!(
                "memory backend refused {} Hz, {} channel(s)",
                format.sample_rate, format.channels
            )));
        }

        let gain = self
            .gain_range
            .map(|(min_db, max_db)| GainControl::new(min_db, max_db));
        let record = Arc::new(Mutex::new(LineRecord::new(*format, gain.clone())));
        self.lines.lock().push(Arc::clone(&record));

        Ok(Box::new(MemoryLine {
            record,
            format: *format,
            gain,
            pacing: self.pacing,
            fail_after: self.fail_after,
            open: true,
        }))
    }
}

pub struct MemoryLine {
    record: Arc<Mutex<LineRecord>>,
    format: AudioFormat,
    gain: Option<GainControl>,
    pacing: Option<f32>,
    fail_after: Option<usize>,
    open: bool,
}

impl OutputLine for MemoryLine {
    fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn start(&mut self) -> Result<()> {
        if !self.open {
            return Err(Error::InvalidState("line is closed".to_string()));
        }
        self.record.lock().started = true;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if !self.open {
            return Err(Error::StreamIo("write to a closed line".to_string()));
        }

        let writes = self.record.lock().writes;
        if self.fail_after.is_some_and(|limit| writes >= limit) {
            return Err(Error::StreamIo(format!("simulated failure on write {}", writes)));
        }

        if let Some(speed) = self.pacing {
            thread::sleep(self.format.duration_of(data.len()).div_f32(speed));
        }

        let mut record = self.record.lock();
        record.written.extend_from_slice(data);
        record.writes += 1;
        Ok(data.len())
    }

    fn flush(&mut self) {
        self.record.lock().flushed = true;
    }

    fn drain(&mut self) {
        self.record.lock().drained = true;
    }

    fn close(&mut self) {
        self.open = false;
        self.record.lock().closed = true;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn gain_control(&self) -> Option<GainControl> {
        self.gain.clone()
    }
}
