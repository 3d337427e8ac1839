// Audio output lines
// A line is one exclusively-owned stream to an output device; backends open them

use parking_lot::Mutex;
use std::sync::Arc;

use crate::audio::format::AudioFormat;
use crate::error::{Error, Result};

/// Gain applied for volume 0.0; device gain controls reject anything lower
pub const SILENCE_FLOOR_DB: f32 = -80.0;

/// Upper end of a typical master gain range
pub const MAX_GAIN_DB: f32 = 6.0;

/// Convert a linear volume in [0.0, 1.0] to decibels, floored at silence
pub fn volume_to_db(volume: f32) -> f32 {
    let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
    (20.0 * volume.log10()).max(SILENCE_FLOOR_DB)
}

/// Handle to a line's master gain, shared with whatever renders the line
#[derive(Debug, Clone)]
pub struct GainControl {
    db: Arc<Mutex<f32>>,
    min_db: f32,
    max_db: f32,
}

impl GainControl {
    pub fn new(min_db: f32, max_db: f32) -> Self {
        Self {
            db: Arc::new(Mutex::new(0.0f32.clamp(min_db, max_db))),
            min_db,
            max_db,
        }
    }

    pub fn set_db(&self, db: f32) -> Result<()> {
        if !(self.min_db..=self.max_db).contains(&db) {
            return Err(Error::UnsupportedControl(format!(
                "gain {:.1} dB outside [{:.1}, {:.1}] dB",
                db, self.min_db, self.max_db
            )));
        }
        *self.db.lock() = db;
        Ok(())
    }

    pub fn db(&self) -> f32 {
        *self.db.lock()
    }

    /// Amplitude factor for the current gain; the floor renders as silence
    pub fn linear(&self) -> f32 {
        let db = self.db();
        if db <= SILENCE_FLOOR_DB {
            0.0
        } else {
            10f32.powf(db / 20.0)
        }
    }

    pub fn range(&self) -> (f32, f32) {
        (self.min_db, self.max_db)
    }
}

impl Default for GainControl {
    fn default() -> Self {
        Self::new(SILENCE_FLOOR_DB, MAX_GAIN_DB)
    }
}

/// One open output stream.
///
/// Lines are opened and driven by a single session thread, so they need not be `Send`.
pub trait OutputLine {
    /// Format the line was opened with
    fn format(&self) -> &AudioFormat;
    /// Begin (or resume) rendering
    fn start(&mut self) -> Result<()>;
    /// Hand PCM bytes to the device, blocking until all of them are accepted
    fn write(&mut self, data: &[u8]) -> Result<usize>;
    /// Discard buffered data that has not been played yet
    fn flush(&mut self);
    /// Block until buffered data has been played
    fn drain(&mut self);
    /// Release the device stream
    fn close(&mut self);
    fn is_open(&self) -> bool;
    /// Master gain, or `None` when the line has no gain control
    fn gain_control(&self) -> Option<GainControl>;
}

/// Source of output lines
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &str;
    /// Open a line matching `format`; fails with `Error::LineUnavailable`
    fn open_line(&self, format: &AudioFormat) -> Result<Box<dyn OutputLine>>;
}
