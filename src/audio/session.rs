// Playback sessions
// A session is one playback of a source: its own thread, decoder and output line.
//
// The thread owns the decoder and the line outright. Everything a controller can
// touch (state, gain handle, counters) sits behind one mutex, and the same
// condvar wakes a paused loop and anyone waiting for the session to finish.
// The loop never holds that mutex while reading or writing audio.

use crossbeam::channel::{self, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::audio::decoder::{AudioDecoder, PcmStream};
use crate::audio::format::AudioFormat;
use crate::audio::output::{volume_to_db, AudioBackend, GainControl, OutputLine};
use crate::audio::source::AudioSource;
use crate::error::{Error, Result};
use crate::settings::PlaybackSettings;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Opens a fresh PCM stream over a source: once when the session is built and
/// again on every loop restart
type Opener = Arc<dyn Fn(&AudioSource) -> Result<Box<dyn PcmStream>> + Send + Sync>;

fn open_decoder(source: &AudioSource) -> Result<Box<dyn PcmStream>> {
    Ok(Box::new(AudioDecoder::open(source.bytes())?))
}

/// Session state as seen by controllers.
///
/// `Unknown` is both the state before `start` and the terminal state once the
/// streaming thread has exited; `PlaybackSession::is_finished` tells them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Unknown,
    Playing,
    Paused,
    Ended,
}

struct Control {
    state: PlaybackState,
    started: bool,
    finished: bool,
    line_open: bool,
    gain: Option<GainControl>,
    volume: Option<f32>,
    bytes_written: u64,
    position: u64,
    restarts: u32,
}

struct Shared {
    control: Mutex<Control>,
    changed: Condvar,
}

impl Shared {
    fn new() -> Self {
        Self {
            control: Mutex::new(Control {
                state: PlaybackState::Unknown,
                started: false,
                finished: false,
                line_open: false,
                gain: None,
                volume: None,
                bytes_written: 0,
                position: 0,
                restarts: 0,
            }),
            changed: Condvar::new(),
        }
    }

    fn state(&self) -> PlaybackState {
        self.control.lock().state
    }

    fn line_opened(&self, gain: Option<GainControl>) {
        let mut control = self.control.lock();
        control.started = true;
        control.line_open = true;
        control.gain = gain;
        // A pause or stop issued before the line came up stays in force
        if control.state == PlaybackState::Unknown {
            control.state = PlaybackState::Playing;
        }
    }

    /// Park while paused; returns the state that ended the wait
    fn wait_while_paused(&self) -> PlaybackState {
        let mut control = self.control.lock();
        while control.state == PlaybackState::Paused {
            self.changed.wait(&mut control);
        }
        control.state
    }

    fn record_written(&self, bytes: usize) {
        let mut control = self.control.lock();
        control.bytes_written += bytes as u64;
        control.position += bytes as u64;
    }

    fn record_restart(&self) -> u32 {
        let mut control = self.control.lock();
        control.position = 0;
        control.restarts += 1;
        control.restarts
    }

    fn finish(&self) {
        let mut control = self.control.lock();
        control.state = PlaybackState::Unknown;
        control.finished = true;
        control.line_open = false;
        control.gain = None;
        drop(control);
        self.changed.notify_all();
    }
}

/// How a streaming run ended
enum Outcome {
    Completed,
    Stopped,
    Failed(Error),
}

/// How one pass over the decoded stream ended
enum Cycle {
    EndOfStream,
    Stopped,
}

/// Everything the streaming thread owns
struct Worker {
    id: u64,
    source: AudioSource,
    looping: bool,
    open: Opener,
    decoder: Box<dyn PcmStream>,
    chunk_size: usize,
    shared: Arc<Shared>,
}

impl Worker {
    fn run(mut self, backend: Arc<dyn AudioBackend>, ready: Sender<Result<()>>) {
        let mut line = match self.open_line(backend.as_ref()) {
            Ok(line) => line,
            Err(e) => {
                warn!(
                    "Session {} ({}): no output line on '{}': {}",
                    self.id,
                    self.source.id(),
                    backend.name(),
                    e
                );
                self.shared.finish();
                let _ = ready.send(Err(e));
                return;
            }
        };

        self.shared.line_opened(line.gain_control());
        // The controller may already have gone away; playback goes on regardless
        let _ = ready.send(Ok(()));
        debug!(
            "Session {} ({}) streaming {} Hz, {} channel(s), loop={}",
            self.id,
            self.source.id(),
            line.format().sample_rate,
            line.format().channels,
            self.looping
        );

        let outcome = self.stream(line.as_mut());
        self.close_line(line.as_mut(), outcome);
        self.shared.finish();
    }

    fn open_line(&self, backend: &dyn AudioBackend) -> Result<Box<dyn OutputLine>> {
        let mut line = backend.open_line(&self.decoder.format())?;
        if let Err(e) = line.start() {
            line.close();
            return Err(e);
        }
        Ok(line)
    }

    /// Play the source, restarting it from the top while looping
    fn stream(&mut self, line: &mut dyn OutputLine) -> Outcome {
        let mut chunk = vec![0u8; self.chunk_size];

        loop {
            match self.play_cycle(line, &mut chunk) {
                Ok(Cycle::Stopped) => return Outcome::Stopped,
                Ok(Cycle::EndOfStream) => {
                    if self.shared.state() == PlaybackState::Ended {
                        return Outcome::Stopped;
                    }
                    if !self.looping {
                        return Outcome::Completed;
                    }
                    match (self.open)(&self.source) {
                        Ok(decoder) => {
                            self.decoder = decoder;
                            let restarts = self.shared.record_restart();
                            debug!("Session {} looped ({} restarts)", self.id, restarts);
                        }
                        Err(e) => return Outcome::Failed(e),
                    }
                }
                Err(e) => return Outcome::Failed(e),
            }
        }
    }

    fn play_cycle(&mut self, line: &mut dyn OutputLine, chunk: &mut [u8]) -> Result<Cycle> {
        loop {
            if self.shared.wait_while_paused() == PlaybackState::Ended {
                return Ok(Cycle::Stopped);
            }

            match self.decoder.read(chunk)? {
                Some(n) => {
                    let written = line.write(&chunk[..n])?;
                    self.shared.record_written(written);
                }
                None => return Ok(Cycle::EndOfStream),
            }
        }
    }

    fn close_line(&self, line: &mut dyn OutputLine, outcome: Outcome) {
        match outcome {
            Outcome::Completed => debug!("Session {} reached end of stream", self.id),
            Outcome::Stopped => {
                line.flush();
                debug!("Session {} stopped", self.id);
            }
            Outcome::Failed(e) => {
                error!("Session {} ({}) aborted: {}", self.id, self.source.id(), e);
            }
        }

        if line.is_open() {
            line.drain();
            line.close();
        }
    }
}

/// One playback of an `AudioSource`.
///
/// Build it with [`PlaybackSession::new`], then [`start`](Self::start) it on a
/// backend. Control calls may come from any thread at any time.
pub struct PlaybackSession {
    id: u64,
    source_id: String,
    looping: bool,
    format: AudioFormat,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackSession {
    /// Open a decoder over `source`. Fails with `Error::Decode` for data the
    /// decoder cannot read; no thread or line exists until `start`.
    pub fn new(source: &AudioSource, looping: bool, settings: &PlaybackSettings) -> Result<Self> {
        Self::with_opener(source, looping, settings, Arc::new(open_decoder))
    }

    fn with_opener(
        source: &AudioSource,
        looping: bool,
        settings: &PlaybackSettings,
        open: Opener,
    ) -> Result<Self> {
        let decoder = open(source)?;
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let format = decoder.format();
        let shared = Arc::new(Shared::new());

        let worker = Worker {
            id,
            source: source.clone(),
            looping,
            open,
            decoder,
            chunk_size: settings.chunk_size.max(1),
            shared: Arc::clone(&shared),
        };

        Ok(Self {
            id,
            source_id: source.id().to_string(),
            looping,
            format,
            shared,
            worker: Mutex::new(Some(worker)),
            thread: Mutex::new(None),
        })
    }

    /// `new` followed by `start`
    pub fn spawn(
        source: &AudioSource,
        looping: bool,
        settings: &PlaybackSettings,
        backend: Arc<dyn AudioBackend>,
    ) -> Result<Self> {
        let session = Self::new(source, looping, settings)?;
        session.start(backend)?;
        Ok(session)
    }

    /// Open an output line and begin streaming on a new thread.
    ///
    /// Returns once the line is open and playing. If no line can be opened the
    /// error is returned and the session stays silent for good.
    pub fn start(&self, backend: Arc<dyn AudioBackend>) -> Result<()> {
        let worker = self
            .worker
            .lock()
            .take()
            .ok_or_else(|| Error::InvalidState(format!("session {} already started", self.id)))?;

        let (ready_tx, ready_rx) = channel::bounded(1);
        let spawned = thread::Builder::new()
            .name(format!("chime-session-{}", self.id))
            .spawn(move || worker.run(backend, ready_tx));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.finish();
                return Err(Error::Io(e));
            }
        };

        let ready = ready_rx.recv().unwrap_or_else(|_| {
            Err(Error::LineUnavailable(
                "session thread exited before opening a line".to_string(),
            ))
        });

        match ready {
            Ok(()) => {
                *self.thread.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                let _ = handle.join();
                Err(e)
            }
        }
    }

    /// Pause (`true`) or resume (`false`). Has no effect once stopped.
    pub fn pause(&self, pause: bool) {
        let mut control = self.shared.control.lock();
        if control.finished || control.state == PlaybackState::Ended {
            return;
        }

        if pause {
            control.state = PlaybackState::Paused;
        } else if control.state == PlaybackState::Paused {
            control.state = if control.started {
                PlaybackState::Playing
            } else {
                PlaybackState::Unknown
            };
            drop(control);
            self.shared.changed.notify_all();
        }
    }

    /// Ask the session to end. Wakes it if paused; idempotent.
    pub fn stop(&self) {
        let mut control = self.shared.control.lock();
        if control.finished || control.state == PlaybackState::Ended {
            return;
        }
        control.state = PlaybackState::Ended;
        drop(control);
        self.shared.changed.notify_all();
    }

    /// Apply `volume` (0.0 to 1.0) as master gain on the line.
    ///
    /// A no-op before a line is open or after it closed. Fails with
    /// `Error::UnsupportedControl` when the line has no usable gain control.
    pub fn set_volume(&self, volume: f32) -> Result<()> {
        let mut control = self.shared.control.lock();
        if !control.line_open {
            return Ok(());
        }

        let gain = control.gain.clone().ok_or_else(|| {
            Error::UnsupportedControl("line has no master gain control".to_string())
        })?;
        gain.set_db(volume_to_db(volume))?;
        control.volume = Some(volume.clamp(0.0, 1.0));
        Ok(())
    }

    /// Last volume applied to the line
    pub fn volume(&self) -> Option<f32> {
        self.shared.control.lock().volume
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// PCM format of the decoded stream
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state()
    }

    /// Started and not yet finished
    pub fn is_active(&self) -> bool {
        let control = self.shared.control.lock();
        control.started && !control.finished
    }

    /// The streaming thread has exited (or never got a line)
    pub fn is_finished(&self) -> bool {
        self.shared.control.lock().finished
    }

    /// PCM bytes accepted by the line, across all loop passes
    pub fn bytes_written(&self) -> u64 {
        self.shared.control.lock().bytes_written
    }

    /// PCM bytes written in the current pass over the source; back to 0 on every loop restart
    pub fn position(&self) -> u64 {
        self.shared.control.lock().position
    }

    /// Times a looping session went back to the start of its source
    pub fn restarts(&self) -> u32 {
        self.shared.control.lock().restarts
    }

    /// Block until the session finishes or `timeout` passes; true if finished
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut control = self.shared.control.lock();
        while !control.finished {
            match deadline {
                Some(deadline) => {
                    if self.shared.changed.wait_until(&mut control, deadline).timed_out() {
                        return control.finished;
                    }
                }
                None => self.shared.changed.wait(&mut control),
            }
        }
        true
    }

    /// Wait for the streaming thread to exit. Must not be called from it.
    pub fn join(&self) {
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Session {} thread panicked", self.id);
            }
        }
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("id", &self.id)
            .field("source_id", &self.source_id)
            .field("looping", &self.looping)
            .field("state", &self.state())
            .finish()
    }
}
